//! Projection of tool schemas into the TypeScript declarations the model
//! programs against.
//!
//! The system prompt built here is the only way the model learns of the
//! client's tools; the completion request itself advertises exactly one
//! tool, [`run_typescript_tool`]. Each client tool becomes an `Input` type,
//! an `Output` type, and an `async function` declaration the program can
//! call directly.

use serde_json::Value;

use crate::types::ToolDefinition;

/// Name of the single virtual tool the model sees.
pub const RUN_TYPESCRIPT: &str = "run_typescript";

/// The virtual tool through which the model submits a code block.
pub fn run_typescript_tool() -> ToolDefinition {
    ToolDefinition::new(
        RUN_TYPESCRIPT,
        "Run a TypeScript program. The program must define `async function main()`; \
         the runtime invokes it and reports its return value.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "TypeScript source defining async function main()"
                }
            },
            "required": ["code"]
        }),
    )
}

/// Render the type declarations for a set of tools.
///
/// For every tool: a `type NameInput = …` derived from its parameter
/// schema, a `type NameOutput = …` derived from its return schema (or
/// `unknown`), and the function declaration itself.
pub fn type_declarations(tools: &[ToolDefinition]) -> String {
    let mut out = String::new();
    for (index, tool) in tools.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        let type_name = pascal_case(&tool.name);
        if !tool.description.is_empty() {
            for line in tool.description.lines() {
                out.push_str("// ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str(&format!(
            "type {type_name}Input = {};\n",
            schema_to_ts(&tool.parameters, 0)
        ));
        let output_ts = tool
            .returns
            .as_ref()
            .map(|schema| schema_to_ts(schema, 0))
            .unwrap_or_else(|| "unknown".to_string());
        out.push_str(&format!("type {type_name}Output = {output_ts};\n"));
        out.push_str(&format!(
            "declare async function {}(input: {type_name}Input): Promise<{type_name}Output>;\n",
            tool.name
        ));
    }
    out
}

/// Assemble the system prompt shown to the model.
pub fn system_prompt(tools: &[ToolDefinition]) -> String {
    format!(
        "You orchestrate tools by writing TypeScript programs instead of \
         issuing individual tool calls.\n\n\
         Submit every program through the `{RUN_TYPESCRIPT}` tool. Rules:\n\
         - Put all of your logic inside `async function main()`.\n\
         - Do NOT invoke `main()` yourself; the runtime invokes it.\n\
         - `main`'s return value becomes the program result; return plain \
         JSON-serializable data.\n\
         - Call the tool functions declared below directly; they are \
         available as globals and return promises.\n\
         - Tool failures reject the corresponding promise; catch them if \
         you can recover.\n\n\
         Available tools:\n\n```typescript\n{}```",
        type_declarations(tools)
    )
}

/// Render a JSON Schema as a TypeScript type expression.
fn schema_to_ts(schema: &Value, depth: usize) -> String {
    let Value::Object(map) = schema else {
        return "unknown".to_string();
    };

    if let Some(values) = map.get("enum").and_then(Value::as_array) {
        let literals: Vec<String> = values.iter().map(literal_ts).collect();
        return if literals.is_empty() {
            "never".to_string()
        } else {
            literals.join(" | ")
        };
    }

    if let Some(variants) = map
        .get("anyOf")
        .or_else(|| map.get("oneOf"))
        .and_then(Value::as_array)
    {
        let rendered: Vec<String> = variants.iter().map(|v| schema_to_ts(v, depth)).collect();
        return if rendered.is_empty() {
            "unknown".to_string()
        } else {
            rendered.join(" | ")
        };
    }

    match map.get("type").and_then(Value::as_str) {
        Some("string") => "string".to_string(),
        Some("number") | Some("integer") => "number".to_string(),
        Some("boolean") => "boolean".to_string(),
        Some("null") => "null".to_string(),
        Some("array") => {
            let items = map
                .get("items")
                .map(|items| schema_to_ts(items, depth))
                .unwrap_or_else(|| "unknown".to_string());
            if items.contains(' ') {
                format!("Array<{items}>")
            } else {
                format!("{items}[]")
            }
        }
        Some("object") => object_to_ts(map, depth),
        _ => "unknown".to_string(),
    }
}

fn object_to_ts(map: &serde_json::Map<String, Value>, depth: usize) -> String {
    let Some(properties) = map.get("properties").and_then(Value::as_object) else {
        return match map.get("additionalProperties") {
            Some(additional) if !additional.is_boolean() => {
                format!("Record<string, {}>", schema_to_ts(additional, depth))
            }
            _ => "Record<string, unknown>".to_string(),
        };
    };

    let required: Vec<&str> = map
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let inner_pad = "  ".repeat(depth + 1);
    let close_pad = "  ".repeat(depth);
    let mut out = String::from("{\n");
    for (key, prop) in properties {
        if let Some(description) = prop.get("description").and_then(Value::as_str) {
            out.push_str(&format!("{inner_pad}// {description}\n"));
        }
        let marker = if required.contains(&key.as_str()) {
            ""
        } else {
            "?"
        };
        out.push_str(&format!(
            "{inner_pad}{key}{marker}: {};\n",
            schema_to_ts(prop, depth + 1)
        ));
    }
    out.push_str(&close_pad);
    out.push('}');
    out
}

fn literal_ts(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

fn pascal_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c == ' ')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
