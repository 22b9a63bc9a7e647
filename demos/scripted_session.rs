//! Scripted end-to-end session.
//!
//! Runs the full serve loop without a live model: a scripted backend plays
//! the model's part, and tool calls surfaced by the sandbox are executed
//! in-process. Useful for seeing the message flow of one complete
//! conversation.
//!
//! Run with: cargo run --example scripted_session

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Mutex;
use toolscript::{
    ChatMessage, ClientMessage, CompletionBackend, Orchestrator, RUN_TYPESCRIPT, Result, ToolCall,
    ToolDefinition,
};

/// Plays the model: first a program fanning out over two cities, then a
/// closing summary.
struct ScriptedModel {
    replies: Mutex<Vec<ChatMessage>>,
}

#[async_trait]
impl CompletionBackend for ScriptedModel {
    async fn complete(&self, _messages: &[ChatMessage], _tools: &[Value]) -> Result<ChatMessage> {
        let mut replies = self.replies.lock().expect("replies lock");
        Ok(replies.remove(0))
    }
}

/// The client's actual tool implementation.
fn get_weather(arguments: &Value) -> Value {
    match arguments["location"].as_str() {
        Some("Paris") => json!({"sky": "sunny", "temp": 21}),
        Some("London") => json!({"sky": "rain", "temp": 14}),
        _ => json!({"sky": "unknown", "temp": null}),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let program = r#"async function main() {
    const [paris, london] = await Promise.all([
        getWeather({ location: "Paris" }),
        getWeather({ location: "London" }),
    ]);
    return { paris, london };
}"#;

    let model = ScriptedModel {
        replies: Mutex::new(vec![
            ChatMessage::assistant_calls(
                None,
                vec![ToolCall::function(
                    "block_1",
                    RUN_TYPESCRIPT,
                    &json!({ "code": program }),
                )],
            ),
            ChatMessage::assistant("Paris: sunny, 21°. London: rain, 14°."),
        ]),
    };

    let orchestrator = Orchestrator::new(model);
    let tools = vec![ToolDefinition::new(
        "getWeather",
        "Get current weather for a location",
        json!({"location": "string"}),
    )];

    let mut history = vec![ClientMessage::user("Weather in Paris and London?")];

    loop {
        let suffix = orchestrator.serve(&history, &tools).await?;
        for msg in &suffix {
            println!("<- {}", serde_json::to_string(msg)?);
        }
        history.extend(suffix);

        // A trailing assistant message with tool calls means the client
        // must execute them and answer; without tool calls, we're done.
        let Some(ClientMessage::Assistant { tool_calls, .. }) = history.last() else {
            break;
        };
        if tool_calls.is_empty() {
            break;
        }

        let answers: Vec<ClientMessage> = tool_calls
            .iter()
            .map(|call| {
                let arguments = call.function.arguments_value()?;
                let result = get_weather(&arguments);
                println!("-> executing {}({arguments})", call.function.name);
                Ok(ClientMessage::tool(&call.id, result.to_string()))
            })
            .collect::<Result<_>>()?;
        history.extend(answers);
    }

    Ok(())
}
