//! Live session against a local OpenAI-compatible server.
//!
//! Requires a running server (LM Studio, Ollama, llama.cpp, vLLM). Pick the
//! provider as the first argument; override the endpoint or model with
//! TOOLSCRIPT_BASE_URL / TOOLSCRIPT_MODEL.
//!
//! Run with: cargo run --example live_session -- ollama

use serde_json::{Value, json};
use std::str::FromStr;
use toolscript::{
    ClientMessage, HttpBackend, LlmOptions, Orchestrator, Provider, ToolDefinition, get_base_url,
    get_model,
};

/// The client's tool implementation: a canned clock.
fn get_time(arguments: &Value) -> Value {
    let timezone = arguments["timezone"].as_str().unwrap_or("UTC");
    json!({ "timezone": timezone, "time": "12:00" })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let provider = std::env::args()
        .nth(1)
        .and_then(|name| Provider::from_str(&name).ok());
    let base_url = get_base_url(provider, None);
    let model = get_model(Some("qwen2.5-32b-instruct"), true).expect("model name");
    println!("using {model} at {base_url}");

    let options = LlmOptions::builder()
        .model(model)
        .base_url(base_url)
        .timeout(120)
        .build()?;
    let orchestrator = Orchestrator::new(HttpBackend::new(options)?);

    let tools = vec![ToolDefinition::new(
        "getTime",
        "Get the current local time in a timezone",
        json!({"timezone": "string"}),
    )];

    let mut history = vec![ClientMessage::user(
        "What time is it right now in Tokyo and in Paris? Check both.",
    )];

    loop {
        let suffix = orchestrator.serve(&history, &tools).await?;
        for msg in &suffix {
            println!("<- {}", serde_json::to_string(msg)?);
        }
        history.extend(suffix);

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
                Ok(ClientMessage::tool(&call.id, get_time(&arguments).to_string()))
            })
            .collect::<toolscript::Result<_>>()?;
        history.extend(answers);
    }

    Ok(())
}
