//! The driver loop alternating between "advance the sandbox" and "ask the
//! model".
//!
//! [`Orchestrator::serve`] classifies the client history and either runs
//! the open code block one replay pass forward or requests a completion,
//! accumulating new client-visible messages until the turn ends: a
//! pending-tool-calls assistant message (the client must answer before
//! calling again) or a terminal assistant reply.
//!
//! The server holds no per-session state. Everything needed to advance an
//! in-progress block travels in the history, so any `serve` call can be
//! handled by any instance.

use log::debug;

use crate::declarations::{run_typescript_tool, system_prompt};
use crate::history::{self, Classified};
use crate::llm::CompletionBackend;
use crate::sandbox::Sandbox;
use crate::types::{ChatMessage, ClientMessage, EvalOutcome, SandboxConfig, ToolDefinition};
use crate::{Error, Result};

/// Default cap on model completions per `serve` call.
const DEFAULT_MAX_TURNS: u32 = 16;

/// The orchestration driver.
///
/// # Example
///
/// ```no_run
/// use toolscript::{ClientMessage, HttpBackend, LlmOptions, Orchestrator, ToolDefinition};
/// use serde_json::json;
///
/// # async fn example() -> toolscript::Result<()> {
/// let options = LlmOptions::builder()
///     .model("qwen2.5-32b-instruct")
///     .base_url("http://localhost:1234/v1")
///     .build()?;
/// let orchestrator = Orchestrator::new(HttpBackend::new(options)?);
///
/// let tools = vec![ToolDefinition::new(
///     "webSearch",
///     "Search the web",
///     json!({"query": "string"}),
/// )];
/// let history = vec![ClientMessage::user("What's in the news today?")];
///
/// let suffix = orchestrator.serve(&history, &tools).await?;
/// // `suffix` ends in either a terminal assistant reply or an assistant
/// // message with pending tool calls the client must answer.
/// # let _ = suffix;
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator<B: CompletionBackend> {
    backend: B,
    sandbox: Sandbox,
    max_turns: u32,
}

impl<B: CompletionBackend> Orchestrator<B> {
    /// Creates an orchestrator with the default sandbox configuration.
    pub fn new(backend: B) -> Self {
        Self::with_sandbox(backend, SandboxConfig::default())
    }

    /// Creates an orchestrator with an explicit sandbox configuration.
    pub fn with_sandbox(backend: B, config: SandboxConfig) -> Self {
        Self {
            backend,
            sandbox: Sandbox::new(config),
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    /// Caps the number of model completions per [`serve`](Self::serve)
    /// call.
    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = turns;
        self
    }

    /// Advance the conversation.
    ///
    /// Returns the non-empty suffix of new client-visible messages. The
    /// input history is never mutated; callers append the suffix
    /// themselves.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] for malformed histories, [`Error::Engine`] when
    /// the sandbox cannot be bootstrapped, [`Error::Other`] when the model
    /// keeps emitting code past the turn cap, plus whatever the completion
    /// backend surfaces. Runtime failures inside the model's program are
    /// not errors; they come back as `code-result` messages.
    pub async fn serve(
        &self,
        history: &[ClientMessage],
        tools: &[ToolDefinition],
    ) -> Result<Vec<ClientMessage>> {
        let mut combined = history.to_vec();
        let mut appended = Vec::new();
        let mut turns = 0u32;

        loop {
            match history::classify(&combined)? {
                Classified::AdvanceCode { partial } => {
                    let block = partial.block;
                    debug!(
                        "advancing code block '{}' ({} recorded tool calls)",
                        block.id,
                        partial.tool_state.len()
                    );
                    match self
                        .sandbox
                        .evaluate(&block.code, &partial.tool_state, tools)
                        .await?
                    {
                        EvalOutcome::Completed(result) => {
                            let msg = ClientMessage::code_result(block.id, result);
                            appended.push(msg.clone());
                            combined.push(msg);
                        }
                        EvalOutcome::Pending { tool_state } => {
                            appended.push(history::pending_to_client(&tool_state));
                            return Ok(appended);
                        }
                    }
                }
                Classified::AskModel {
                    history: model_history,
                } => {
                    if turns >= self.max_turns {
                        return Err(Error::other(format!(
                            "model produced {turns} completions without terminating",
                        )));
                    }
                    turns += 1;

                    let mut messages = Vec::with_capacity(model_history.len() + 1);
                    messages.push(ChatMessage::system(system_prompt(tools)));
                    messages.extend(model_history);

                    let virtual_tools = vec![run_typescript_tool().to_wire_format()];
                    let reply = self.backend.complete(&messages, &virtual_tools).await?;

                    let projected = history::assistant_to_client(&reply)?;
                    let terminal = !matches!(projected, ClientMessage::Code { .. });
                    debug!(
                        "model turn {turns}: {}",
                        if terminal { "terminal reply" } else { "code block" }
                    );
                    appended.push(projected.clone());
                    combined.push(projected);

                    if terminal {
                        return Ok(appended);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend that answers every request with a fresh code block.
    struct CodeForever {
        counter: AtomicU32,
    }

    #[async_trait]
    impl CompletionBackend for CodeForever {
        async fn complete(
            &self,
            _messages: &[ChatMessage],
            _tools: &[serde_json::Value],
        ) -> Result<ChatMessage> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            let arguments = json!({ "code": "async function main() { return 1; }" });
            Ok(ChatMessage::assistant_calls(
                None,
                vec![crate::types::ToolCall::function(
                    format!("block_{n}"),
                    crate::declarations::RUN_TYPESCRIPT,
                    &arguments,
                )],
            ))
        }
    }

    #[tokio::test]
    async fn test_turn_cap_stops_a_looping_model() {
        let orchestrator = Orchestrator::new(CodeForever {
            counter: AtomicU32::new(0),
        })
        .with_max_turns(3);

        let history = vec![ClientMessage::user("go")];
        let result = orchestrator.serve(&history, &[]).await;
        assert!(matches!(result, Err(Error::Other(_))));
    }

    #[tokio::test]
    async fn test_serve_does_not_mutate_input() {
        struct PlainReply;

        #[async_trait]
        impl CompletionBackend for PlainReply {
            async fn complete(
                &self,
                _messages: &[ChatMessage],
                _tools: &[serde_json::Value],
            ) -> Result<ChatMessage> {
                Ok(ChatMessage::assistant("hello"))
            }
        }

        let orchestrator = Orchestrator::new(PlainReply);
        let history = vec![ClientMessage::user("hi")];
        let before = history.clone();

        let suffix = orchestrator.serve(&history, &[]).await.unwrap();
        assert_eq!(history, before);
        assert_eq!(suffix, vec![ClientMessage::assistant("hello")]);
    }
}
