//! # toolscript
//!
//! A stateless tool-orchestration runtime that lets a language model express
//! multi-tool workflows as ordinary program code instead of a sequence of
//! discrete tool calls.
//!
//! ## How it works
//!
//! The model sees a single virtual tool, `run_typescript`, and submits small
//! programs that call the client's tools as async functions. The runtime
//! executes each program inside a fresh QuickJS sandbox, intercepts every
//! tool invocation, and surfaces the intercepted calls to the client as
//! standard tool-call messages. When the client answers, the runtime
//! re-executes the program from scratch with the answers seeded into the
//! interceptors (the *replay*) until the program terminates with a value
//! or surfaces more tool calls.
//!
//! Nothing is persisted between requests: the ordered tool-call dialogue in
//! the client-visible history *is* the execution state, and any server
//! instance can resume it.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use toolscript::{ClientMessage, HttpBackend, LlmOptions, Orchestrator, ToolDefinition};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = LlmOptions::builder()
//!         .model("qwen2.5-32b-instruct")
//!         .base_url("http://localhost:1234/v1")
//!         .build()?;
//!     let orchestrator = Orchestrator::new(HttpBackend::new(options)?);
//!
//!     let tools = vec![ToolDefinition::new(
//!         "webSearch",
//!         "Search the web for recent results",
//!         json!({"query": "string"}),
//!     )];
//!
//!     let mut history = vec![ClientMessage::user("Summarize today's news")];
//!     let suffix = orchestrator.serve(&history, &tools).await?;
//!     history.extend(suffix);
//!
//!     // When the suffix ends in an assistant message with tool calls,
//!     // execute them, append the tool results, and call serve again.
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **sandbox**: the deterministic replay engine on QuickJS
//! - **history**: the client-view/model-view transcoder
//! - **orchestrator**: the driver alternating sandbox and completions
//! - **declarations**: tool schemas projected as TypeScript declarations
//! - **llm**: the completion backend seam and its HTTP implementation
//! - **types**: messages, tool definitions, tool-state, configuration
//! - **config**: provider presets and environment overrides
//! - **error**: error types; **retry**: backoff utilities

/// Projection of tool schemas into TypeScript declarations and the system
/// prompt; home of the virtual `run_typescript` tool.
mod declarations;

/// Error types and conversions used across all public APIs.
mod error;

/// Bidirectional mapping between client-visible and model-visible
/// histories.
mod history;

/// Completion backends: the `CompletionBackend` seam and the HTTP
/// implementation for OpenAI-compatible servers.
mod llm;

/// The driver loop alternating sandbox passes and model completions.
mod orchestrator;

/// The deterministic replay sandbox.
mod sandbox;

/// Core type definitions for messages, tools, tool-state, and
/// configuration.
mod types;

/// Provider presets and environment-variable configuration helpers.
mod config;

/// Retry utilities with exponential backoff and jitter. Public so callers
/// can reuse the configuration for their own operations.
pub mod retry;

// --- Orchestration ---

pub use orchestrator::Orchestrator;

// --- Sandbox ---

pub use sandbox::Sandbox;

// --- History projections ---

pub use history::{Classified, assistant_to_client, classify, client_to_model, pending_to_client};

// --- Tool→type projection ---

pub use declarations::{RUN_TYPESCRIPT, run_typescript_tool, system_prompt, type_declarations};

// --- Completion backends ---

pub use llm::{CompletionBackend, HttpBackend};

// --- Provider configuration ---

pub use config::{Provider, get_base_url, get_model};

// --- Error handling ---

pub use error::{Error, Result};

// --- Core types ---

pub use types::{
    ChatMessage, ClientMessage, CodeBlock, CodeOutcome, DEFAULT_MEMORY_LIMIT, EvalOutcome,
    FunctionCall, LlmOptions, LlmOptionsBuilder, PartialEvaluation, SandboxConfig, ToolCall,
    ToolCallState, ToolDefinition,
};

/// Convenience module containing the most commonly used types and
/// functions. Import with `use toolscript::prelude::*;`.
pub mod prelude {
    pub use crate::{
        ChatMessage, ClientMessage, CodeOutcome, CompletionBackend, Error, EvalOutcome,
        HttpBackend, LlmOptions, Orchestrator, Result, Sandbox, SandboxConfig, ToolCall,
        ToolCallState, ToolDefinition,
    };
}
