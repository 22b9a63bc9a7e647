//! Core type definitions for the toolscript runtime.
//!
//! The type system is organized into three main categories:
//!
//! # Message System
//!
//! Two views of the same conversation exist side by side:
//!
//! - [`ClientMessage`]: the client-visible history. In addition to the
//!   standard chat roles it carries `code` and `code-result` messages that
//!   bracket one code-evaluation block.
//! - [`ChatMessage`]: the model-visible history (and HTTP wire shape) with
//!   the conventional roles only. The model never sees `code` messages; it
//!   sees a single virtual tool instead.
//!
//! # Tool System
//!
//! - [`ToolDefinition`]: name, description, and JSON-Schema parameter/return
//!   shapes for a client-implemented tool
//! - [`ToolCall`] / [`FunctionCall`]: the function-calling wire format
//!   (arguments travel as a JSON *string*, an API quirk preserved here)
//! - [`ToolCallState`]: one entry of the replay tool-state (`pending`,
//!   `resolved`, or `rejected`)
//!
//! # Evaluation
//!
//! - [`CodeBlock`] + [`PartialEvaluation`]: the complete, self-contained
//!   input of one sandbox replay pass
//! - [`CodeOutcome`] / [`EvalOutcome`]: what a pass produced
//! - [`LlmOptions`] / [`LlmOptionsBuilder`]: completion-endpoint
//!   configuration with build-time validation
//! - [`SandboxConfig`]: memory cap and optional wall-clock cap
//!
//! # Example
//!
//! ```no_run
//! use toolscript::{ClientMessage, LlmOptions};
//!
//! let options = LlmOptions::builder()
//!     .model("qwen2.5-32b-instruct")
//!     .base_url("http://localhost:1234/v1")
//!     .build()
//!     .expect("valid configuration");
//!
//! let history = vec![ClientMessage::user("Summarize today's news")];
//! ```

use crate::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Default sandbox heap cap: 8 MiB.
pub const DEFAULT_MEMORY_LIMIT: usize = 8 * 1024 * 1024;

// ============================================================================
// TOOL-CALL WIRE FORMAT
// ============================================================================

/// A tool call as it appears on assistant messages.
///
/// Follows the prevailing function-calling convention: a unique id for
/// correlating the eventual result, a call type (always `"function"`), and
/// the function name plus arguments.
///
/// ```json
/// {
///   "id": "call_abc123",
///   "type": "function",
///   "function": {
///     "name": "web_search",
///     "arguments": "{\"query\":\"news today\"}"
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call, used to correlate the result.
    pub id: String,

    /// Type of the call (always "function" in the current convention).
    #[serde(rename = "type")]
    pub call_type: String,

    /// Function name and arguments.
    pub function: FunctionCall,
}

impl ToolCall {
    /// Creates a function tool call. `arguments` is serialized to the JSON
    /// string the wire format expects.
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }
}

/// Function name and arguments of a [`ToolCall`].
///
/// `arguments` is a **JSON string**, not a parsed object: e.g.
/// `"{\"x\": 1}"`, not `{"x": 1}`. Use [`FunctionCall::arguments_value`] to
/// decode it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function/tool to call.
    pub name: String,

    /// Function arguments as a JSON string.
    pub arguments: String,
}

impl FunctionCall {
    /// Parse the arguments string into a JSON value.
    pub fn arguments_value(&self) -> crate::Result<Value> {
        serde_json::from_str(&self.arguments).map_err(Error::Json)
    }
}

// ============================================================================
// CLIENT-VISIBLE MESSAGES
// ============================================================================

/// The result payload of a `code-result` message, and the terminal half of a
/// sandbox evaluation.
///
/// Serialized with a `status` tag:
///
/// ```json
/// {"status": "success", "data": [1, 2, 3]}
/// {"status": "error", "error": {"name": "Error", "message": "oops"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CodeOutcome {
    /// `main()` resolved with a value.
    Success {
        /// The resolved value, JSON-marshalled out of the sandbox.
        data: Value,
    },
    /// `main()` failed with a genuine user-code runtime error.
    Error {
        /// The normalized error value (`{name, message}` for `Error`
        /// objects, the thrown value otherwise).
        error: Value,
    },
}

impl CodeOutcome {
    /// True for the success variant.
    pub fn is_success(&self) -> bool {
        matches!(self, CodeOutcome::Success { .. })
    }
}

/// A message in the client-visible history.
///
/// Beyond the standard chat roles, two extra roles bracket a
/// code-evaluation block: a `code` message opens it and exactly one
/// `code-result` with the same id closes it. Between the two, only
/// assistant messages carrying tool calls and their answering tool messages
/// may appear. That interior dialogue is invisible to the model.
///
/// This top-level-role shape is the one canonical representation of a code
/// block in this runtime; there is no embedded tool-call-kind alternative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// System message establishing context and instructions.
    System {
        /// Message text.
        content: String,
    },

    /// User message.
    User {
        /// Message text.
        content: String,
    },

    /// Assistant message: text, tool calls, or both.
    Assistant {
        /// Optional message text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// Tool calls requested by the assistant.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },

    /// Tool result answering one assistant tool call. `content` is JSON text
    /// of the client's tool result.
    Tool {
        /// Id of the tool call this message answers.
        tool_call_id: String,
        /// JSON text of the result.
        content: String,
    },

    /// A model-emitted program expected to define `async function main()`.
    Code {
        /// Block identifier, matched by the closing `code-result`.
        id: String,
        /// Program source text.
        code: String,
    },

    /// Closes the code block with the same id.
    CodeResult {
        /// Identifier of the block being closed.
        id: String,
        /// Terminal outcome of the block.
        result: CodeOutcome,
    },
}

impl ClientMessage {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        ClientMessage::System {
            content: content.into(),
        }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        ClientMessage::User {
            content: content.into(),
        }
    }

    /// Creates a text-only assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        ClientMessage::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Creates an assistant message carrying only tool calls.
    pub fn assistant_calls(tool_calls: Vec<ToolCall>) -> Self {
        ClientMessage::Assistant {
            content: None,
            tool_calls,
        }
    }

    /// Creates a tool-result message.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ClientMessage::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }

    /// Creates a code message.
    pub fn code(id: impl Into<String>, code: impl Into<String>) -> Self {
        ClientMessage::Code {
            id: id.into(),
            code: code.into(),
        }
    }

    /// Creates a code-result message.
    pub fn code_result(id: impl Into<String>, result: CodeOutcome) -> Self {
        ClientMessage::CodeResult {
            id: id.into(),
            result,
        }
    }
}

// ============================================================================
// MODEL-VISIBLE MESSAGES (AND HTTP WIRE SHAPE)
// ============================================================================

/// A message in the model-visible history; also the chat-completions wire
/// shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role as a string ("system", "user", "assistant", "tool").
    pub role: String,

    /// Message text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool calls requested by the assistant (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Id of the tool call this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates a text-only assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Creates an assistant message carrying tool calls.
    pub fn assistant_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Creates a tool-result message.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// The assistant's tool calls, empty when none.
    pub fn calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }
}

/// Request payload for a non-streaming chat completion.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,

    /// Conversation history, system prompt first.
    pub messages: Vec<ChatMessage>,

    /// Always `false`: this runtime does not consume streamed responses.
    pub stream: bool,

    /// Maximum tokens to generate (provider default when `None`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature (provider default when `None`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Tools available to the model, in wire format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
}

/// Response payload of a non-streaming chat completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Completion choices; the first carries the assistant reply.
    pub choices: Vec<ChatChoice>,
}

/// One completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    /// The assistant message.
    pub message: ChatMessage,
}

// ============================================================================
// TOOL DEFINITIONS
// ============================================================================

/// Definition of a client-implemented tool.
///
/// The runtime never executes tools; it only intercepts their invocations
/// inside the sandbox and reports them to the client. The schemas are
/// consumed by the type projector that renders the system prompt.
///
/// # Schema flexibility
///
/// `parameters` accepts three input-schema shapes:
///
/// - simple type notation: `{"location": "string"}`
/// - extended property schema: `{"query": {"type": "string", "description": "…"}}`
/// - full JSON Schema (passed through as-is)
///
/// All are normalized to full JSON Schema at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name; also the global function name visible in the sandbox.
    pub name: String,

    /// Free-text description shown to the model.
    pub description: String,

    /// JSON Schema of the tool's argument.
    pub parameters: Value,

    /// Optional JSON Schema of the tool's result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Value>,
}

impl ToolDefinition {
    /// Creates a tool definition, normalizing `parameters` to full JSON
    /// Schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: normalize_schema(parameters),
            returns: None,
        }
    }

    /// Attaches a return-type schema.
    pub fn with_returns(mut self, returns: Value) -> Self {
        self.returns = Some(returns);
        self
    }

    /// Renders the function-calling wire payload for this tool.
    pub fn to_wire_format(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Normalize a flexible schema notation to full JSON Schema.
///
/// A map that already has `"type"` and `"properties"` is passed through.
/// Otherwise each key is treated as a property: a bare string value becomes
/// `{"type": <string>}` and all such properties are required; an object
/// value is kept, with `"optional": true` / `"required": false` markers
/// stripped and honored.
fn normalize_schema(schema: Value) -> Value {
    let Value::Object(map) = &schema else {
        return schema;
    };

    if map.contains_key("type") && map.contains_key("properties") {
        return schema;
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (key, val) in map {
        match val {
            Value::String(ty) => {
                properties.insert(key.clone(), serde_json::json!({ "type": ty }));
                required.push(Value::String(key.clone()));
            }
            Value::Object(prop) => {
                let optional = prop.get("optional").and_then(Value::as_bool) == Some(true)
                    || prop.get("required").and_then(Value::as_bool) == Some(false);
                let mut prop = prop.clone();
                prop.remove("optional");
                prop.remove("required");
                properties.insert(key.clone(), Value::Object(prop));
                if !optional {
                    required.push(Value::String(key.clone()));
                }
            }
            other => {
                properties.insert(key.clone(), other.clone());
                required.push(Value::String(key.clone()));
            }
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": Value::Array(required),
    })
}

// ============================================================================
// REPLAY TOOL-STATE
// ============================================================================

/// One entry of the replay tool-state, ordered by first observation during
/// replay.
///
/// Resolved and rejected entries are frozen: once present they never
/// change. Identifiers are unique within a code block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ToolCallState {
    /// The invocation is known but no result is available yet.
    Pending {
        /// Minted call id.
        id: String,
        /// Tool name as invoked.
        name: String,
        /// Parsed invocation argument.
        arguments: Value,
    },
    /// The client supplied a successful result.
    Resolved {
        /// Call id.
        id: String,
        /// The client's result.
        result: Value,
    },
    /// The client supplied a failure.
    Rejected {
        /// Call id.
        id: String,
        /// The client's error value.
        error: Value,
    },
}

impl ToolCallState {
    /// The entry's call id.
    pub fn id(&self) -> &str {
        match self {
            ToolCallState::Pending { id, .. }
            | ToolCallState::Resolved { id, .. }
            | ToolCallState::Rejected { id, .. } => id,
        }
    }

    /// True for pending entries.
    pub fn is_pending(&self) -> bool {
        matches!(self, ToolCallState::Pending { .. })
    }
}

/// A model-emitted program, identified by the id of its code block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Block identifier.
    pub id: String,
    /// Program source text; must define `async function main()`.
    pub code: String,
}

/// The complete input of one sandbox replay pass.
///
/// A partial evaluation has no hidden state: identical inputs produce
/// identical outputs (up to minted identifiers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialEvaluation {
    /// The program being advanced.
    pub block: CodeBlock,
    /// Tool-call states observed so far, in first-observation order.
    pub tool_state: Vec<ToolCallState>,
}

/// Outcome of one sandbox evaluation.
///
/// Engine malfunctions are not represented here; they surface as
/// [`Error::Engine`](crate::Error::Engine) on the `evaluate` call itself.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalOutcome {
    /// The program terminated: either `main()` resolved, or it failed with
    /// a genuine runtime error.
    Completed(CodeOutcome),
    /// The program invoked at least one tool whose result is not yet known.
    /// `tool_state` extends the input state with the new pending entries.
    Pending {
        /// The grown tool-state, a prefix-extension of the input.
        tool_state: Vec<ToolCallState>,
    },
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Sandbox resource configuration.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Heap cap for one evaluation, in bytes.
    pub memory_limit: usize,

    /// Optional wall-clock cap for one evaluation. On expiry the pass is
    /// abandoned and reported as a runtime error.
    pub timeout: Option<Duration>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT,
            timeout: None,
        }
    }
}

impl SandboxConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the heap cap in bytes.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = bytes;
        self
    }

    /// Sets the wall-clock cap.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Configuration for the completion endpoint.
///
/// Construct through [`LlmOptions::builder`]; `model` and `base_url` are
/// required and validated at build time.
#[derive(Clone)]
pub struct LlmOptions {
    model: String,
    base_url: String,
    api_key: String,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout: u64,
}

/// Masks the API key so debug output is safe to log.
impl std::fmt::Debug for LlmOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmOptions")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LlmOptions {
    /// Creates a new builder.
    pub fn builder() -> LlmOptionsBuilder {
        LlmOptionsBuilder::default()
    }

    /// Returns the model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the sampling temperature.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Returns the maximum tokens setting.
    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    /// Returns the HTTP timeout in seconds.
    pub fn timeout(&self) -> u64 {
        self.timeout
    }
}

/// Builder for [`LlmOptions`] with validation.
#[derive(Debug, Default)]
pub struct LlmOptionsBuilder {
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Option<u64>,
}

impl LlmOptionsBuilder {
    /// Sets the model identifier (required).
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the API endpoint URL (required). Must be an OpenAI-compatible
    /// endpoint, e.g. `http://localhost:1234/v1`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the API key. Most local servers don't need one; the default
    /// "not-needed" works for those.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the sampling temperature (0.0 to 2.0).
    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    /// Sets the maximum tokens to generate per completion.
    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Sets the HTTP request timeout in seconds.
    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validates configuration and builds the final [`LlmOptions`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `model` or `base_url` is missing,
    /// empty, or malformed, or if `temperature`/`max_tokens` are out of
    /// range.
    pub fn build(self) -> crate::Result<LlmOptions> {
        let model = self
            .model
            .ok_or_else(|| Error::config("model is required"))?;
        if model.trim().is_empty() {
            return Err(Error::invalid_input("model cannot be empty or whitespace"));
        }

        let base_url = self
            .base_url
            .ok_or_else(|| Error::config("base_url is required"))?;
        if base_url.trim().is_empty() {
            return Err(Error::invalid_input("base_url cannot be empty"));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::invalid_input(
                "base_url must start with http:// or https://",
            ));
        }

        let temperature = self.temperature.unwrap_or(0.0);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(Error::invalid_input(
                "temperature must be between 0.0 and 2.0",
            ));
        }

        let max_tokens = self.max_tokens.or(Some(4096));
        if max_tokens == Some(0) {
            return Err(Error::invalid_input("max_tokens must be greater than 0"));
        }

        Ok(LlmOptions {
            model,
            base_url,
            api_key: self.api_key.unwrap_or_else(|| "not-needed".to_string()),
            temperature,
            max_tokens,
            timeout: self.timeout.unwrap_or(60),
        })
    }
}
