//! History transcoder: the bidirectional mapping between the client-visible
//! history and the model-visible history.
//!
//! The client sees `code`/`code-result` brackets with the interior
//! tool-call dialogue spelled out; the model sees a conventional
//! single-tool conversation where each code block is an assistant
//! `run_typescript` tool call and each closing result is the answering tool
//! message. Everything in between the brackets is absorbed; the model
//! never sees it.
//!
//! All projections are pure; malformed histories surface as
//! [`Error::Protocol`](crate::Error::Protocol).

use serde_json::Value;

use crate::declarations::RUN_TYPESCRIPT;
use crate::types::{
    ChatMessage, ClientMessage, CodeBlock, PartialEvaluation, ToolCall, ToolCallState,
};
use crate::{Error, Result};

/// What a client history asks the orchestrator to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// The last `code` message has no matching `code-result`: advance the
    /// open block through the sandbox.
    AdvanceCode {
        /// The open block plus the tool-state reconstructed from the
        /// messages after its marker: everything one replay pass needs.
        partial: PartialEvaluation,
    },
    /// Every code block is closed: ask the model for its next move.
    AskModel {
        /// The model-visible projection of the history.
        history: Vec<ChatMessage>,
    },
}

/// Classify a client history as "advance code" vs "ask model".
///
/// # Errors
///
/// [`Error::Protocol`](crate::Error::Protocol) when the history is
/// malformed: a `code-result` without a preceding `code`, foreign messages
/// inside an open block, mismatched ids, or ill-formed tool content.
pub fn classify(messages: &[ClientMessage]) -> Result<Classified> {
    if let Some((index, id, code)) = last_code_block(messages) {
        let after = &messages[index + 1..];
        let closed = after
            .iter()
            .any(|m| matches!(m, ClientMessage::CodeResult { id: rid, .. } if *rid == id));
        if !closed {
            // Everything before the open block must itself be a
            // well-formed closed history.
            match classify(&messages[..index])? {
                Classified::AskModel { .. } => {}
                Classified::AdvanceCode { partial } => {
                    return Err(Error::protocol(format!(
                        "code block '{id}' opened while '{}' is still open",
                        partial.block.id
                    )));
                }
            }
            let tool_state = tool_state_from_slice(after)?;
            return Ok(Classified::AdvanceCode {
                partial: PartialEvaluation {
                    block: CodeBlock { id, code },
                    tool_state,
                },
            });
        }
    }

    Ok(Classified::AskModel {
        history: client_to_model(messages)?,
    })
}

fn last_code_block(messages: &[ClientMessage]) -> Option<(usize, String, String)> {
    messages
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, m)| match m {
            ClientMessage::Code { id, code } => Some((i, id.clone(), code.clone())),
            _ => None,
        })
}

/// Rebuild the replay tool-state from the open block's message slice.
///
/// The anchor is the latest assistant message *without* tool calls (the
/// full slice when none exists). Every assistant tool call after the anchor
/// becomes one entry: `resolved` when an answering tool message exists,
/// `pending` otherwise. Client-reported tool failures travel as
/// error-shaped values on the `resolved` channel; this path never produces
/// `rejected` entries.
fn tool_state_from_slice(slice: &[ClientMessage]) -> Result<Vec<ToolCallState>> {
    for msg in slice {
        match msg {
            ClientMessage::Assistant { .. } | ClientMessage::Tool { .. } => {}
            other => {
                return Err(Error::protocol(format!(
                    "unexpected {} message inside an open code block",
                    role_name(other)
                )));
            }
        }
    }

    let anchor = slice
        .iter()
        .rposition(|m| matches!(m, ClientMessage::Assistant { tool_calls, .. } if tool_calls.is_empty()))
        .map(|i| i + 1)
        .unwrap_or(0);
    let slice = &slice[anchor..];

    let mut tool_state = Vec::new();
    for (index, msg) in slice.iter().enumerate() {
        let ClientMessage::Assistant { tool_calls, .. } = msg else {
            continue;
        };
        for call in tool_calls {
            let answer = slice[index + 1..].iter().find_map(|m| match m {
                ClientMessage::Tool {
                    tool_call_id,
                    content,
                } if *tool_call_id == call.id => Some(content),
                _ => None,
            });
            tool_state.push(match answer {
                Some(content) => {
                    let result: Value = serde_json::from_str(content).map_err(|e| {
                        Error::protocol(format!(
                            "tool message for call '{}' is not valid JSON: {e}",
                            call.id
                        ))
                    })?;
                    ToolCallState::Resolved {
                        id: call.id.clone(),
                        result,
                    }
                }
                None => ToolCallState::Pending {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments_value().map_err(|_| {
                        Error::protocol(format!(
                            "tool call '{}' carries non-JSON arguments",
                            call.id
                        ))
                    })?,
                },
            });
        }
    }

    Ok(tool_state)
}

/// Project a client history onto the model-visible view.
///
/// A small two-state machine: in `normal`, standard messages pass through
/// and a `code` message becomes an assistant `run_typescript` tool call; in
/// `in-code`, the interior tool dialogue is absorbed until the matching
/// `code-result` closes the block as a tool message.
pub fn client_to_model(messages: &[ClientMessage]) -> Result<Vec<ChatMessage>> {
    enum State {
        Normal,
        InCode(String),
    }

    let mut out = Vec::new();
    let mut state = State::Normal;

    for msg in messages {
        match &state {
            State::Normal => match msg {
                ClientMessage::System { content } => out.push(ChatMessage::system(content)),
                ClientMessage::User { content } => out.push(ChatMessage::user(content)),
                ClientMessage::Assistant {
                    content,
                    tool_calls,
                } => {
                    if let Some(call) = tool_calls.iter().find(|c| c.function.name != RUN_TYPESCRIPT)
                    {
                        return Err(Error::protocol(format!(
                            "assistant tool call to '{}' outside a code block",
                            call.function.name
                        )));
                    }
                    if tool_calls.is_empty() {
                        out.push(ChatMessage {
                            role: "assistant".to_string(),
                            content: content.clone(),
                            tool_calls: None,
                            tool_call_id: None,
                        });
                    } else {
                        out.push(ChatMessage::assistant_calls(
                            content.clone(),
                            tool_calls.clone(),
                        ));
                    }
                }
                ClientMessage::Code { id, code } => {
                    let arguments = serde_json::json!({ "code": code });
                    out.push(ChatMessage::assistant_calls(
                        None,
                        vec![ToolCall::function(id, RUN_TYPESCRIPT, &arguments)],
                    ));
                    state = State::InCode(id.clone());
                }
                ClientMessage::Tool { tool_call_id, .. } => {
                    return Err(Error::protocol(format!(
                        "tool message '{tool_call_id}' outside a code block"
                    )));
                }
                ClientMessage::CodeResult { id, .. } => {
                    return Err(Error::protocol(format!(
                        "code-result '{id}' without a preceding code block"
                    )));
                }
            },
            State::InCode(open_id) => match msg {
                ClientMessage::CodeResult { id, result } if id == open_id => {
                    out.push(ChatMessage::tool(id, serde_json::to_string(result)?));
                    state = State::Normal;
                }
                ClientMessage::CodeResult { id, .. } => {
                    return Err(Error::protocol(format!(
                        "code-result '{id}' does not match open code block '{open_id}'"
                    )));
                }
                // The interior tool dialogue is invisible to the model.
                ClientMessage::Assistant { .. } | ClientMessage::Tool { .. } => {}
                ClientMessage::Code { id, .. } => {
                    return Err(Error::protocol(format!(
                        "code block '{id}' opened while '{open_id}' is still open"
                    )));
                }
                ClientMessage::System { .. } | ClientMessage::User { .. } => {
                    return Err(Error::protocol(format!(
                        "{} message inside open code block '{open_id}'",
                        role_name(msg)
                    )));
                }
            },
        }
    }

    Ok(out)
}

/// Project a model reply onto the client view: a `run_typescript` tool call
/// becomes a `code` message, anything else a plain assistant message.
pub fn assistant_to_client(msg: &ChatMessage) -> Result<ClientMessage> {
    if let Some(call) = msg.calls().iter().find(|c| c.function.name == RUN_TYPESCRIPT) {
        let arguments = call.function.arguments_value().map_err(|_| {
            Error::protocol(format!(
                "run_typescript call '{}' carries non-JSON arguments",
                call.id
            ))
        })?;
        let code = arguments
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::protocol(format!(
                    "run_typescript call '{}' is missing a code string",
                    call.id
                ))
            })?;
        return Ok(ClientMessage::code(&call.id, code));
    }

    Ok(ClientMessage::Assistant {
        content: msg.content.clone(),
        tool_calls: Vec::new(),
    })
}

/// Surface a partial evaluation to the client: one assistant message whose
/// tool calls are exactly the pending entries. Resolved and rejected
/// entries are omitted; the history already reports them.
pub fn pending_to_client(tool_state: &[ToolCallState]) -> ClientMessage {
    let tool_calls = tool_state
        .iter()
        .filter_map(|entry| match entry {
            ToolCallState::Pending {
                id,
                name,
                arguments,
            } => Some(ToolCall::function(id, name, arguments)),
            _ => None,
        })
        .collect();
    ClientMessage::assistant_calls(tool_calls)
}

fn role_name(msg: &ClientMessage) -> &'static str {
    match msg {
        ClientMessage::System { .. } => "system",
        ClientMessage::User { .. } => "user",
        ClientMessage::Assistant { .. } => "assistant",
        ClientMessage::Tool { .. } => "tool",
        ClientMessage::Code { .. } => "code",
        ClientMessage::CodeResult { .. } => "code-result",
    }
}
