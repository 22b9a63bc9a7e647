//! Deterministic replay sandbox for model-emitted tool programs.
//!
//! Each [`Sandbox::evaluate`] call boots a fresh QuickJS runtime, installs
//! one interceptor per declared tool, runs the program's `async function
//! main()`, and classifies what happened. Tool invocations never execute
//! anything: the interceptor consults the replay cursor and either replays
//! a result the client already supplied or records a new pending call and
//! aborts the pass through a sentinel rejection.
//!
//! Because the entire tool-state travels in the client history, the engine
//! keeps no state between calls; replaying the same `(code, tool_state)`
//! pair always reproduces the same outcome, up to minted call ids.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, trace};
use rquickjs::function::Func;
use rquickjs::{AsyncContext, AsyncRuntime, CatchResultExt, CaughtError, Ctx, async_with};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::types::{CodeOutcome, EvalOutcome, SandboxConfig, ToolCallState, ToolDefinition};
use crate::{Error, Result};

/// Marker key on the rejection value that aborts a replay pass when the
/// program calls a tool whose result is not yet known.
const PENDING_CALL_MARKER: &str = "__pending_tool_call__";

/// Marker key on rejection values reporting a violated replay invariant
/// (e.g. a pending entry in the input state). These classify as ordinary
/// runtime errors, never as new pending work.
const VIOLATION_MARKER: &str = "__replay_violation__";

/// Shared mutable state of one replay pass.
///
/// Mutated by the host bridge while the sandbox runs: the dispatcher
/// advances the cursor and grows the output, the completion hook records
/// the settlement of `main()`.
struct ReplayState {
    input: Vec<ToolCallState>,
    output: Vec<ToolCallState>,
    cursor: usize,
    fresh_pending: usize,
    settled: Option<Settlement>,
}

enum Settlement {
    Success(Value),
    Error(Value),
}

impl ReplayState {
    fn new(input: Vec<ToolCallState>) -> Self {
        Self {
            input,
            output: Vec::new(),
            cursor: 0,
            fresh_pending: 0,
            settled: None,
        }
    }
}

/// The replay sandbox.
///
/// Holds only configuration; every evaluation gets a fresh, isolated
/// QuickJS heap that is destroyed on all exit paths. The heap is capped by
/// [`SandboxConfig::memory_limit`], and an optional interrupt-based
/// wall-clock cap abandons runaway evaluations.
///
/// # Example
///
/// ```no_run
/// use toolscript::{Sandbox, SandboxConfig, ToolDefinition};
/// use serde_json::json;
///
/// # async fn example() -> toolscript::Result<()> {
/// let sandbox = Sandbox::new(SandboxConfig::default());
/// let tools = vec![ToolDefinition::new(
///     "webSearch",
///     "Search the web",
///     json!({"query": "string"}),
/// )];
///
/// let code = r#"async function main() {
///     return await webSearch({ query: "news today" });
/// }"#;
///
/// // First pass: records one pending webSearch call.
/// let outcome = sandbox.evaluate(code, &[], &tools).await?;
/// # let _ = outcome;
/// # Ok(())
/// # }
/// ```
pub struct Sandbox {
    config: SandboxConfig,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl Sandbox {
    /// Creates a sandbox with the given resource configuration.
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Run one replay pass of `code` against `tool_state`.
    ///
    /// The input tool-state is read-only; the returned
    /// [`EvalOutcome::Pending`] state is a prefix-extension of it. Runtime
    /// failures inside the program are *data* ([`CodeOutcome::Error`]), not
    /// errors of this call.
    ///
    /// # Errors
    ///
    /// [`Error::Engine`] when the QuickJS runtime cannot be bootstrapped or
    /// the host bridge cannot be installed; [`Error::InvalidInput`] when a
    /// tool name is not a valid identifier.
    pub async fn evaluate(
        &self,
        code: &str,
        tool_state: &[ToolCallState],
        tools: &[ToolDefinition],
    ) -> Result<EvalOutcome> {
        for tool in tools {
            if !is_js_identifier(&tool.name) {
                return Err(Error::invalid_input(format!(
                    "tool name '{}' is not a valid identifier",
                    tool.name
                )));
            }
        }

        let runtime = AsyncRuntime::new()
            .map_err(|e| Error::engine(format!("failed to create runtime: {e}")))?;
        runtime.set_memory_limit(self.config.memory_limit).await;

        let timed_out = Arc::new(AtomicBool::new(false));
        if let Some(limit) = self.config.timeout {
            let deadline = Instant::now() + limit;
            let flag = Arc::clone(&timed_out);
            runtime
                .set_interrupt_handler(Some(Box::new(move || {
                    if Instant::now() >= deadline {
                        flag.store(true, Ordering::SeqCst);
                        true
                    } else {
                        false
                    }
                })))
                .await;
        }

        let context = AsyncContext::full(&runtime)
            .await
            .map_err(|e| Error::engine(format!("failed to create context: {e}")))?;

        let state = Arc::new(Mutex::new(ReplayState::new(tool_state.to_vec())));
        let script = assemble_script(code, tools);

        // The bridge failure and any synchronous throw are passed out through
        // slots; the async_with! body itself returns nothing.
        let bridge_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let sync_error: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        {
            let state = Arc::clone(&state);
            let bridge_error = Arc::clone(&bridge_error);
            let sync_error = Arc::clone(&sync_error);
            async_with!(context => |ctx| {
                if let Err(e) = install_bridge(&ctx, &state) {
                    let mut slot = bridge_error.lock().expect("bridge error slot");
                    *slot = Some(e.to_string());
                    return;
                }
                if let Err(err) = ctx.eval::<(), _>(script).catch(&ctx) {
                    let mut slot = sync_error.lock().expect("sync error slot");
                    *slot = Some(caught_to_value(&ctx, &err));
                }
            })
            .await;
        }

        if let Some(reason) = bridge_error.lock().expect("bridge error slot").take() {
            return Err(Error::engine(format!(
                "failed to install host bridge: {reason}"
            )));
        }

        // Drain the microtask queue so every interceptor promise settles and
        // the trailer can report the settlement of main().
        runtime.idle().await;

        // The bridge closures inside the context still hold clones of the
        // state Arc; take the data out under the lock instead of unwrapping.
        let state = {
            let mut guard = state.lock().expect("replay state lock");
            std::mem::replace(&mut *guard, ReplayState::new(Vec::new()))
        };
        let sync_error = sync_error.lock().expect("sync error slot").take();
        let timed_out = timed_out.load(Ordering::SeqCst);

        let outcome = classify(state, sync_error, timed_out);
        match &outcome {
            EvalOutcome::Completed(CodeOutcome::Success { .. }) => {
                debug!("replay pass finished: success")
            }
            EvalOutcome::Completed(CodeOutcome::Error { .. }) => {
                debug!("replay pass finished: runtime error")
            }
            EvalOutcome::Pending { tool_state } => debug!(
                "replay pass finished: {} pending tool call(s)",
                tool_state.iter().filter(|e| e.is_pending()).count()
            ),
        }
        Ok(outcome)
    }
}

/// A tool name must be installable as a bare global function.
fn is_js_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn mint_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Compose the script: interceptor shims, the model's code verbatim, and a
/// trailer that invokes `main()` and routes its settlement to the host.
fn assemble_script(code: &str, tools: &[ToolDefinition]) -> String {
    let mut script = String::from(
        "\"use strict\";\n\
         globalThis.__lift = (instruction) => {\n\
           const d = JSON.parse(instruction);\n\
           return d.kind === \"resolve\" ? Promise.resolve(d.value) : Promise.reject(d.value);\n\
         };\n",
    );
    for tool in tools {
        script.push_str(&format!(
            "globalThis.{name} = (input) => __lift(__host_dispatch(\"{name}\", \
             JSON.stringify(input === undefined ? null : input)));\n",
            name = tool.name
        ));
    }
    script.push_str(code);
    script.push_str(
        "\n;(async () => {\n\
           try {\n\
             const value = await main();\n\
             __host_complete(JSON.stringify({ status: \"success\", value: value === undefined ? null : value }));\n\
           } catch (thrown) {\n\
             const value = thrown instanceof Error\n\
               ? { name: thrown.name, message: thrown.message }\n\
               : (thrown === undefined ? null : thrown);\n\
             let payload;\n\
             try {\n\
               payload = JSON.stringify({ status: \"error\", value });\n\
             } catch (_) {\n\
               payload = JSON.stringify({ status: \"error\", value: String(thrown) });\n\
             }\n\
             __host_complete(payload);\n\
           }\n\
         })();\n",
    );
    script
}

/// Register the two host globals the shims and trailer call into.
fn install_bridge<'js>(ctx: &Ctx<'js>, state: &Arc<Mutex<ReplayState>>) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    let dispatch_state = Arc::clone(state);
    globals.set(
        "__host_dispatch",
        Func::from(move |name: String, args: String| -> String {
            let arguments: Value = serde_json::from_str(&args).unwrap_or(Value::Null);
            let mut state = dispatch_state.lock().expect("replay state lock");
            advance_cursor(&mut state, &name, arguments).to_string()
        }),
    )?;

    let complete_state = Arc::clone(state);
    globals.set(
        "__host_complete",
        Func::from(move |payload: String| {
            let mut state = complete_state.lock().expect("replay state lock");
            if state.settled.is_some() {
                return;
            }
            state.settled = Some(match serde_json::from_str::<Value>(&payload) {
                Ok(v) => {
                    let value = v.get("value").cloned().unwrap_or(Value::Null);
                    if v.get("status").and_then(Value::as_str) == Some("success") {
                        Settlement::Success(value)
                    } else {
                        Settlement::Error(value)
                    }
                }
                Err(_) => Settlement::Error(json!({
                    "name": "Error",
                    "message": "unserializable settlement payload",
                })),
            });
        }),
    )?;

    Ok(())
}

/// The replay cursor: decide how one interceptor call settles.
///
/// Consumes `input[cursor]` when present (resolved → resolve, rejected →
/// reject); past the end, records a new pending entry and rejects with the
/// sentinel. A pending *input* entry is an invariant violation: the cursor
/// does not advance, so every further call in the pass sees the same
/// violation rather than consuming entries past it.
fn advance_cursor(state: &mut ReplayState, name: &str, arguments: Value) -> Value {
    match state.input.get(state.cursor).cloned() {
        None => {
            state.cursor += 1;
            let id = mint_call_id();
            trace!("interceptor: new pending call {id} to {name}");
            state.output.push(ToolCallState::Pending {
                id: id.clone(),
                name: name.to_string(),
                arguments,
            });
            state.fresh_pending += 1;
            instruction("reject", pending_sentinel(&id))
        }
        Some(ToolCallState::Resolved { id, result }) => {
            state.cursor += 1;
            trace!("interceptor: replaying resolved call {id}");
            state.output.push(ToolCallState::Resolved {
                id,
                result: result.clone(),
            });
            instruction("resolve", result)
        }
        Some(ToolCallState::Rejected { id, error }) => {
            state.cursor += 1;
            trace!("interceptor: replaying rejected call {id}");
            state.output.push(ToolCallState::Rejected {
                id,
                error: error.clone(),
            });
            instruction("reject", error)
        }
        Some(ToolCallState::Pending { id, .. }) => {
            // Inputs must contain only settled entries; the cursor stays
            // pinned on the violating entry.
            instruction("reject", violation_sentinel(&id))
        }
    }
}

fn instruction(kind: &str, value: Value) -> Value {
    json!({ "kind": kind, "value": value })
}

fn pending_sentinel(id: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(PENDING_CALL_MARKER.to_string(), Value::Bool(true));
    map.insert("id".to_string(), Value::String(id.to_string()));
    Value::Object(map)
}

fn violation_sentinel(id: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(
        VIOLATION_MARKER.to_string(),
        Value::String("pending entry in replay input".to_string()),
    );
    map.insert("id".to_string(), Value::String(id.to_string()));
    Value::Object(map)
}

/// Classify the settled pass.
///
/// Success settlements win unconditionally. An error settlement is a new
/// round of pending work only when it carries the sentinel marker *and*
/// this pass actually minted pending entries; every other error settlement
/// (programmer bugs, replayed client errors the program didn't catch,
/// violated replay invariants) is a runtime error. No settlement at all
/// means the script threw synchronously, timed out, or never settled
/// `main()`.
fn classify(state: ReplayState, sync_error: Option<Value>, timed_out: bool) -> EvalOutcome {
    match state.settled {
        Some(Settlement::Success(data)) => EvalOutcome::Completed(CodeOutcome::Success { data }),
        Some(Settlement::Error(value)) => {
            if value.get(PENDING_CALL_MARKER).is_some() && state.fresh_pending > 0 {
                EvalOutcome::Pending {
                    tool_state: state.output,
                }
            } else {
                EvalOutcome::Completed(CodeOutcome::Error { error: value })
            }
        }
        None => {
            let error = if timed_out {
                json!({ "name": "Error", "message": "evaluation timed out" })
            } else {
                sync_error.unwrap_or_else(
                    || json!({ "name": "Error", "message": "main() never settled" }),
                )
            };
            EvalOutcome::Completed(CodeOutcome::Error { error })
        }
    }
}

/// Normalize a caught QuickJS error to a plain JSON value.
fn caught_to_value<'js>(ctx: &Ctx<'js>, err: &CaughtError<'js>) -> Value {
    match err {
        CaughtError::Exception(exc) => {
            let name: Option<String> = exc
                .as_object()
                .get::<_, Option<String>>("name")
                .ok()
                .flatten();
            let message = exc.message().unwrap_or_else(|| err.to_string());
            json!({
                "name": name.unwrap_or_else(|| "Error".to_string()),
                "message": message,
            })
        }
        CaughtError::Error(e) => json!({ "name": "Error", "message": e.to_string() }),
        CaughtError::Value(val) => value_to_json(ctx, val.clone()),
    }
}

/// Convert a JS value to JSON via `JSON.stringify`; unserializable values
/// collapse to null.
fn value_to_json<'js>(ctx: &Ctx<'js>, val: rquickjs::Value<'js>) -> Value {
    if val.is_null() || val.is_undefined() {
        return Value::Null;
    }
    match ctx.json_stringify(val) {
        Ok(Some(js_str)) => match js_str.to_string() {
            Ok(text) => serde_json::from_str(&text).unwrap_or(Value::Null),
            Err(_) => Value::Null,
        },
        _ => Value::Null,
    }
}
