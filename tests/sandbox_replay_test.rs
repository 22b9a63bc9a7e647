//! Replay sandbox integration tests
//!
//! Each test drives real QuickJS evaluations through the public
//! `Sandbox::evaluate` API: single calls, parallel fan-out, sequential
//! chains, loops, post-processing between calls, and failure paths.

use serde_json::{Value, json};
use toolscript::{CodeOutcome, EvalOutcome, Sandbox, SandboxConfig, ToolCallState, ToolDefinition};

fn tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new("webSearch", "Search the web", json!({"query": "string"})),
        ToolDefinition::new("getWeather", "Get the weather", json!({"location": "string"})),
        ToolDefinition::new("summarize", "Summarize a document", json!({"text": "string"})),
    ]
}

fn sandbox() -> Sandbox {
    Sandbox::new(SandboxConfig::default())
}

/// Panics unless the outcome is pending; returns the grown tool-state.
fn expect_pending(outcome: EvalOutcome) -> Vec<ToolCallState> {
    match outcome {
        EvalOutcome::Pending { tool_state } => tool_state,
        other => panic!("expected pending outcome, got {:?}", other),
    }
}

/// Panics unless the outcome is a success; returns the data.
fn expect_success(outcome: EvalOutcome) -> Value {
    match outcome {
        EvalOutcome::Completed(CodeOutcome::Success { data }) => data,
        other => panic!("expected success outcome, got {:?}", other),
    }
}

/// Panics unless the outcome is a runtime error; returns the error value.
fn expect_error(outcome: EvalOutcome) -> Value {
    match outcome {
        EvalOutcome::Completed(CodeOutcome::Error { error }) => error,
        other => panic!("expected error outcome, got {:?}", other),
    }
}

/// Replace every pending entry with a resolved one, pairing results in
/// order.
fn resolve_pending(tool_state: &[ToolCallState], results: &[Value]) -> Vec<ToolCallState> {
    let mut results = results.iter();
    tool_state
        .iter()
        .map(|entry| match entry {
            ToolCallState::Pending { id, .. } => ToolCallState::Resolved {
                id: id.clone(),
                result: results.next().expect("result for each pending").clone(),
            },
            settled => settled.clone(),
        })
        .collect()
}

fn pending_calls(tool_state: &[ToolCallState]) -> Vec<(&str, &Value)> {
    tool_state
        .iter()
        .filter_map(|entry| match entry {
            ToolCallState::Pending {
                name, arguments, ..
            } => Some((name.as_str(), arguments)),
            _ => None,
        })
        .collect()
}

/// Scenario: one awaited call, result post-processed after resolution.
#[tokio::test]
async fn test_single_call_success() {
    let code = r#"async function main() {
        const results = await webSearch({ query: "news today" });
        return results.filter((item) => item.title.includes("news"));
    }"#;
    let sandbox = sandbox();

    let first = sandbox.evaluate(code, &[], &tools()).await.unwrap();
    let state = expect_pending(first);
    assert_eq!(
        pending_calls(&state),
        vec![("webSearch", &json!({"query": "news today"}))]
    );

    let answered = resolve_pending(
        &state,
        &[json!([
            {"title": "news today", "url": "u1"},
            {"title": "news this week", "url": "u2"},
            {"title": "not relevant", "url": "u3"},
        ])],
    );
    let second = sandbox.evaluate(code, &answered, &tools()).await.unwrap();
    assert_eq!(
        expect_success(second),
        json!([
            {"title": "news today", "url": "u1"},
            {"title": "news this week", "url": "u2"},
        ])
    );
}

/// Scenario: Promise.all fan-out records both calls in one pass, in
/// argument order.
#[tokio::test]
async fn test_parallel_fan_out() {
    let code = r#"async function main() {
        const [sport, world] = await Promise.all([
            webSearch({ query: "sport news" }),
            webSearch({ query: "international affaires news" }),
        ]);
        return { sport, world };
    }"#;
    let sandbox = sandbox();

    let state = expect_pending(sandbox.evaluate(code, &[], &tools()).await.unwrap());
    assert_eq!(
        pending_calls(&state),
        vec![
            ("webSearch", &json!({"query": "sport news"})),
            ("webSearch", &json!({"query": "international affaires news"})),
        ]
    );
}

/// Scenario: a sequential chain surfaces one call per replay pass.
#[tokio::test]
async fn test_sequential_chain() {
    let code = r#"async function main() {
        const a = await webSearch({ query: "sport news" });
        const b = await webSearch({ query: "international affaires news" });
        return { a, b };
    }"#;
    let sandbox = sandbox();

    let first = expect_pending(sandbox.evaluate(code, &[], &tools()).await.unwrap());
    assert_eq!(
        pending_calls(&first),
        vec![("webSearch", &json!({"query": "sport news"}))]
    );

    let answered = resolve_pending(&first, &[json!(["goal"])]);
    let second = expect_pending(sandbox.evaluate(code, &answered, &tools()).await.unwrap());
    assert_eq!(second.len(), 2);
    assert!(matches!(second[0], ToolCallState::Resolved { .. }));
    assert_eq!(
        pending_calls(&second),
        vec![("webSearch", &json!({"query": "international affaires news"}))]
    );
    // the input is a strict prefix of the grown state
    assert_eq!(second[0], answered[0]);

    let answered = resolve_pending(&second, &[json!(["summit"])]);
    let third = sandbox.evaluate(code, &answered, &tools()).await.unwrap();
    assert_eq!(
        expect_success(third),
        json!({"a": ["goal"], "b": ["summit"]})
    );
}

/// Scenario: a loop over three locations needs three partial passes, each
/// extending the prior state by exactly one pending entry.
#[tokio::test]
async fn test_sequential_loop() {
    let code = r#"async function main() {
        const locations = ["Paris", "London", "New York"];
        const reports = [];
        for (const location of locations) {
            reports.push(await getWeather({ location }));
        }
        return reports;
    }"#;
    let sandbox = sandbox();

    let mut state: Vec<ToolCallState> = Vec::new();
    for round in 0..3 {
        let outcome = sandbox.evaluate(code, &state, &tools()).await.unwrap();
        let grown = expect_pending(outcome);
        assert_eq!(grown.len(), round + 1, "round {round} grows by one entry");
        assert_eq!(grown[..round], state[..round]);
        state = resolve_pending(&grown, &[json!({"temp": 20 + round})]);
    }

    let final_outcome = sandbox.evaluate(code, &state, &tools()).await.unwrap();
    assert_eq!(
        expect_success(final_outcome),
        json!([{"temp": 20}, {"temp": 21}, {"temp": 22}])
    );
}

/// Scenario: post-processing between tool calls. The filter selects two of
/// three results, so the second pass records exactly two summarize calls.
#[tokio::test]
async fn test_post_processing_between_calls() {
    let code = r#"async function main() {
        const docs = await webSearch({ query: "rust async" });
        const relevant = docs.filter((doc) => doc.tags.includes("async"));
        return await Promise.all(relevant.map((doc) => summarize({ text: doc.text })));
    }"#;
    let sandbox = sandbox();

    let first = expect_pending(sandbox.evaluate(code, &[], &tools()).await.unwrap());
    let answered = resolve_pending(
        &first,
        &[json!([
            {"text": "d1", "tags": ["async"]},
            {"text": "d2", "tags": ["sync"]},
            {"text": "d3", "tags": ["async", "io"]},
        ])],
    );

    let second = expect_pending(sandbox.evaluate(code, &answered, &tools()).await.unwrap());
    assert_eq!(
        pending_calls(&second),
        vec![
            ("summarize", &json!({"text": "d1"})),
            ("summarize", &json!({"text": "d3"})),
        ]
    );
}

/// Scenario: a runtime error in user code is a result, not a system error.
#[tokio::test]
async fn test_runtime_error_in_user_code() {
    let code = r#"async function main() { throw new Error("oops"); }"#;
    let outcome = sandbox().evaluate(code, &[], &tools()).await.unwrap();
    let error = expect_error(outcome);
    assert_eq!(error["message"], "oops");
}

/// Replay determinism: identical fully-settled inputs produce identical
/// terminal outcomes.
#[tokio::test]
async fn test_replay_determinism() {
    let code = r#"async function main() {
        const r = await webSearch({ query: "q" });
        return r.count * 2;
    }"#;
    let sandbox = sandbox();

    let pending = expect_pending(sandbox.evaluate(code, &[], &tools()).await.unwrap());
    let answered = resolve_pending(&pending, &[json!({"count": 21})]);

    let once = sandbox.evaluate(code, &answered, &tools()).await.unwrap();
    let twice = sandbox.evaluate(code, &answered, &tools()).await.unwrap();
    assert_eq!(once, twice);
    assert_eq!(expect_success(once), json!(42));
}

/// Minted call ids are unique across all pending entries of a block.
#[tokio::test]
async fn test_minted_ids_are_unique() {
    let code = r#"async function main() {
        await Promise.all([
            webSearch({ query: "a" }),
            webSearch({ query: "b" }),
            webSearch({ query: "c" }),
        ]);
        return null;
    }"#;
    let state = expect_pending(sandbox().evaluate(code, &[], &tools()).await.unwrap());
    let ids: Vec<&str> = state.iter().map(|e| e.id()).collect();
    let mut deduped = ids.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), ids.len());
}

/// A client-reported tool failure rejects the in-sandbox promise; a program
/// that catches it can still succeed.
#[tokio::test]
async fn test_caught_tool_error_recovers() {
    let code = r#"async function main() {
        try {
            return await webSearch({ query: "q" });
        } catch (err) {
            return { fallback: true, reason: err.message };
        }
    }"#;
    let sandbox = sandbox();

    let pending = expect_pending(sandbox.evaluate(code, &[], &tools()).await.unwrap());
    let state = vec![ToolCallState::Rejected {
        id: pending[0].id().to_string(),
        error: json!({"message": "search backend unavailable"}),
    }];

    let outcome = sandbox.evaluate(code, &state, &tools()).await.unwrap();
    assert_eq!(
        expect_success(outcome),
        json!({"fallback": true, "reason": "search backend unavailable"})
    );
}

/// An uncaught client-reported failure terminates the block with that
/// error.
#[tokio::test]
async fn test_uncaught_tool_error_fails_block() {
    let code = r#"async function main() {
        return await webSearch({ query: "q" });
    }"#;
    let sandbox = sandbox();

    let pending = expect_pending(sandbox.evaluate(code, &[], &tools()).await.unwrap());
    let state = vec![ToolCallState::Rejected {
        id: pending[0].id().to_string(),
        error: json!({"message": "boom"}),
    }];

    let error = expect_error(sandbox.evaluate(code, &state, &tools()).await.unwrap());
    assert_eq!(error["message"], "boom");
}

/// A program without `main` fails the pass with a reference error.
#[tokio::test]
async fn test_missing_main_is_runtime_error() {
    let code = "const x = 1;";
    let error = expect_error(sandbox().evaluate(code, &[], &tools()).await.unwrap());
    assert!(
        error["message"]
            .as_str()
            .unwrap_or_default()
            .contains("main"),
        "unexpected error value: {error}"
    );
}

/// A synchronous top-level throw is captured even though the trailer never
/// reports a settlement.
#[tokio::test]
async fn test_synchronous_top_level_throw() {
    let code = r#"throw new Error("before main");"#;
    let error = expect_error(sandbox().evaluate(code, &[], &tools()).await.unwrap());
    assert_eq!(error["message"], "before main");
}

/// A program awaiting a promise that never settles is reported as an
/// error, not hung.
#[tokio::test]
async fn test_never_settling_main() {
    let code = r#"async function main() {
        await new Promise(() => {});
    }"#;
    let error = expect_error(sandbox().evaluate(code, &[], &tools()).await.unwrap());
    assert_eq!(error["message"], "main() never settled");
}

/// A pending entry in the *input* violates the replay contract and is
/// reported as a runtime error, never as new pending work.
#[tokio::test]
async fn test_pending_input_entry_is_runtime_error() {
    let code = r#"async function main() {
        return await webSearch({ query: "q" });
    }"#;
    let state = vec![ToolCallState::Pending {
        id: "call_stale".to_string(),
        name: "webSearch".to_string(),
        arguments: json!({"query": "q"}),
    }];
    let outcome = sandbox().evaluate(code, &state, &tools()).await.unwrap();
    assert!(matches!(
        outcome,
        EvalOutcome::Completed(CodeOutcome::Error { .. })
    ));
}

/// The memory cap turns a runaway allocation into a runtime error.
#[tokio::test]
async fn test_memory_cap_is_runtime_error() {
    let code = r#"async function main() {
        let s = "x";
        while (true) { s += s; }
    }"#;
    let sandbox = Sandbox::new(SandboxConfig::new().with_memory_limit(4 * 1024 * 1024));
    let outcome = sandbox.evaluate(code, &[], &tools()).await.unwrap();
    assert!(matches!(
        outcome,
        EvalOutcome::Completed(CodeOutcome::Error { .. })
    ));
}

/// The wall-clock cap abandons a busy loop and reports a runtime error.
#[tokio::test]
async fn test_timeout_is_runtime_error() {
    let code = r#"async function main() {
        while (true) {}
    }"#;
    let sandbox = Sandbox::new(
        SandboxConfig::new().with_timeout(std::time::Duration::from_millis(200)),
    );
    let outcome = sandbox.evaluate(code, &[], &tools()).await.unwrap();
    let error = expect_error(outcome);
    let message = error["message"].as_str().unwrap_or_default().to_lowercase();
    assert!(
        message.contains("timed out") || message.contains("interrupted"),
        "unexpected error value: {error}"
    );
}
