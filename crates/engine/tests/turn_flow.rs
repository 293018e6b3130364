//! End-to-end turn flows against a scripted engine.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc::Receiver;

use pmm_domain::config::TurnConfig;
use pmm_domain::error::{Error, Result};
use pmm_domain::message::{ContentPart, Message, Role, ToolDefinition};
use pmm_engine::sessions::SessionRegistry;
use pmm_engine::tools::{Tool, ToolRegistry};
use pmm_engine::turn::{TurnEvent, TurnOrchestrator};
use pmm_providers::{CompletionEngine, EngineResponse, ScriptedEngine};

// ── test tools ──────────────────────────────────────────────────────

struct EchoTool;

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "echoes its arguments"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn invoke(&self, arguments: Value) -> Result<Value> {
        Ok(arguments)
    }
}

struct FailTool;

#[async_trait::async_trait]
impl Tool for FailTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "always fails"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn invoke(&self, _arguments: Value) -> Result<Value> {
        Err(Error::Tool("deliberate failure".into()))
    }
}

struct SlowTool;

#[async_trait::async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "sleeps before answering"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object"})
    }
    async fn invoke(&self, _arguments: Value) -> Result<Value> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(json!("done"))
    }
}

/// Wraps a scripted engine behind a fixed delay, so a test can signal
/// mid-call (cancellation, for instance) while the engine is in flight.
struct DelayedEngine {
    inner: ScriptedEngine,
    delay: Duration,
}

#[async_trait::async_trait]
impl CompletionEngine for DelayedEngine {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<EngineResponse> {
        tokio::time::sleep(self.delay).await;
        self.inner.complete(messages, tools).await
    }

    fn engine_id(&self) -> &str {
        "delayed"
    }
}

// ── harness ─────────────────────────────────────────────────────────

fn build(engine: Arc<dyn CompletionEngine>, turn: TurnConfig) -> Arc<TurnOrchestrator> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool));
    registry.register(Arc::new(FailTool));
    registry.register(Arc::new(SlowTool));

    let sessions = Arc::new(SessionRegistry::new(turn.system_prompt.clone()));
    Arc::new(TurnOrchestrator::new(
        engine,
        Arc::new(registry),
        sessions,
        &turn,
    ))
}

async fn drain(mut rx: Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn streamed_text(events: &[TurnEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Fragment { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn tool_use(id: &str, name: &str, input: Value) -> ContentPart {
    ContentPart::ToolUse {
        id: id.into(),
        name: name.into(),
        input,
    }
}

// ── direct answers ──────────────────────────────────────────────────

#[tokio::test]
async fn direct_answer_streams_and_completes() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_text("Great question, let me explain positioning.");
    let orch = build(engine.clone(), TurnConfig::default());

    let events = drain(orch.submit_turn("s1", "What is positioning?".into())).await;

    assert_eq!(
        streamed_text(&events),
        "Great question, let me explain positioning."
    );
    assert!(matches!(
        events.last(),
        Some(TurnEvent::Completed { turn_index: 0, .. })
    ));
    assert_eq!(engine.call_count(), 1);

    // History committed: system, user, assistant.
    let session = orch.sessions().get("s1").unwrap();
    let messages = session.read().messages.clone();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(messages[2].role, Role::Assistant);

    let metrics = orch.session_metrics("s1").unwrap();
    assert_eq!(metrics["turn_count"], 1);
    assert_eq!(metrics["protocol_violations"], 0);
}

#[tokio::test]
async fn clarifying_question_is_captured() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_text("Happy to help.\nWho is your target customer right now?");
    let orch = build(engine, TurnConfig::default());

    drain(orch.submit_turn("s1", "Help me position my product".into())).await;

    let snapshot = orch.export_metrics();
    let record = &snapshot["records"][0];
    assert_eq!(record["asked_clarifying_question"], true);
    assert_eq!(
        record["clarifying_question"],
        "Who is your target customer right now?"
    );
    assert_eq!(record["classification"], "compliant");
}

// ── tool rounds ─────────────────────────────────────────────────────

#[tokio::test]
async fn tool_round_runs_once_and_streams_followup() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_blocks(vec![
        ContentPart::Text {
            text: "Let me analyze that.".into(),
        },
        tool_use("c1", "echo", json!({"product": "crm"})),
        tool_use("c2", "echo", json!({"product": "crm2"})),
    ]);
    engine.push_text("Here is my assessment.");
    let orch = build(engine.clone(), TurnConfig::default());

    let events = drain(orch.submit_turn("s1", "Analyze my CRM".into())).await;

    // Calls announced before results, both in request order.
    let calls: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ToolCall { call_id, .. } => Some(call_id.clone()),
            _ => None,
        })
        .collect();
    let results: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::ToolResult {
                call_id, is_error, ..
            } => Some((call_id.clone(), *is_error)),
            _ => None,
        })
        .collect();
    assert_eq!(calls, vec!["c1", "c2"]);
    assert_eq!(results, vec![("c1".into(), false), ("c2".into(), false)]);

    assert_eq!(streamed_text(&events), "Here is my assessment.");
    assert!(matches!(events.last(), Some(TurnEvent::Completed { .. })));
    assert_eq!(engine.call_count(), 2);

    // History: system, user, assistant(requests), 2 tool results,
    // final assistant.
    let session = orch.sessions().get("s1").unwrap();
    let messages = session.read().messages.clone();
    assert_eq!(messages.len(), 6);
    assert_eq!(messages[3].role, Role::Tool);
    assert_eq!(messages[4].role, Role::Tool);
    assert_eq!(messages[5].role, Role::Assistant);

    // First-turn tool use without a question is a violation.
    let metrics = orch.session_metrics("s1").unwrap();
    assert_eq!(metrics["protocol_violations"], 1);
    assert_eq!(metrics["tool_invocation_count"], 2);
}

#[tokio::test]
async fn tool_failure_still_reaches_followup() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_blocks(vec![tool_use("c1", "fail", json!({}))]);
    engine.push_text("The analysis tool hit an error, but here is what I know.");
    let orch = build(engine, TurnConfig::default());

    let events = drain(orch.submit_turn("s1", "Analyze".into())).await;

    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::ToolResult { is_error: true, .. })));
    assert!(matches!(events.last(), Some(TurnEvent::Completed { .. })));
}

#[tokio::test]
async fn unknown_tool_becomes_error_result() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_blocks(vec![tool_use("c1", "no_such_tool", json!({}))]);
    engine.push_text("Could not run that tool.");
    let orch = build(engine, TurnConfig::default());

    let events = drain(orch.submit_turn("s1", "go".into())).await;

    assert!(events.iter().any(|e| matches!(
        e,
        TurnEvent::ToolResult {
            is_error: true,
            tool_name,
            ..
        } if tool_name == "no_such_tool"
    )));
    assert!(matches!(events.last(), Some(TurnEvent::Completed { .. })));
}

// ── failure and rollback ────────────────────────────────────────────

#[tokio::test]
async fn first_call_failure_commits_nothing() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_error("upstream unavailable");
    let orch = build(engine, TurnConfig::default());

    let events = drain(orch.submit_turn("s1", "hello".into())).await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        TurnEvent::Failed {
            partial_output: false,
            ..
        }
    ));

    // Only the seeded system prompt; the user message rolled back.
    let session = orch.sessions().get("s1").unwrap();
    assert_eq!(session.read().messages.len(), 1);

    let snapshot = orch.export_metrics();
    assert_eq!(snapshot["records"][0]["outcome"], "failed");
}

#[tokio::test]
async fn followup_failure_keeps_tool_results() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_blocks(vec![tool_use("c1", "echo", json!({"a": 1}))]);
    engine.push_error("upstream unavailable");
    let orch = build(engine, TurnConfig::default());

    let events = drain(orch.submit_turn("s1", "go".into())).await;
    assert!(matches!(events.last(), Some(TurnEvent::Failed { .. })));

    // system, user, assistant(requests), tool result. No final
    // assistant message.
    let session = orch.sessions().get("s1").unwrap();
    let messages = session.read().messages.clone();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[3].role, Role::Tool);
    assert_ne!(messages.last().unwrap().role, Role::Assistant);
}

#[tokio::test]
async fn cancellation_abandons_tool_results() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_blocks(vec![tool_use("c1", "slow", json!({}))]);
    engine.push_text("never reached");
    let orch = build(engine.clone(), TurnConfig::default());

    let mut rx = orch.submit_turn("s1", "go".into());

    // Wait until the tool call is announced, then cancel while the
    // slow tool is still sleeping.
    loop {
        match rx.recv().await {
            Some(TurnEvent::ToolCall { .. }) => break,
            Some(_) => continue,
            None => panic!("channel closed before tool call"),
        }
    }
    assert!(orch.cancel("s1"));

    let events = drain(rx).await;
    assert!(events
        .iter()
        .all(|e| !matches!(e, TurnEvent::ToolResult { .. })));
    assert!(matches!(
        events.last(),
        Some(TurnEvent::Failed { reason, .. }) if reason == "cancelled"
    ));

    // The tool result never reached the history; no follow-up ran.
    let session = orch.sessions().get("s1").unwrap();
    let messages = session.read().messages.clone();
    assert_eq!(messages.last().unwrap().role, Role::Assistant);
    assert_eq!(messages.len(), 3);
    assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn cancel_during_first_engine_call_commits_nothing() {
    let scripted = ScriptedEngine::new();
    scripted.push_text("too late to matter");
    let engine = Arc::new(DelayedEngine {
        inner: scripted,
        delay: Duration::from_millis(300),
    });
    let orch = build(engine, TurnConfig::default());

    let rx = orch.submit_turn("s1", "hello".into());

    // Cancel while the engine call is still sleeping.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(orch.cancel("s1"));

    let events = drain(rx).await;
    assert!(events
        .iter()
        .all(|e| !matches!(e, TurnEvent::Fragment { .. })));
    assert!(matches!(
        events.last(),
        Some(TurnEvent::Failed { reason, .. }) if reason == "cancelled"
    ));

    // The turn rolled back completely: only the seeded system prompt.
    let session = orch.sessions().get("s1").unwrap();
    assert_eq!(session.read().messages.len(), 1);
    assert_eq!(session.read().turn_count, 0);

    let snapshot = orch.export_metrics();
    assert_eq!(snapshot["records"][0]["outcome"], "failed");
}

#[tokio::test]
async fn cancel_without_running_turn_returns_false() {
    let engine = Arc::new(ScriptedEngine::new());
    let orch = build(engine, TurnConfig::default());
    assert!(!orch.cancel("nobody"));
}

// ── serialization and truncation ────────────────────────────────────

#[tokio::test]
async fn turns_on_one_session_run_in_order() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_text("answer one");
    engine.push_text("answer two");
    let orch = build(engine, TurnConfig::default());

    let rx1 = orch.submit_turn("s1", "one".into());
    let rx2 = orch.submit_turn("s1", "two".into());

    let e1 = drain(rx1).await;
    let e2 = drain(rx2).await;
    assert_eq!(streamed_text(&e1), "answer one");
    assert_eq!(streamed_text(&e2), "answer two");

    let session = orch.sessions().get("s1").unwrap();
    let texts: Vec<_> = session
        .read()
        .messages
        .iter()
        .filter_map(|m| m.content.text().map(str::to_string))
        .collect();
    assert_eq!(
        &texts[1..],
        &["one", "answer one", "two", "answer two"]
    );
}

#[tokio::test]
async fn history_window_evicts_oldest_turns() {
    let engine = Arc::new(ScriptedEngine::new());
    for i in 0..4 {
        engine.push_text(format!("answer {i}"));
    }
    let turn = TurnConfig {
        max_history_messages: 5,
        ..TurnConfig::default()
    };
    let orch = build(engine, turn);

    for i in 0..4 {
        drain(orch.submit_turn("s1", format!("question {i}"))).await;
    }

    let session = orch.sessions().get("s1").unwrap();
    let messages = session.read().messages.clone();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0].role, Role::System);
    assert_eq!(messages.last().unwrap().content.text(), Some("answer 3"));
}

#[tokio::test]
async fn truncation_does_not_rearm_first_turn_protocol() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_text("answer one");
    engine.push_blocks(vec![tool_use("c1", "echo", json!({"a": 1}))]);
    engine.push_text("assessment");

    // Window small enough to evict the first user message entirely.
    let turn = TurnConfig {
        max_history_messages: 3,
        ..TurnConfig::default()
    };
    let orch = build(engine, turn);

    drain(orch.submit_turn("s1", "one".into())).await;
    drain(orch.submit_turn("s1", "two, analyze it".into())).await;

    // The second turn keeps its index even though truncation removed
    // the earlier user message, so its tool use is not a violation.
    let snapshot = orch.export_metrics();
    let records = snapshot["records"].as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["turn_index"], 0);
    assert_eq!(records[1]["turn_index"], 1);
    assert_eq!(records[1]["classification"], "compliant");
    assert_eq!(snapshot["summary"]["protocol_violations"], 0);
}

#[tokio::test]
async fn distinct_sessions_tracked_separately() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_text("a");
    engine.push_text("b");
    let orch = build(engine, TurnConfig::default());

    drain(orch.submit_turn("s1", "hi".into())).await;
    drain(orch.submit_turn("s2", "hi".into())).await;

    assert_eq!(orch.sessions().session_count(), 2);
    let all = orch.all_metrics();
    assert_eq!(all["summary"]["total_sessions"], 2);
    assert_eq!(all["summary"]["total_turns"], 2);
}
