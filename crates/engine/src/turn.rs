//! Turn orchestration.
//!
//! Drives one conversation turn end to end: first engine call, an
//! optional single round of tool execution, the follow-up call, and
//! fragment streaming to the caller. History commits are staged so a
//! failed engine call never leaves a half-written turn behind.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use pmm_domain::config::TurnConfig;
use pmm_domain::message::{Message, MessageContent, ResponseContent, Role};
use pmm_providers::CompletionEngine;

use crate::cancel::CancelMap;
use crate::history;
use crate::normalize;
use crate::protocol::{classify, clarifying_question, ProtocolMonitor, TurnOutcome, TurnRecord};
use crate::session_lock::SessionLockMap;
use crate::sessions::SessionRegistry;
use crate::tools::{ToolExecutor, ToolOutcome, ToolRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events delivered to the caller over the turn's channel.
///
/// Every turn ends with exactly one terminal event, `Completed` or
/// `Failed`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Fragment {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        is_error: bool,
    },
    Completed {
        session_id: String,
        turn_index: usize,
    },
    Failed {
        reason: String,
        partial_output: bool,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs turns against a completion engine, one at a time per session.
pub struct TurnOrchestrator {
    engine: Arc<dyn CompletionEngine>,
    executor: ToolExecutor,
    sessions: Arc<SessionRegistry>,
    monitor: ProtocolMonitor,
    locks: SessionLockMap,
    cancels: CancelMap,
    max_history: usize,
}

impl TurnOrchestrator {
    pub fn new(
        engine: Arc<dyn CompletionEngine>,
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionRegistry>,
        turn: &TurnConfig,
    ) -> Self {
        Self {
            engine,
            executor: ToolExecutor::new(
                registry,
                Duration::from_secs(turn.tool_timeout_secs),
                turn.max_concurrent_tools,
            ),
            sessions,
            monitor: ProtocolMonitor::new(),
            locks: SessionLockMap::new(),
            cancels: CancelMap::new(),
            max_history: turn.max_history_messages,
        }
    }

    /// Submit a user message for the given session.
    ///
    /// Returns immediately with the event channel; the turn runs on a
    /// spawned task. Turns for the same session queue behind each
    /// other; distinct sessions run concurrently. Dropping the
    /// receiver stops fragment delivery but the turn still commits
    /// and gets recorded.
    pub fn submit_turn(
        self: &Arc<Self>,
        session_id: impl Into<String>,
        user_text: String,
    ) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(64);
        let orchestrator = Arc::clone(self);
        let session_id = session_id.into();

        tokio::spawn(async move {
            orchestrator.run_turn(session_id, user_text, tx).await;
        });

        rx
    }

    /// Cancel the running turn for a session, if any.
    pub fn cancel(&self, session_id: &str) -> bool {
        let signalled = self.cancels.cancel(session_id);
        if signalled {
            tracing::info!(session_id = session_id, "turn cancellation requested");
        }
        signalled
    }

    pub fn session_metrics(&self, session_id: &str) -> Option<Value> {
        self.monitor.session_metrics(session_id)
    }

    pub fn all_metrics(&self) -> Value {
        self.monitor.all_metrics()
    }

    pub fn export_metrics(&self) -> Value {
        self.monitor.export()
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn tool_registry(&self) -> &Arc<ToolRegistry> {
        self.executor.registry()
    }

    // ── turn execution ─────────────────────────────────────────────

    async fn run_turn(&self, session_id: String, user_text: String, tx: mpsc::Sender<TurnEvent>) {
        // Serialize turns within the session. The permit is held for
        // the whole turn and releases on drop.
        let _permit = match self.locks.acquire(&session_id).await {
            Ok(p) => p,
            Err(e) => {
                let _ = tx
                    .send(TurnEvent::Failed {
                        reason: e.to_string(),
                        partial_output: false,
                    })
                    .await;
                return;
            }
        };

        let token = self.cancels.register(&session_id);
        self.drive_turn(&session_id, user_text, &tx, &token).await;
        self.cancels.remove(&session_id);
    }

    async fn drive_turn(
        &self,
        session_id: &str,
        user_text: String,
        tx: &mpsc::Sender<TurnEvent>,
        token: &crate::cancel::CancelToken,
    ) {
        let started = Instant::now();
        let session = self.sessions.get_or_create(session_id);

        // Stage a working copy of the history. Nothing commits to the
        // session until the first engine call succeeds. The turn index
        // comes from the session's monotone counter, not from counting
        // messages, which truncation erodes.
        let (turn_index, mut staged) = {
            let s = session.read();
            (s.turn_count, s.messages.clone())
        };
        staged.push(Message::user(user_text));
        history::truncate(&mut staged, self.max_history);

        tracing::info!(session_id = session_id, turn_index, "turn started");

        if token.is_cancelled() {
            self.finish_failed(tx, session_id, turn_index, &[], started, "cancelled")
                .await;
            return;
        }

        let definitions = self.executor.registry().definitions();

        let first = match self.engine.complete(&staged, &definitions).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(session_id = session_id, error = %e, "engine call failed");
                self.finish_failed(tx, session_id, turn_index, &[], started, &e.to_string())
                    .await;
                return;
            }
        };

        // A cancel that landed while the call was in flight must
        // discard the turn before anything commits.
        if token.is_cancelled() {
            self.finish_failed(tx, session_id, turn_index, &[], started, "cancelled")
                .await;
            return;
        }

        let first_text = normalize::extract_text(&first.content);
        let requests = normalize::extract_tool_requests(&first.content);
        let question = clarifying_question(&first_text);

        if requests.is_empty() {
            // Direct answer: commit user message and assistant text,
            // then stream.
            {
                let mut s = session.write();
                s.messages = staged;
                s.messages.push(Message::assistant(first_text.clone()));
                history::truncate(&mut s.messages, self.max_history);
                s.turn_count += 1;
                s.last_active = Utc::now();
            }

            stream_fragments(tx, &first_text).await;
            self.finish_completed(tx, session_id, turn_index, &[], question, started)
                .await;
            return;
        }

        // Tool round. Commit the user message and the assistant
        // message carrying the requests before executing anything, so
        // tool results always have their requesting message on record.
        let fallback_text = history::last_user_text(&staged).map(str::to_string);
        {
            let mut s = session.write();
            s.messages = staged;
            s.messages.push(assistant_message(&first.content));
            history::truncate(&mut s.messages, self.max_history);
            s.turn_count += 1;
            s.last_active = Utc::now();
        }

        for request in &requests {
            let _ = tx
                .send(TurnEvent::ToolCall {
                    call_id: request.call_id.clone(),
                    tool_name: request.tool_name.clone(),
                })
                .await;
        }

        if token.is_cancelled() {
            self.finish_failed(tx, session_id, turn_index, &requests_names(&requests), started, "cancelled")
                .await;
            return;
        }

        let outcomes = self
            .executor
            .execute(&requests, fallback_text.as_deref())
            .await;

        // A cancel that lands while tools run abandons their results.
        if token.is_cancelled() {
            self.finish_failed(tx, session_id, turn_index, &requests_names(&requests), started, "cancelled")
                .await;
            return;
        }

        for outcome in &outcomes {
            let _ = tx
                .send(TurnEvent::ToolResult {
                    call_id: outcome.call_id.clone(),
                    tool_name: outcome.tool_name.clone(),
                    is_error: outcome.is_error,
                })
                .await;
        }

        commit_tool_results(&session, &outcomes, self.max_history);

        if token.is_cancelled() {
            self.finish_failed(tx, session_id, turn_index, &requests_names(&requests), started, "cancelled")
                .await;
            return;
        }

        // Follow-up call over the updated history. One tool round per
        // turn: any tool requests in this response are ignored.
        let snapshot = session.read().messages.clone();
        let followup = match self.engine.complete(&snapshot, &definitions).await {
            Ok(r) => r,
            Err(e) => {
                // Tool results stay committed; only the assistant
                // follow-up is missing.
                tracing::error!(session_id = session_id, error = %e, "follow-up engine call failed");
                self.finish_failed(tx, session_id, turn_index, &requests_names(&requests), started, &e.to_string())
                    .await;
                return;
            }
        };

        let final_text = normalize::extract_text(&followup.content);
        {
            let mut s = session.write();
            s.messages.push(Message::assistant(final_text.clone()));
            history::truncate(&mut s.messages, self.max_history);
            s.last_active = Utc::now();
        }

        stream_fragments(tx, &final_text).await;
        self.finish_completed(
            tx,
            session_id,
            turn_index,
            &requests_names(&requests),
            question,
            started,
        )
        .await;
    }

    async fn finish_completed(
        &self,
        tx: &mpsc::Sender<TurnEvent>,
        session_id: &str,
        turn_index: usize,
        tools_invoked: &[String],
        question: Option<String>,
        started: Instant,
    ) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let classification = classify(turn_index, question.is_some(), tools_invoked.len());

        self.monitor.record(TurnRecord {
            session_id: session_id.to_owned(),
            turn_index,
            timestamp: Utc::now(),
            tools_invoked: tools_invoked.to_vec(),
            asked_clarifying_question: question.is_some(),
            clarifying_question: question,
            elapsed_ms,
            outcome: TurnOutcome::Completed,
            classification,
        });

        tracing::info!(
            session_id = session_id,
            turn_index,
            elapsed_ms,
            tools = tools_invoked.len(),
            "turn completed"
        );

        let _ = tx
            .send(TurnEvent::Completed {
                session_id: session_id.to_owned(),
                turn_index,
            })
            .await;
    }

    async fn finish_failed(
        &self,
        tx: &mpsc::Sender<TurnEvent>,
        session_id: &str,
        turn_index: usize,
        tools_invoked: &[String],
        started: Instant,
        reason: &str,
    ) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let classification = classify(turn_index, false, tools_invoked.len());

        self.monitor.record(TurnRecord {
            session_id: session_id.to_owned(),
            turn_index,
            timestamp: Utc::now(),
            tools_invoked: tools_invoked.to_vec(),
            asked_clarifying_question: false,
            clarifying_question: None,
            elapsed_ms,
            outcome: TurnOutcome::Failed,
            classification,
        });

        tracing::warn!(
            session_id = session_id,
            turn_index,
            elapsed_ms,
            reason = reason,
            "turn failed"
        );

        let _ = tx
            .send(TurnEvent::Failed {
                reason: reason.to_owned(),
                partial_output: false,
            })
            .await;
    }
}

// ── helpers ─────────────────────────────────────────────────────────

/// Build the history form of an assistant response, preserving tool
/// request blocks so tool results stay correlated.
fn assistant_message(content: &ResponseContent) -> Message {
    match content {
        ResponseContent::PlainText(t) => Message::assistant(t.clone()),
        ResponseContent::Blocks(blocks) => Message {
            role: Role::Assistant,
            content: MessageContent::Parts(blocks.clone()),
        },
    }
}

fn requests_names(requests: &[pmm_domain::message::ToolCall]) -> Vec<String> {
    requests.iter().map(|r| r.tool_name.clone()).collect()
}

fn commit_tool_results(
    session: &Arc<parking_lot::RwLock<crate::sessions::Session>>,
    outcomes: &[ToolOutcome],
    max_history: usize,
) {
    let mut s = session.write();
    for outcome in outcomes {
        s.messages.push(Message::tool_result(
            outcome.call_id.clone(),
            outcome.content.clone(),
            outcome.is_error,
        ));
    }
    history::truncate(&mut s.messages, max_history);
    s.last_active = Utc::now();
}

/// Stream text to the caller in whitespace-delimited fragments.
/// Returns false if the receiver went away mid-stream.
async fn stream_fragments(tx: &mpsc::Sender<TurnEvent>, text: &str) -> bool {
    for fragment in text.split_inclusive(char::is_whitespace) {
        let sent = tx
            .send(TurnEvent::Fragment {
                text: fragment.to_owned(),
            })
            .await;
        if sent.is_err() {
            return false;
        }
    }
    true
}
