//! Protocol monitor.
//!
//! Tracks whether the agent follows the clarify-before-tools protocol:
//! on the first turn of a conversation it should ask one clarifying
//! question before invoking tools. Classification is advisory only; it
//! never alters turn execution.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Compliant,
    Violated,
    /// Asked a question and invoked tools in the same turn.
    Partial,
}

impl Classification {
    /// Partial counts as a violation in the metrics rollup: the point
    /// of the protocol is to wait for the answer, not just to ask.
    pub fn is_violation(self) -> bool {
        matches!(self, Classification::Violated | Classification::Partial)
    }
}

/// Classify one turn against the clarify-before-tools protocol.
///
/// Deterministic in its three inputs. The protocol only applies to the
/// first turn; later turns are compliant regardless of tool use.
pub fn classify(turn_index: usize, asked_question: bool, tool_count: usize) -> Classification {
    if turn_index > 0 {
        return Classification::Compliant;
    }
    if tool_count == 0 {
        // A direct answer or a clarifying question; both are fine.
        return Classification::Compliant;
    }
    if asked_question {
        Classification::Partial
    } else {
        Classification::Violated
    }
}

/// Extract the clarifying question from assistant text, if any.
///
/// Heuristic: the first line containing `?` whose trimmed length
/// exceeds 10 characters. Kept isolated here so a structured signal
/// from the engine can replace it without touching the orchestrator.
pub fn clarifying_question(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.contains('?') && line.len() > 10)
        .map(str::to_string)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    Failed,
}

/// Immutable record of one finished turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub turn_index: usize,
    pub timestamp: DateTime<Utc>,
    /// Names of the tools invoked during the turn, in request order.
    pub tools_invoked: Vec<String>,
    pub asked_clarifying_question: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarifying_question: Option<String>,
    pub elapsed_ms: u64,
    pub outcome: TurnOutcome,
    pub classification: Classification,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Monitor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Clone, Serialize)]
struct SessionStats {
    turn_count: u64,
    tool_invocation_count: u64,
    violation_count: u64,
    total_elapsed_ms: u64,
    tools_used: Vec<String>,
}

/// Collects turn records and per-session rollups.
#[derive(Default)]
pub struct ProtocolMonitor {
    records: RwLock<Vec<TurnRecord>>,
    sessions: RwLock<HashMap<String, SessionStats>>,
}

impl ProtocolMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished turn and fold it into the session rollup.
    pub fn record(&self, record: TurnRecord) {
        if record.classification.is_violation() {
            tracing::warn!(
                session_id = %record.session_id,
                turn_index = record.turn_index,
                tools = ?record.tools_invoked,
                "clarification protocol violated: tools invoked on first turn"
            );
        }

        {
            let mut sessions = self.sessions.write();
            let stats = sessions.entry(record.session_id.clone()).or_default();
            stats.turn_count += 1;
            stats.tool_invocation_count += record.tools_invoked.len() as u64;
            stats.total_elapsed_ms += record.elapsed_ms;
            if record.classification.is_violation() {
                stats.violation_count += 1;
            }
            for name in &record.tools_invoked {
                if !stats.tools_used.contains(name) {
                    stats.tools_used.push(name.clone());
                }
            }
        }

        self.records.write().push(record);
    }

    /// Rollup for one session, or `None` if no turn finished in it yet.
    pub fn session_metrics(&self, session_id: &str) -> Option<Value> {
        let sessions = self.sessions.read();
        let stats = sessions.get(session_id)?;
        Some(session_summary(session_id, stats))
    }

    /// Rollups for all sessions plus global totals.
    pub fn all_metrics(&self) -> Value {
        let sessions = self.sessions.read();
        let per_session: serde_json::Map<String, Value> = sessions
            .iter()
            .map(|(id, stats)| (id.clone(), session_summary(id, stats)))
            .collect();

        let total_turns: u64 = sessions.values().map(|s| s.turn_count).sum();
        let violations: u64 = sessions.values().map(|s| s.violation_count).sum();

        serde_json::json!({
            "sessions": per_session,
            "summary": {
                "total_sessions": sessions.len(),
                "total_turns": total_turns,
                "protocol_violations": violations,
            }
        })
    }

    /// Full snapshot: rollups plus every turn record.
    ///
    /// The result is an opaque document; consumers must not rely on its
    /// internal layout staying stable.
    pub fn export(&self) -> Value {
        let sessions = self.sessions.read();
        let records = self.records.read();

        let per_session: serde_json::Map<String, Value> = sessions
            .iter()
            .map(|(id, stats)| (id.clone(), session_summary(id, stats)))
            .collect();

        let total_tools: u64 = sessions.values().map(|s| s.tool_invocation_count).sum();
        let violations: u64 = sessions.values().map(|s| s.violation_count).sum();

        serde_json::json!({
            "sessions": per_session,
            "records": *records,
            "summary": {
                "total_sessions": sessions.len(),
                "total_turns": records.len(),
                "total_tool_invocations": total_tools,
                "protocol_violations": violations,
            }
        })
    }
}

fn session_summary(session_id: &str, stats: &SessionStats) -> Value {
    let avg_ms = if stats.turn_count > 0 {
        stats.total_elapsed_ms as f64 / stats.turn_count as f64
    } else {
        0.0
    };
    serde_json::json!({
        "session_id": session_id,
        "turn_count": stats.turn_count,
        "tool_invocation_count": stats.tool_invocation_count,
        "avg_response_time_ms": avg_ms,
        "tools_used": stats.tools_used,
        "protocol_violations": stats.violation_count,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_turns_always_compliant() {
        assert_eq!(classify(1, false, 5), Classification::Compliant);
        assert_eq!(classify(3, true, 2), Classification::Compliant);
    }

    #[test]
    fn first_turn_without_tools_is_compliant() {
        // Clarifying question.
        assert_eq!(classify(0, true, 0), Classification::Compliant);
        // Direct answer, no question.
        assert_eq!(classify(0, false, 0), Classification::Compliant);
    }

    #[test]
    fn first_turn_tools_without_question_is_violated() {
        assert_eq!(classify(0, false, 1), Classification::Violated);
        assert_eq!(classify(0, false, 3), Classification::Violated);
    }

    #[test]
    fn question_plus_tools_is_partial_and_counts_as_violation() {
        let c = classify(0, true, 2);
        assert_eq!(c, Classification::Partial);
        assert!(c.is_violation());
        assert!(!Classification::Compliant.is_violation());
    }

    #[test]
    fn clarifying_question_picks_first_long_question_line() {
        let text = "Sure.\nOk?\nWhat market segment are you targeting?\nAnother question here?";
        assert_eq!(
            clarifying_question(text).as_deref(),
            Some("What market segment are you targeting?")
        );
    }

    #[test]
    fn clarifying_question_ignores_short_or_questionless_text() {
        assert_eq!(clarifying_question("Done."), None);
        // "?" present but the line is too short to be a real question.
        assert_eq!(clarifying_question("Ok?"), None);
    }

    fn record(session: &str, turn: usize, tools: &[&str], elapsed: u64) -> TurnRecord {
        let classification = classify(turn, false, tools.len());
        TurnRecord {
            session_id: session.into(),
            turn_index: turn,
            timestamp: Utc::now(),
            tools_invoked: tools.iter().map(|s| s.to_string()).collect(),
            asked_clarifying_question: false,
            clarifying_question: None,
            elapsed_ms: elapsed,
            outcome: TurnOutcome::Completed,
            classification,
        }
    }

    #[test]
    fn session_rollup_accumulates() {
        let monitor = ProtocolMonitor::new();
        monitor.record(record("s1", 0, &["analyze_product"], 100));
        monitor.record(record("s1", 1, &["analyze_product", "calculate_positioning_readiness"], 300));

        let metrics = monitor.session_metrics("s1").unwrap();
        assert_eq!(metrics["turn_count"], 2);
        assert_eq!(metrics["tool_invocation_count"], 3);
        assert_eq!(metrics["avg_response_time_ms"], 200.0);
        // First turn had tools with no question.
        assert_eq!(metrics["protocol_violations"], 1);
        // tools_used is deduplicated.
        assert_eq!(metrics["tools_used"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn unknown_session_has_no_metrics() {
        let monitor = ProtocolMonitor::new();
        assert!(monitor.session_metrics("ghost").is_none());
    }

    #[test]
    fn export_includes_records_and_totals() {
        let monitor = ProtocolMonitor::new();
        monitor.record(record("s1", 0, &[], 50));
        monitor.record(record("s2", 0, &["analyze_product"], 80));

        let snapshot = monitor.export();
        assert_eq!(snapshot["summary"]["total_sessions"], 2);
        assert_eq!(snapshot["summary"]["total_turns"], 2);
        assert_eq!(snapshot["summary"]["total_tool_invocations"], 1);
        assert_eq!(snapshot["summary"]["protocol_violations"], 1);
        assert_eq!(snapshot["records"].as_array().unwrap().len(), 2);
    }
}
