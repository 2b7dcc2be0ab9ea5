//! Iteration: one tested commit within a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The aggregate verdict for an iteration, or `Pending` before aggregation
/// (or forever, if the session halted on this iteration).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Good,
    Bad,
    Skip,
    Pending,
}

/// One candidate commit tested across all configured hosts.
///
/// Invariant: `(session_id, index)` is unique; `index` is monotone and dense
/// starting at 1. Created once by the Coordinator when it picks a candidate,
/// mutated only by the Coordinator, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Iteration {
    pub id: Uuid,
    pub session_id: Uuid,
    pub index: u32,
    pub sha: String,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub verdict: Verdict,
    pub error_summary: Option<String>,
}

impl Iteration {
    pub fn new(session_id: Uuid, index: u32, sha: String, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            index,
            sha,
            message,
            started_at: Utc::now(),
            ended_at: None,
            verdict: Verdict::Pending,
            error_summary: None,
        }
    }

    /// Record the final aggregate verdict. Never called twice for the same
    /// iteration in normal operation — the Coordinator's loop closes an
    /// iteration exactly once per the total ordering across iterations.
    pub fn close(&mut self, verdict: Verdict, error_summary: Option<String>) {
        self.verdict = verdict;
        self.error_summary = error_summary;
        self.ended_at = Some(Utc::now());
    }
}
