//! Session: one run of a bisection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a [`Session`].
///
/// Transitions: `Running` -> `Halted` (host lost after recovery exhaustion),
/// `Running` -> `Completed` (BisectDriver reports done), `Running` ->
/// `Aborted` (explicit user request). Both `Halted` and `Completed` are
/// non-terminal from the CLI's point of view only in that `Halted` can
/// resume back into `Running`; `Completed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Halted,
    Completed,
    Aborted,
}

impl SessionStatus {
    /// A session in a terminal state never resumes; at most one non-terminal
    /// session may exist per working copy.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Aborted)
    }
}

/// One run of a bisection: a good/bad commit pair and everything produced
/// while narrowing between them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub good_ref: String,
    pub bad_ref: String,
    pub created_at: DateTime<Utc>,
    pub terminal_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    /// Set only once `status == Completed`.
    pub first_bad: Option<String>,
    /// The configuration in effect when the session was created, frozen so
    /// a later config edit cannot change the meaning of an in-flight run.
    pub config_snapshot: serde_json::Value,
}

impl Session {
    pub fn new(good_ref: String, bad_ref: String, config_snapshot: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            good_ref,
            bad_ref,
            created_at: Utc::now(),
            terminal_at: None,
            status: SessionStatus::Running,
            first_bad: None,
            config_snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(!SessionStatus::Halted.is_terminal());
    }

    #[test]
    fn new_session_starts_running_with_no_first_bad() {
        let s = Session::new("v6.1".into(), "v6.6".into(), serde_json::json!({}));
        assert_eq!(s.status, SessionStatus::Running);
        assert!(s.first_bad.is_none());
        assert!(s.terminal_at.is_none());
    }
}
