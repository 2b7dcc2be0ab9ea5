//! HostOutcome: the per-host result of one iteration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The HostRunner phase reached before the outcome was finalized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Build,
    Install,
    Boot,
    Test,
    Done,
}

/// The per-host verdict for one iteration.
///
/// `Unreachable` is special: it may only become `Pass`/`Fail`/`Skip` on
/// session resume, once the host is confirmed reachable again. In every
/// other case it is terminal for that iteration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostVerdict {
    Pass,
    Fail,
    Skip,
    Unreachable,
}

/// Exactly one of these exists per (iteration, host).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostOutcome {
    pub iteration_id: Uuid,
    pub host_id: String,
    pub phase: Phase,
    pub kernel_version: Option<String>,
    pub verdict: HostVerdict,
    /// One of the §7 error kinds, recorded as a stable string tag rather
    /// than the error itself — the outcome is a persisted record, the error
    /// type is not `Serialize`-stable across versions.
    pub error_kind: Option<String>,
    pub build_log_ref: Option<Uuid>,
    pub console_log_ref: Option<Uuid>,
}

impl HostOutcome {
    pub fn new(iteration_id: Uuid, host_id: impl Into<String>) -> Self {
        Self {
            iteration_id,
            host_id: host_id.into(),
            phase: Phase::Build,
            kernel_version: None,
            verdict: HostVerdict::Skip,
            error_kind: None,
            build_log_ref: None,
            console_log_ref: None,
        }
    }

    /// Whether this outcome may still be reclassified on resume (the only
    /// verdict that isn't terminal for its iteration).
    pub fn is_resumable(&self) -> bool {
        self.verdict == HostVerdict::Unreachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_outcome_defaults_to_skip_at_build() {
        let o = HostOutcome::new(Uuid::new_v4(), "h1");
        assert_eq!(o.phase, Phase::Build);
        assert_eq!(o.verdict, HostVerdict::Skip);
    }

    #[test]
    fn only_unreachable_is_resumable() {
        let mut o = HostOutcome::new(Uuid::new_v4(), "h1");
        o.verdict = HostVerdict::Unreachable;
        assert!(o.is_resumable());
        o.verdict = HostVerdict::Fail;
        assert!(!o.is_resumable());
    }
}
