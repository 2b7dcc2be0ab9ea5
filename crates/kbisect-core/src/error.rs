//! Error taxonomy shared across the bisection control loop.
//!
//! Mirrors the kinds named by the error-handling design: each variant
//! carries whatever contextual identifier (host id, session id, sha) a
//! halt report needs to name the failure precisely.

use uuid::Uuid;

/// The kbisect error taxonomy.
///
/// `config_invalid`, `store_io`, and `vcs_mark_rejected` are fatal wherever
/// they occur. The rest flow into [`crate::domain::HostOutcome`] and are
/// reduced by the [`crate::aggregator`] — they are never propagated raw out
/// of a `HostRunner`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KbisectError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("host {host_id} unreachable: {reason}")]
    RemoteUnreachable { host_id: String, reason: String },

    #[error("authentication failed for host {host_id}: {reason}")]
    RemoteAuth { host_id: String, reason: String },

    #[error("remote channel lost for host {host_id}: {reason}")]
    RemoteChannelLost { host_id: String, reason: String },

    #[error("build failed on host {host_id} for {sha}: {reason}")]
    BuildFailed {
        host_id: String,
        sha: String,
        reason: String,
    },

    #[error("install failed on host {host_id} for {sha}: {reason}")]
    InstallFailed {
        host_id: String,
        sha: String,
        reason: String,
    },

    #[error("host {host_id} fell back to the protected kernel (expected {expected}, observed {observed})")]
    BootFallback {
        host_id: String,
        expected: String,
        observed: String,
    },

    #[error("host {host_id} did not boot within the configured timeout")]
    BootTimeout { host_id: String },

    #[error("power backend failed for host {host_id}: {reason}")]
    PowerBackendFailure { host_id: String, reason: String },

    #[error("test failed on host {host_id}: exit {exit_code}")]
    TestFailed { host_id: String, exit_code: i32 },

    #[error("test timed out on host {host_id}")]
    TestTimeout { host_id: String },

    #[error("store I/O error: {0}")]
    StoreIo(String),

    #[error("VCS rejected mark for session {session_id}: {reason}")]
    VcsMarkRejected { session_id: Uuid, reason: String },
}

impl KbisectError {
    /// Whether this error kind is fatal to the whole session (as opposed to
    /// flowing into a per-host outcome and being absorbed by the aggregator).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KbisectError::ConfigInvalid(_)
                | KbisectError::StoreIo(_)
                | KbisectError::VcsMarkRejected { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, KbisectError>;
