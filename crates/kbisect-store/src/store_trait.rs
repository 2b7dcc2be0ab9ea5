//! The `Store` trait: durable persistence for sessions, iterations,
//! per-host results, compressed logs, and metadata.
//!
//! Every method is individually atomic. A caller that needs the iteration
//! verdict and the VCS mark to land together composes two calls around its
//! own `BisectDriver.mark` per the ordering rule in the design notes
//! (write pending, call VCS mark, write final) — the Store does not know
//! about the VCS.

use async_trait::async_trait;
use uuid::Uuid;

use kbisect_core::{Host, HostOutcome, Iteration, LogKind, Session, SessionStatus, Verdict};

use crate::error::StoreResult;

/// Reporting view over a session's iterations, built from `iterations()` and
/// the hosts configured at session start.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session: Session,
    pub iteration_count: u32,
    pub good_count: u32,
    pub bad_count: u32,
    pub skip_count: u32,
    pub pending_count: u32,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Create a new session. Atomic. Fails with
    /// `StoreError::InvalidTransition` if a non-terminal session already
    /// exists for this working copy (§3 invariant: at most one).
    async fn create_session(
        &self,
        good_ref: &str,
        bad_ref: &str,
        config_snapshot: serde_json::Value,
        hosts: &[Host],
    ) -> StoreResult<Session>;

    /// Fetch a session by id.
    async fn get_session(&self, session_id: Uuid) -> StoreResult<Session>;

    /// The latest non-terminal session for this working copy, if any —
    /// what `start` resumes from.
    async fn latest_non_terminal_session(&self) -> StoreResult<Option<Session>>;

    /// Atomically update a session's status, optionally recording the
    /// first-bad commit (only meaningful when transitioning to `Completed`).
    async fn update_session_status(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        result_commit: Option<String>,
    ) -> StoreResult<()>;

    /// The hosts configured at session creation time, frozen with the
    /// session so a later config edit never changes an in-flight run.
    async fn session_hosts(&self, session_id: Uuid) -> StoreResult<Vec<Host>>;

    /// Create a new iteration. The pair (session_id, index) must be unique.
    async fn create_iteration(
        &self,
        session_id: Uuid,
        index: u32,
        sha: &str,
        message: &str,
    ) -> StoreResult<Iteration>;

    /// Fetch an iteration by id.
    async fn get_iteration(&self, iteration_id: Uuid) -> StoreResult<Iteration>;

    /// The most recently created iteration for a session, if any — used on
    /// resume to find the dangling iteration.
    async fn latest_iteration(&self, session_id: Uuid) -> StoreResult<Option<Iteration>>;

    /// Record the final verdict for an iteration. Atomic.
    async fn update_iteration(
        &self,
        iteration_id: Uuid,
        verdict: Verdict,
        error_summary: Option<String>,
    ) -> StoreResult<()>;

    /// Upsert the outcome for one (iteration, host) pair.
    async fn put_host_outcome(&self, outcome: HostOutcome) -> StoreResult<()>;

    /// All host outcomes recorded for an iteration.
    async fn host_outcomes(&self, iteration_id: Uuid) -> StoreResult<Vec<HostOutcome>>;

    /// Store a log blob's bytes, compressing on the way in. Returns the
    /// blob id to be recorded on the owning `HostOutcome`.
    async fn put_log_blob(
        &self,
        iteration_id: Uuid,
        host_id: &str,
        kind: LogKind,
        bytes: &[u8],
        exit_code: Option<i32>,
    ) -> StoreResult<Uuid>;

    /// Retrieve and decompress a log blob's bytes by id.
    async fn get_log_blob(&self, blob_id: Uuid) -> StoreResult<Vec<u8>>;

    /// Store a metadata payload, deduplicated by content hash. Returns the
    /// content hash as the metadata id — storing the same payload twice
    /// produces one row.
    async fn put_metadata(
        &self,
        session_id: Uuid,
        iteration_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> StoreResult<String>;

    /// Retrieve a metadata payload by content hash.
    async fn get_metadata(&self, content_hash: &str) -> StoreResult<serde_json::Value>;

    /// Reporting summary for a session.
    async fn summary(&self, session_id: Uuid) -> StoreResult<SessionSummary>;

    /// All iterations for a session, ordered by index.
    async fn iterations(&self, session_id: Uuid) -> StoreResult<Vec<Iteration>>;
}
