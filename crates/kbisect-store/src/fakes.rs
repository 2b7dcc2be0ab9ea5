//! In-memory fake of [`Store`] for fast tests that don't need a SurrealDB
//! engine (coordinator/aggregator unit tests, CLI dry runs).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use kbisect_core::{Host, HostOutcome, Iteration, LogBlob, LogKind, Metadata, Session, SessionStatus, Verdict};

use crate::error::{StoreError, StoreResult};
use crate::store_trait::{SessionSummary, Store};

#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, (Session, Vec<Host>)>>,
    iterations: Mutex<HashMap<Uuid, Iteration>>,
    host_outcomes: Mutex<HashMap<(Uuid, String), HostOutcome>>,
    log_blobs: Mutex<HashMap<Uuid, LogBlob>>,
    metadata: Mutex<HashMap<String, Metadata>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_session(
        &self,
        good_ref: &str,
        bad_ref: &str,
        config_snapshot: serde_json::Value,
        hosts: &[Host],
    ) -> StoreResult<Session> {
        if self.latest_non_terminal_session().await?.is_some() {
            return Err(StoreError::InvalidTransition(
                "a non-terminal session already exists for this working copy".into(),
            ));
        }
        let session = Session::new(good_ref.to_string(), bad_ref.to_string(), config_snapshot);
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, (session.clone(), hosts.to_vec()));
        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> StoreResult<Session> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|(s, _)| s.clone())
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))
    }

    async fn latest_non_terminal_session(&self) -> StoreResult<Option<Session>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .values()
            .map(|(s, _)| s)
            .filter(|s| !s.status.is_terminal())
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn update_session_status(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        result_commit: Option<String>,
    ) -> StoreResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let (session, _) = sessions
            .get_mut(&session_id)
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;
        session.status = status;
        if status.is_terminal() || status == SessionStatus::Halted {
            session.terminal_at = Some(chrono::Utc::now());
        }
        if status == SessionStatus::Completed {
            session.first_bad = result_commit;
        }
        Ok(())
    }

    async fn session_hosts(&self, session_id: Uuid) -> StoreResult<Vec<Host>> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|(_, hosts)| hosts.clone())
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))
    }

    async fn create_iteration(
        &self,
        session_id: Uuid,
        index: u32,
        sha: &str,
        message: &str,
    ) -> StoreResult<Iteration> {
        let iteration = Iteration::new(session_id, index, sha.to_string(), message.to_string());
        self.iterations
            .lock()
            .unwrap()
            .insert(iteration.id, iteration.clone());
        Ok(iteration)
    }

    async fn get_iteration(&self, iteration_id: Uuid) -> StoreResult<Iteration> {
        self.iterations
            .lock()
            .unwrap()
            .get(&iteration_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("iteration {iteration_id}")))
    }

    async fn latest_iteration(&self, session_id: Uuid) -> StoreResult<Option<Iteration>> {
        let iterations = self.iterations.lock().unwrap();
        Ok(iterations
            .values()
            .filter(|it| it.session_id == session_id)
            .max_by_key(|it| it.index)
            .cloned())
    }

    async fn update_iteration(
        &self,
        iteration_id: Uuid,
        verdict: Verdict,
        error_summary: Option<String>,
    ) -> StoreResult<()> {
        let mut iterations = self.iterations.lock().unwrap();
        let iteration = iterations
            .get_mut(&iteration_id)
            .ok_or_else(|| StoreError::NotFound(format!("iteration {iteration_id}")))?;
        iteration.close(verdict, error_summary);
        Ok(())
    }

    async fn put_host_outcome(&self, outcome: HostOutcome) -> StoreResult<()> {
        let key = (outcome.iteration_id, outcome.host_id.clone());
        self.host_outcomes.lock().unwrap().insert(key, outcome);
        Ok(())
    }

    async fn host_outcomes(&self, iteration_id: Uuid) -> StoreResult<Vec<HostOutcome>> {
        let outcomes = self.host_outcomes.lock().unwrap();
        Ok(outcomes
            .values()
            .filter(|o| o.iteration_id == iteration_id)
            .cloned()
            .collect())
    }

    async fn put_log_blob(
        &self,
        iteration_id: Uuid,
        host_id: &str,
        kind: LogKind,
        bytes: &[u8],
        exit_code: Option<i32>,
    ) -> StoreResult<Uuid> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let checksum = hex::encode(hasher.finalize());

        let blob = LogBlob {
            id: Uuid::new_v4(),
            iteration_id,
            host_id: host_id.to_string(),
            kind,
            size: bytes.len() as u64,
            // The in-memory fake skips the zlib round trip entirely — it
            // exists to make coordinator/aggregator tests fast, not to
            // exercise the compression path.
            compressed_bytes: bytes.to_vec(),
            exit_code,
            checksum,
        };
        let blob_id = blob.id;
        self.log_blobs.lock().unwrap().insert(blob_id, blob);
        Ok(blob_id)
    }

    async fn get_log_blob(&self, blob_id: Uuid) -> StoreResult<Vec<u8>> {
        self.log_blobs
            .lock()
            .unwrap()
            .get(&blob_id)
            .map(|b| b.compressed_bytes.clone())
            .ok_or_else(|| StoreError::NotFound(format!("log blob {blob_id}")))
    }

    async fn put_metadata(
        &self,
        session_id: Uuid,
        iteration_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> StoreResult<String> {
        let metadata = Metadata::new(session_id, iteration_id, payload);
        let hash = metadata.content_hash.clone();
        self.metadata
            .lock()
            .unwrap()
            .entry(hash.clone())
            .or_insert(metadata);
        Ok(hash)
    }

    async fn get_metadata(&self, content_hash: &str) -> StoreResult<serde_json::Value> {
        self.metadata
            .lock()
            .unwrap()
            .get(content_hash)
            .map(|m| m.payload.clone())
            .ok_or_else(|| StoreError::NotFound(format!("metadata {content_hash}")))
    }

    async fn summary(&self, session_id: Uuid) -> StoreResult<SessionSummary> {
        let session = self.get_session(session_id).await?;
        let iterations = self.iterations(session_id).await?;

        let mut good_count = 0;
        let mut bad_count = 0;
        let mut skip_count = 0;
        let mut pending_count = 0;
        for it in &iterations {
            match it.verdict {
                Verdict::Good => good_count += 1,
                Verdict::Bad => bad_count += 1,
                Verdict::Skip => skip_count += 1,
                Verdict::Pending => pending_count += 1,
            }
        }

        Ok(SessionSummary {
            session,
            iteration_count: iterations.len() as u32,
            good_count,
            bad_count,
            skip_count,
            pending_count,
        })
    }

    async fn iterations(&self, session_id: Uuid) -> StoreResult<Vec<Iteration>> {
        let iterations = self.iterations.lock().unwrap();
        let mut v: Vec<Iteration> = iterations
            .values()
            .filter(|it| it.session_id == session_id)
            .cloned()
            .collect();
        v.sort_by_key(|it| it.index);
        Ok(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str) -> Host {
        Host {
            id: id.to_string(),
            address: "10.0.0.1".into(),
            remote_user: "root".into(),
            kernel_source_path: "/src/linux".into(),
            power_controller: kbisect_core::PowerControllerKind::ShellReboot,
            test_mode: kbisect_core::TestMode::Default,
            test_script_path: None,
            base_config_path: None,
        }
    }

    #[tokio::test]
    async fn create_session_rejects_second_non_terminal() {
        let store = MemoryStore::new();
        store
            .create_session("v6.1", "v6.6", serde_json::json!({}), &[host("h1")])
            .await
            .unwrap();
        let err = store
            .create_session("v6.1", "v6.6", serde_json::json!({}), &[host("h1")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn metadata_is_deduplicated_by_content() {
        let store = MemoryStore::new();
        let session = store
            .create_session("v6.1", "v6.6", serde_json::json!({}), &[host("h1")])
            .await
            .unwrap();
        let payload = serde_json::json!({"kernel": "6.1.0"});
        let h1 = store
            .put_metadata(session.id, None, payload.clone())
            .await
            .unwrap();
        let h2 = store.put_metadata(session.id, None, payload).await.unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.metadata.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn host_outcome_put_upserts() {
        let store = MemoryStore::new();
        let session = store
            .create_session("v6.1", "v6.6", serde_json::json!({}), &[host("h1")])
            .await
            .unwrap();
        let iteration = store
            .create_iteration(session.id, 1, "abc123", "subject")
            .await
            .unwrap();

        let mut outcome = HostOutcome::new(iteration.id, "h1");
        outcome.verdict = kbisect_core::HostVerdict::Fail;
        store.put_host_outcome(outcome).await.unwrap();

        let mut outcome2 = HostOutcome::new(iteration.id, "h1");
        outcome2.verdict = kbisect_core::HostVerdict::Pass;
        store.put_host_outcome(outcome2).await.unwrap();

        let outcomes = store.host_outcomes(iteration.id).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].verdict, kbisect_core::HostVerdict::Pass);
    }

    #[tokio::test]
    async fn summary_counts_verdicts() {
        let store = MemoryStore::new();
        let session = store
            .create_session("v6.1", "v6.6", serde_json::json!({}), &[host("h1")])
            .await
            .unwrap();
        let it1 = store
            .create_iteration(session.id, 1, "sha1", "m1")
            .await
            .unwrap();
        let it2 = store
            .create_iteration(session.id, 2, "sha2", "m2")
            .await
            .unwrap();
        store
            .update_iteration(it1.id, Verdict::Good, None)
            .await
            .unwrap();
        store
            .update_iteration(it2.id, Verdict::Bad, Some("h1 failed".into()))
            .await
            .unwrap();

        let summary = store.summary(session.id).await.unwrap();
        assert_eq!(summary.iteration_count, 2);
        assert_eq!(summary.good_count, 1);
        assert_eq!(summary.bad_count, 1);
    }
}
