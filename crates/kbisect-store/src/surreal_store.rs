//! SurrealDB-backed implementation of [`Store`].

use std::io::{Read, Write};

use async_trait::async_trait;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use kbisect_core::{Host, HostOutcome, Iteration, LogBlob, LogKind, Metadata, Session, SessionStatus, Verdict};

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::store_trait::{SessionSummary, Store};

/// A session row with its frozen host list folded in, since SurrealDB has
/// no foreign-key joins the way a relational store would express "hosts
/// configured for session X".
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct SessionRow {
    session: Session,
    hosts: Vec<Host>,
}

pub struct SurrealStore {
    db: Surreal<Any>,
}

impl SurrealStore {
    /// Connect to `mem://` and initialize schema. Used by tests and by the
    /// in-process fast path when no persistence is requested.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to an on-disk SurrealKV store at `path`.
    pub async fn from_path(path: &str) -> StoreResult<Self> {
        Self::connect(&format!("surrealkv://{path}")).await
    }

    async fn connect(url: &str) -> StoreResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect to {url}: {e}")))?;

        db.use_ns("kbisect")
            .use_db("main")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(%url, "store connected");
        Ok(Self { db })
    }

    async fn fetch_session_row(&self, session_id: Uuid) -> StoreResult<SessionRow> {
        let id = session_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM sessions WHERE session.id = $id")
            .bind(("id", id))
            .await?;
        let rows: Vec<SessionRow> = res.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))
    }
}

#[async_trait]
impl Store for SurrealStore {
    #[instrument(skip(self, config_snapshot, hosts))]
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
        let row = SessionRow {
            session: session.clone(),
            hosts: hosts.to_vec(),
        };

        let _created: Option<SessionRow> = self
            .db
            .create("sessions")
            .content(row)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        info!(session_id = %session.id, "session created");
        Ok(session)
    }

    async fn get_session(&self, session_id: Uuid) -> StoreResult<Session> {
        Ok(self.fetch_session_row(session_id).await?.session)
    }

    async fn latest_non_terminal_session(&self) -> StoreResult<Option<Session>> {
        let mut res = self
            .db
            .query("SELECT * FROM sessions WHERE session.status IN ['running', 'halted'] ORDER BY session.created_at DESC LIMIT 1")
            .await?;
        let rows: Vec<SessionRow> = res.take(0)?;
        Ok(rows.into_iter().next().map(|r| r.session))
    }

    #[instrument(skip(self))]
    async fn update_session_status(
        &self,
        session_id: Uuid,
        status: SessionStatus,
        result_commit: Option<String>,
    ) -> StoreResult<()> {
        let mut row = self.fetch_session_row(session_id).await?;
        row.session.status = status;
        if status.is_terminal() || status == SessionStatus::Halted {
            row.session.terminal_at = Some(chrono::Utc::now());
        }
        if status == SessionStatus::Completed {
            row.session.first_bad = result_commit;
        }

        let id = session_id.to_string();
        self.db
            .query("UPDATE sessions SET session = $session WHERE session.id = $id")
            .bind(("session", row.session))
            .bind(("id", id))
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        debug!(session_id = %session_id, ?status, "session status updated");
        Ok(())
    }

    async fn session_hosts(&self, session_id: Uuid) -> StoreResult<Vec<Host>> {
        Ok(self.fetch_session_row(session_id).await?.hosts)
    }

    #[instrument(skip(self, message))]
    async fn create_iteration(
        &self,
        session_id: Uuid,
        index: u32,
        sha: &str,
        message: &str,
    ) -> StoreResult<Iteration> {
        let iteration = Iteration::new(session_id, index, sha.to_string(), message.to_string());
        let _created: Option<Iteration> = self
            .db
            .create("iterations")
            .content(iteration.clone())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        info!(session_id = %session_id, index, sha, "iteration created");
        Ok(iteration)
    }

    async fn get_iteration(&self, iteration_id: Uuid) -> StoreResult<Iteration> {
        let id = iteration_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM iterations WHERE id = $id")
            .bind(("id", id))
            .await?;
        let rows: Vec<Iteration> = res.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("iteration {iteration_id}")))
    }

    async fn latest_iteration(&self, session_id: Uuid) -> StoreResult<Option<Iteration>> {
        let sid = session_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM iterations WHERE session_id = $sid ORDER BY index DESC LIMIT 1")
            .bind(("sid", sid))
            .await?;
        let rows: Vec<Iteration> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self, error_summary))]
    async fn update_iteration(
        &self,
        iteration_id: Uuid,
        verdict: Verdict,
        error_summary: Option<String>,
    ) -> StoreResult<()> {
        let mut iteration = self.get_iteration(iteration_id).await?;
        iteration.close(verdict, error_summary);

        let id = iteration_id.to_string();
        self.db
            .query("UPDATE iterations CONTENT $iteration WHERE id = $id")
            .bind(("iteration", iteration))
            .bind(("id", id))
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        debug!(iteration_id = %iteration_id, ?verdict, "iteration closed");
        Ok(())
    }

    #[instrument(skip(self, outcome))]
    async fn put_host_outcome(&self, outcome: HostOutcome) -> StoreResult<()> {
        let iteration_id = outcome.iteration_id.to_string();
        let host_id = outcome.host_id.clone();

        let mut res = self
            .db
            .query("SELECT * FROM host_outcomes WHERE iteration_id = $iid AND host_id = $hid")
            .bind(("iid", iteration_id.clone()))
            .bind(("hid", host_id.clone()))
            .await?;
        let existing: Vec<HostOutcome> = res.take(0)?;

        if existing.is_empty() {
            let _created: Option<HostOutcome> = self
                .db
                .create("host_outcomes")
                .content(outcome)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        } else {
            self.db
                .query("UPDATE host_outcomes SET phase = $phase, kernel_version = $kv, verdict = $verdict, error_kind = $ek, build_log_ref = $blr, console_log_ref = $clr WHERE iteration_id = $iid AND host_id = $hid")
                .bind(("phase", outcome.phase))
                .bind(("kv", outcome.kernel_version))
                .bind(("verdict", outcome.verdict))
                .bind(("ek", outcome.error_kind))
                .bind(("blr", outcome.build_log_ref))
                .bind(("clr", outcome.console_log_ref))
                .bind(("iid", iteration_id))
                .bind(("hid", host_id))
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }
        Ok(())
    }

    async fn host_outcomes(&self, iteration_id: Uuid) -> StoreResult<Vec<HostOutcome>> {
        let iid = iteration_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM host_outcomes WHERE iteration_id = $iid")
            .bind(("iid", iid))
            .await?;
        Ok(res.take(0)?)
    }

    #[instrument(skip(self, bytes))]
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

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(bytes)
            .map_err(|e| StoreError::Query(format!("compression failed: {e}")))?;
        let compressed_bytes = encoder
            .finish()
            .map_err(|e| StoreError::Query(format!("compression failed: {e}")))?;

        let blob = LogBlob {
            id: Uuid::new_v4(),
            iteration_id,
            host_id: host_id.to_string(),
            kind,
            size: bytes.len() as u64,
            compressed_bytes,
            exit_code,
            checksum,
        };
        let blob_id = blob.id;

        let _created: Option<LogBlob> = self
            .db
            .create("log_blobs")
            .content(blob)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        debug!(%blob_id, size = bytes.len(), "log blob stored");
        Ok(blob_id)
    }

    async fn get_log_blob(&self, blob_id: Uuid) -> StoreResult<Vec<u8>> {
        let id = blob_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM log_blobs WHERE id = $id")
            .bind(("id", id))
            .await?;
        let rows: Vec<LogBlob> = res.take(0)?;
        let blob = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("log blob {blob_id}")))?;

        let mut decoder = ZlibDecoder::new(blob.compressed_bytes.as_slice());
        let mut out = Vec::with_capacity(blob.size as usize);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| StoreError::Query(format!("decompression failed: {e}")))?;

        let mut hasher = Sha256::new();
        hasher.update(&out);
        let checksum = hex::encode(hasher.finalize());
        if checksum != blob.checksum {
            return Err(StoreError::Integrity {
                what: format!("log blob {blob_id}"),
                expected: blob.checksum,
                actual: checksum,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self, payload))]
    async fn put_metadata(
        &self,
        session_id: Uuid,
        iteration_id: Option<Uuid>,
        payload: serde_json::Value,
    ) -> StoreResult<String> {
        let metadata = Metadata::new(session_id, iteration_id, payload);
        let hash = metadata.content_hash.clone();

        let mut res = self
            .db
            .query("SELECT * FROM metadata WHERE content_hash = $hash")
            .bind(("hash", hash.clone()))
            .await?;
        let existing: Vec<Metadata> = res.take(0)?;

        if existing.is_empty() {
            let _created: Option<Metadata> = self
                .db
                .create("metadata")
                .content(metadata)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }
        Ok(hash)
    }

    async fn get_metadata(&self, content_hash: &str) -> StoreResult<serde_json::Value> {
        let hash = content_hash.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM metadata WHERE content_hash = $hash")
            .bind(("hash", hash))
            .await?;
        let rows: Vec<Metadata> = res.take(0)?;
        rows.into_iter()
            .next()
            .map(|m| m.payload)
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
        let sid = session_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM iterations WHERE session_id = $sid ORDER BY index ASC")
            .bind(("sid", sid))
            .await?;
        Ok(res.take(0)?)
    }
}
