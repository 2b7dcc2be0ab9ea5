//! SurrealDB schema migrations and initialization.
//!
//! Provides initialization functions to set up all tables with proper
//! constraints and indexes. Safe to call multiple times (idempotent).

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StoreResult;

/// Initialize all kbisect tables in SurrealDB.
pub async fn init_schema(db: &Surreal<Any>) -> StoreResult<()> {
    info!("initializing kbisect schema");

    init_sessions_table(db).await?;
    init_iterations_table(db).await?;
    init_host_outcomes_table(db).await?;
    init_log_blobs_table(db).await?;
    init_metadata_table(db).await?;

    info!("kbisect schema initialization complete");
    Ok(())
}

/// `sessions`: at most one non-terminal row per working copy is enforced in
/// application logic (`create_session`), not by a DB constraint — SurrealDB
/// has no partial-unique-index primitive for "status != terminal".
async fn init_sessions_table(db: &Surreal<Any>) -> StoreResult<()> {
    debug!("initializing sessions table");
    let sql = r#"
        DEFINE TABLE sessions SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX idx_session_id ON TABLE sessions COLUMNS session.id UNIQUE;
        DEFINE INDEX idx_session_status ON TABLE sessions COLUMNS session.status;
    "#;
    db.query(sql).await?;
    Ok(())
}

/// `iterations`: (session_id, index) is the natural key.
async fn init_iterations_table(db: &Surreal<Any>) -> StoreResult<()> {
    debug!("initializing iterations table");
    let sql = r#"
        DEFINE TABLE iterations SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX idx_iteration_id ON TABLE iterations COLUMNS id UNIQUE;
        DEFINE INDEX idx_iteration_session_index ON TABLE iterations COLUMNS session_id, index UNIQUE;
    "#;
    db.query(sql).await?;
    Ok(())
}

/// `host_outcomes`: (iteration_id, host_id) is the natural key; `put` upserts.
async fn init_host_outcomes_table(db: &Surreal<Any>) -> StoreResult<()> {
    debug!("initializing host_outcomes table");
    let sql = r#"
        DEFINE TABLE host_outcomes SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX idx_outcome_iteration_host ON TABLE host_outcomes COLUMNS iteration_id, host_id UNIQUE;
    "#;
    db.query(sql).await?;
    Ok(())
}

/// `log_blobs`: owned by the (iteration, host) pair that produced them.
async fn init_log_blobs_table(db: &Surreal<Any>) -> StoreResult<()> {
    debug!("initializing log_blobs table");
    let sql = r#"
        DEFINE TABLE log_blobs SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX idx_blob_id ON TABLE log_blobs COLUMNS id UNIQUE;
        DEFINE INDEX idx_blob_iteration ON TABLE log_blobs COLUMNS iteration_id;
    "#;
    db.query(sql).await?;
    Ok(())
}

/// `metadata`: content-addressed by `content_hash`; `put` is a no-op insert
/// when the hash already exists.
async fn init_metadata_table(db: &Surreal<Any>) -> StoreResult<()> {
    debug!("initializing metadata table");
    let sql = r#"
        DEFINE TABLE metadata SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX idx_metadata_hash ON TABLE metadata COLUMNS content_hash UNIQUE;
    "#;
    db.query(sql).await?;
    Ok(())
}
