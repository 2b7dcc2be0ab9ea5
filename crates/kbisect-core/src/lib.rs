//! kbisect core: domain model, error taxonomy, and aggregation policy.
//!
//! This crate has no dependency on the store, remote execution, or bisect
//! driver crates — it is the dependency root the rest of the workspace
//! builds on.

pub mod aggregator;
pub mod domain;
pub mod error;
pub mod telemetry;

pub use domain::{
    Host, HostOutcome, HostVerdict, Iteration, LogBlob, LogKind, Metadata, Phase,
    PowerControllerKind, Session, SessionStatus, TestMode, Verdict,
};
pub use error::{KbisectError, Result};
