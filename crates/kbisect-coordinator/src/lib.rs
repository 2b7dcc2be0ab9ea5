//! kbisect-coordinator: the single cooperative driver that owns the
//! bisection loop end to end — picking candidates, fanning out to hosts,
//! aggregating, marking the VCS, and handling halt/resume.

mod coordinator;
mod halt_report;

pub use coordinator::{Coordinator, CoordinatorError, LoopOutcome};
pub use halt_report::{HaltReport, UnreachableHost};
