//! kbisect-bisect: the adapter over the kernel source working copy's
//! bisection primitive.
//!
//! [`GitBisectDriver`] shells out to `git bisect`; [`BisectDriver`] is the
//! trait the coordinator depends on so tests can swap in a fake working
//! copy.

mod driver;
mod fake;

pub use driver::{Candidate, DriverError, DriverResult, GitBisectDriver, is_git_repo};
pub use fake::FakeBisectDriver;

use kbisect_core::Verdict;

/// Narrow adapter over a VCS's bisection primitive (§4.8). `start` is
/// idempotent; `mark` is durable before it returns.
pub trait BisectDriver {
    fn start(&self, good_ref: &str, bad_ref: &str) -> DriverResult<()>;
    fn current(&self) -> DriverResult<Option<Candidate>>;
    fn mark(&self, verdict: Verdict) -> DriverResult<Option<String>>;
    fn reset(&self) -> DriverResult<()>;
}

impl BisectDriver for GitBisectDriver {
    fn start(&self, good_ref: &str, bad_ref: &str) -> DriverResult<()> {
        GitBisectDriver::start(self, good_ref, bad_ref)
    }

    fn current(&self) -> DriverResult<Option<Candidate>> {
        GitBisectDriver::current(self)
    }

    fn mark(&self, verdict: Verdict) -> DriverResult<Option<String>> {
        GitBisectDriver::mark(self, verdict)
    }

    fn reset(&self) -> DriverResult<()> {
        GitBisectDriver::reset(self)
    }
}
