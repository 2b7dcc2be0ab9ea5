//! An in-memory bisection over a fixed commit list, for coordinator tests
//! that should not shell out to `git`.

use std::sync::Mutex;

use kbisect_core::Verdict;

use crate::driver::{Candidate, DriverError, DriverResult};

struct State {
    commits: Vec<(String, String)>,
    started: bool,
    lo: usize,
    hi: usize,
    pending: Option<usize>,
}

/// Linear-history fake: `commits` must be ordered oldest (index 0, the
/// `good` end) to newest (last index, the `bad` end).
pub struct FakeBisectDriver {
    state: Mutex<State>,
}

impl FakeBisectDriver {
    pub fn new(commits: Vec<(String, String)>) -> Self {
        let hi = commits.len().saturating_sub(1);
        Self {
            state: Mutex::new(State {
                commits,
                started: false,
                lo: 0,
                hi,
                pending: None,
            }),
        }
    }
}

impl crate::BisectDriver for FakeBisectDriver {
    fn start(&self, good_ref: &str, bad_ref: &str) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        let lo = state
            .commits
            .iter()
            .position(|(sha, _)| sha == good_ref)
            .ok_or_else(|| DriverError::UnexpectedOutput(format!("unknown good ref {good_ref}")))?;
        let hi = state
            .commits
            .iter()
            .position(|(sha, _)| sha == bad_ref)
            .ok_or_else(|| DriverError::UnexpectedOutput(format!("unknown bad ref {bad_ref}")))?;

        if state.started {
            return Ok(());
        }

        state.lo = lo;
        state.hi = hi;
        state.started = true;
        Ok(())
    }

    fn current(&self) -> DriverResult<Option<Candidate>> {
        let mut state = self.state.lock().unwrap();
        if !state.started || state.hi.saturating_sub(state.lo) <= 1 {
            return Ok(None);
        }
        let mid = state.lo + (state.hi - state.lo) / 2;
        state.pending = Some(mid);
        let (sha, message) = state.commits[mid].clone();
        Ok(Some(Candidate { sha, message }))
    }

    fn mark(&self, verdict: Verdict) -> DriverResult<Option<String>> {
        let mut state = self.state.lock().unwrap();
        let mid = state
            .pending
            .take()
            .ok_or_else(|| DriverError::UnexpectedOutput("mark with no pending candidate".into()))?;

        match verdict {
            Verdict::Good => state.lo = mid,
            Verdict::Bad => state.hi = mid,
            Verdict::Skip => {
                // Narrow the search away from the inconclusive point by
                // treating it as bad for interval purposes, mirroring how
                // git bisect skip nudges toward a neighboring commit.
                state.hi = mid;
            }
            Verdict::Pending => {
                return Err(DriverError::UnexpectedOutput(
                    "cannot mark a pending verdict".into(),
                ))
            }
        }

        if state.hi.saturating_sub(state.lo) <= 1 {
            let (sha, _) = state.commits[state.hi].clone();
            return Ok(Some(sha));
        }
        Ok(None)
    }

    fn reset(&self) -> DriverResult<()> {
        let mut state = self.state.lock().unwrap();
        state.started = false;
        state.pending = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BisectDriver;

    fn commits(n: usize) -> Vec<(String, String)> {
        (0..n)
            .map(|i| (format!("sha{i}"), format!("commit {i}")))
            .collect()
    }

    #[test]
    fn converges_to_the_known_first_bad_index() {
        let driver = FakeBisectDriver::new(commits(8));
        driver.start("sha0", "sha7").unwrap();

        let mut first_bad = None;
        for _ in 0..8 {
            let candidate = match driver.current().unwrap() {
                Some(c) => c,
                None => break,
            };
            let idx: usize = candidate.sha.trim_start_matches("sha").parse().unwrap();
            let verdict = if idx >= 5 { Verdict::Bad } else { Verdict::Good };
            if let Some(done) = driver.mark(verdict).unwrap() {
                first_bad = Some(done);
                break;
            }
        }

        assert_eq!(first_bad.as_deref(), Some("sha5"));
    }
}
