//! Reduces per-host outcomes for one iteration into a single commit verdict.
//!
//! The policy is conservative and fail-fast: any `unreachable` outcome
//! halts the session rather than guess; otherwise a concrete failure beats
//! an inconclusive skip, which beats a clean pass.

use crate::domain::{HostOutcome, HostVerdict, Verdict};

/// The result of reducing an iteration's [`HostOutcome`]s.
///
/// `Pending` is distinct from [`Verdict::Pending`]: it carries the subset
/// of hosts that were unreachable, which the Coordinator needs to compose
/// the halt report (§7, "user-visible behavior").
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateResult {
    Verdict(Verdict),
    Pending { unreachable_hosts: Vec<String> },
}

/// Reduce one iteration's outcomes to a verdict or a halt.
///
/// Order of precedence, most to least severe:
/// 1. any `unreachable` -> halt (pending, no VCS mark).
/// 2. any `fail` -> `bad`.
/// 3. any `skip` -> `skip`.
/// 4. all `pass` -> `good`.
pub fn reduce(outcomes: &[HostOutcome]) -> AggregateResult {
    let unreachable: Vec<String> = outcomes
        .iter()
        .filter(|o| o.verdict == HostVerdict::Unreachable)
        .map(|o| o.host_id.clone())
        .collect();
    if !unreachable.is_empty() {
        return AggregateResult::Pending {
            unreachable_hosts: unreachable,
        };
    }

    if outcomes.iter().any(|o| o.verdict == HostVerdict::Fail) {
        return AggregateResult::Verdict(Verdict::Bad);
    }

    if outcomes.iter().any(|o| o.verdict == HostVerdict::Skip) {
        return AggregateResult::Verdict(Verdict::Skip);
    }

    AggregateResult::Verdict(Verdict::Good)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn outcome(host_id: &str, verdict: HostVerdict) -> HostOutcome {
        let mut o = HostOutcome::new(Uuid::new_v4(), host_id);
        o.verdict = verdict;
        o
    }

    #[test]
    fn all_pass_is_good() {
        let outcomes = vec![outcome("h1", HostVerdict::Pass), outcome("h2", HostVerdict::Pass)];
        assert_eq!(reduce(&outcomes), AggregateResult::Verdict(Verdict::Good));
    }

    #[test]
    fn any_unreachable_halts_regardless_of_others() {
        let outcomes = vec![
            outcome("h1", HostVerdict::Pass),
            outcome("h2", HostVerdict::Unreachable),
        ];
        match reduce(&outcomes) {
            AggregateResult::Pending { unreachable_hosts } => {
                assert_eq!(unreachable_hosts, vec!["h2".to_string()]);
            }
            other => panic!("expected Pending, got {other:?}"),
        }
    }

    #[test]
    fn fail_beats_skip() {
        let outcomes = vec![outcome("h1", HostVerdict::Fail), outcome("h2", HostVerdict::Skip)];
        assert_eq!(reduce(&outcomes), AggregateResult::Verdict(Verdict::Bad));
    }

    #[test]
    fn skip_beats_pass() {
        let outcomes = vec![outcome("h1", HostVerdict::Pass), outcome("h2", HostVerdict::Skip)];
        assert_eq!(reduce(&outcomes), AggregateResult::Verdict(Verdict::Skip));
    }

    #[test]
    fn single_host_fail_is_bad() {
        let outcomes = vec![outcome("h1", HostVerdict::Fail)];
        assert_eq!(reduce(&outcomes), AggregateResult::Verdict(Verdict::Bad));
    }
}
