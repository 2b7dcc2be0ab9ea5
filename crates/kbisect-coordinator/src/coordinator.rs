//! The top-level loop: pick the next candidate, fan out to HostRunners in
//! parallel, aggregate, record, mark, and handle halts and resumes (§4.9).

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use kbisect_bisect::BisectDriver;
use kbisect_core::{aggregator, Host, HostOutcome, HostVerdict, Iteration, LogKind, Session, TestMode, Verdict};
use kbisect_remote::{HostRunner, HostRunnerConfig, RemoteExec};
use kbisect_store::Store;

use crate::halt_report::{HaltReport, UnreachableHost};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("store error: {0}")]
    Store(#[from] kbisect_store::StoreError),
    #[error("bisect driver error: {0}")]
    Driver(#[from] kbisect_bisect::DriverError),
    #[error("host {0} is not configured for this session")]
    UnknownHost(String),
}

/// Outcome of one pass through the Coordinator loop.
pub enum LoopOutcome {
    /// The bisection converged on a first-bad commit.
    Completed { first_bad: String },
    /// A host was lost and recovery was exhausted; the session is now
    /// `Halted` and the operator must intervene before resuming.
    Halted(HaltReport),
}

pub struct Coordinator<D: BisectDriver> {
    store: Arc<dyn Store>,
    driver: D,
    remote: Arc<dyn RemoteExec>,
    hosts: Vec<Host>,
    runner_config: HostRunnerConfig,
}

impl<D: BisectDriver> Coordinator<D> {
    pub fn new(
        store: Arc<dyn Store>,
        driver: D,
        remote: Arc<dyn RemoteExec>,
        hosts: Vec<Host>,
        runner_config: HostRunnerConfig,
    ) -> Self {
        Self {
            store,
            driver,
            remote,
            hosts,
            runner_config,
        }
    }

    /// Entry point: resumes a halted/running session if one exists, else
    /// starts a fresh one, then drives the loop to completion or a halt.
    #[instrument(skip(self))]
    pub async fn run(
        &self,
        good_ref: &str,
        bad_ref: &str,
        config_snapshot: serde_json::Value,
    ) -> Result<LoopOutcome, CoordinatorError> {
        let session = match self.store.latest_non_terminal_session().await? {
            Some(session) => {
                info!(session_id = %session.id, status = ?session.status, "resuming session");
                self.resume(session).await?
            }
            None => {
                let session = self
                    .store
                    .create_session(good_ref, bad_ref, config_snapshot, &self.hosts)
                    .await?;
                self.driver.start(good_ref, bad_ref)?;
                session
            }
        };

        self.drive(&session).await
    }

    /// Resume procedure (§4.9): probe liveness, re-classify the pending
    /// iteration if the session was left `Halted`, reconcile a dangling
    /// iteration left by a clean interrupt of a `Running` session, then hand
    /// control back to the main loop.
    async fn resume(&self, session: Session) -> Result<Session, CoordinatorError> {
        use kbisect_core::SessionStatus;

        match session.status {
            SessionStatus::Halted => self.resume_halted(session).await,
            SessionStatus::Running => self.resume_running(session).await,
            _ => Ok(session),
        }
    }

    async fn resume_halted(&self, session: Session) -> Result<Session, CoordinatorError> {
        use kbisect_core::SessionStatus;

        let hosts = self.store.session_hosts(session.id).await?;
        let mut unreachable = Vec::new();
        for host in &hosts {
            if self.remote.echo(host, Duration::from_secs(10)).await.is_err() {
                unreachable.push(host.id.clone());
            }
        }

        if !unreachable.is_empty() {
            warn!(?unreachable, "hosts still unreachable, cannot resume");
            return Err(CoordinatorError::UnknownHost(unreachable.join(", ")));
        }

        let Some(iteration) = self.store.latest_iteration(session.id).await? else {
            return Ok(session);
        };

        if iteration.verdict != Verdict::Pending {
            return Ok(session);
        }

        let outcomes = self.store.host_outcomes(iteration.id).await?;
        let verdict = reclassify_pending(&hosts, &outcomes);

        self.store
            .update_iteration(iteration.id, verdict, Some("resumed after halt".into()))
            .await?;
        self.driver.mark(verdict)?;

        self.store
            .update_session_status(session.id, SessionStatus::Running, None)
            .await?;

        self.store.get_session(session.id).await.map_err(Into::into)
    }

    /// A session that was `Running` when the process died has no unreachable
    /// hosts to probe — the only thing that can be wrong is a dangling
    /// `Pending` iteration left by a crash on either side of the VCS mark
    /// (§4.9, §8 scenario 5). `drive` writes the mark before the final Store
    /// write, so the crash window is always Store-behind-VCS: if the VCS has
    /// already moved past this iteration's sha, the mark landed and only the
    /// Store write is missing; replay it from the host outcomes already on
    /// disk. If the VCS still hands back the same sha, the mark never
    /// happened and there is nothing to reconcile — `drive` will pick the
    /// candidate back up on its next pass.
    async fn resume_running(&self, session: Session) -> Result<Session, CoordinatorError> {
        let Some(iteration) = self.store.latest_iteration(session.id).await? else {
            return Ok(session);
        };

        if iteration.verdict != Verdict::Pending {
            return Ok(session);
        }

        self.reconcile_dangling_iteration(&iteration).await?;
        Ok(session)
    }

    async fn reconcile_dangling_iteration(
        &self,
        iteration: &Iteration,
    ) -> Result<(), CoordinatorError> {
        let next_candidate = self.driver.current()?;
        let vcs_moved_past = match &next_candidate {
            Some(candidate) => candidate.sha != iteration.sha,
            None => true,
        };

        if !vcs_moved_past {
            return Ok(());
        }

        let outcomes = self.store.host_outcomes(iteration.id).await?;
        let verdict = match aggregator::reduce(&outcomes) {
            aggregator::AggregateResult::Verdict(v) => v,
            aggregator::AggregateResult::Pending { .. } => return Ok(()),
        };

        self.store
            .update_iteration(
                iteration.id,
                verdict,
                Some("reconciled from VCS mark after clean interrupt".into()),
            )
            .await?;
        Ok(())
    }

    async fn drive(&self, session: &Session) -> Result<LoopOutcome, CoordinatorError> {
        let existing = self.store.iterations(session.id).await?;
        let mut index = existing.len() as u32;

        loop {
            let Some(candidate) = self.driver.current()? else {
                self.store
                    .update_session_status(
                        session.id,
                        kbisect_core::SessionStatus::Completed,
                        None,
                    )
                    .await?;
                return Ok(LoopOutcome::Completed {
                    first_bad: session
                        .first_bad
                        .clone()
                        .unwrap_or_else(|| "unknown".into()),
                });
            };

            index += 1;
            let iteration = self
                .store
                .create_iteration(session.id, index, &candidate.sha, &candidate.message)
                .await?;

            let outcomes = self.run_hosts(iteration.id, &candidate.sha).await?;
            for outcome in &outcomes {
                self.store.put_host_outcome(outcome.clone()).await?;
            }

            match aggregator::reduce(&outcomes) {
                aggregator::AggregateResult::Pending { unreachable_hosts } => {
                    self.store
                        .update_session_status(
                            session.id,
                            kbisect_core::SessionStatus::Halted,
                            None,
                        )
                        .await?;
                    let unreachable_hosts = unreachable_hosts
                        .into_iter()
                        .map(|host_id| {
                            let error_kind = outcomes
                                .iter()
                                .find(|o| o.host_id == host_id)
                                .and_then(|o| o.error_kind.clone());
                            UnreachableHost { host_id, error_kind }
                        })
                        .collect();
                    return Ok(LoopOutcome::Halted(HaltReport {
                        session_id: session.id,
                        iteration_id: iteration.id,
                        sha: candidate.sha,
                        unreachable_hosts,
                    }));
                }
                aggregator::AggregateResult::Verdict(verdict) => {
                    let done = self.driver.mark(verdict)?;
                    self.store
                        .update_iteration(iteration.id, verdict, None)
                        .await?;

                    if let Some(first_bad) = done {
                        self.store
                            .update_session_status(
                                session.id,
                                kbisect_core::SessionStatus::Completed,
                                Some(first_bad.clone()),
                            )
                            .await?;
                        return Ok(LoopOutcome::Completed { first_bad });
                    }
                }
            }
        }
    }

    async fn run_hosts(
        &self,
        iteration_id: Uuid,
        sha: &str,
    ) -> Result<Vec<HostOutcome>, CoordinatorError> {
        let futures = self.hosts.iter().map(|host| {
            let remote = self.remote.clone();
            let config = self.runner_config.clone();
            async move {
                let runner = HostRunner::new(host, remote.as_ref(), config);
                let run_outcome = runner.run_iteration(sha).await;

                let mut outcome = HostOutcome::new(iteration_id, host.id.clone());
                outcome.phase = run_outcome.phase_reached;
                outcome.verdict = run_outcome.verdict;
                outcome.kernel_version = run_outcome.kernel_version;
                outcome.error_kind = run_outcome.error_kind;
                (outcome, run_outcome.build_log, run_outcome.console_log)
            }
        });

        let results = join_all(futures).await;
        let mut outcomes = Vec::with_capacity(results.len());
        for (mut outcome, build_log, console_log) in results {
            if let Some(log) = build_log {
                if let Ok(blob_id) = self
                    .store
                    .put_log_blob(
                        iteration_id,
                        &outcome.host_id,
                        LogKind::Build,
                        &log,
                        None,
                    )
                    .await
                {
                    outcome.build_log_ref = Some(blob_id);
                }
            }
            if let Some(log) = console_log {
                if let Ok(blob_id) = self
                    .store
                    .put_log_blob(
                        iteration_id,
                        &outcome.host_id,
                        LogKind::Console,
                        &log,
                        None,
                    )
                    .await
                {
                    outcome.console_log_ref = Some(blob_id);
                }
            }
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

/// Resume-time re-classification (§4.9 step 3): a host left `unreachable`
/// is scored `bad` under default test mode (fail-closed — an untested
/// regression is treated as present) or `skip` under custom test mode
/// (the operator's own script is trusted to say whether absence of a
/// result means anything).
fn reclassify_pending(hosts: &[Host], outcomes: &[HostOutcome]) -> Verdict {
    let mut resolved: Vec<HostOutcome> = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        if outcome.verdict == HostVerdict::Unreachable {
            let host = hosts.iter().find(|h| h.id == outcome.host_id);
            let mut fixed = outcome.clone();
            fixed.verdict = match host.map(|h| &h.test_mode) {
                Some(TestMode::Custom) => HostVerdict::Skip,
                _ => HostVerdict::Fail,
            };
            resolved.push(fixed);
        } else {
            resolved.push(outcome.clone());
        }
    }

    match aggregator::reduce(&resolved) {
        aggregator::AggregateResult::Verdict(v) => v,
        aggregator::AggregateResult::Pending { .. } => Verdict::Bad,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbisect_bisect::FakeBisectDriver;
    use kbisect_core::{Phase, PowerControllerKind};
    use kbisect_store::fakes::MemoryStore;

    struct NoRemote;

    #[async_trait::async_trait]
    impl RemoteExec for NoRemote {
        async fn run(
            &self,
            _host: &Host,
            _op_name: &str,
            _args: &[String],
            _stdin: Option<&[u8]>,
            _timeout_dur: Duration,
        ) -> Result<kbisect_remote::RemoteResult, kbisect_remote::RemoteExecError> {
            unreachable!("not exercised by resume-reconciliation tests")
        }

        async fn echo(&self, _host: &Host, _timeout_dur: Duration) -> Result<(), kbisect_remote::RemoteExecError> {
            unreachable!("not exercised by resume-reconciliation tests")
        }
    }

    fn host(id: &str, test_mode: TestMode) -> Host {
        Host {
            id: id.to_string(),
            address: "127.0.0.1".into(),
            remote_user: "root".into(),
            kernel_source_path: "/src/linux".into(),
            power_controller: PowerControllerKind::ShellReboot,
            test_mode,
            test_script_path: None,
            base_config_path: None,
        }
    }

    fn outcome(host_id: &str, verdict: HostVerdict) -> HostOutcome {
        let mut o = HostOutcome::new(Uuid::new_v4(), host_id.to_string());
        o.phase = Phase::Test;
        o.verdict = verdict;
        o
    }

    #[test]
    fn default_mode_unreachable_reclassifies_to_bad() {
        let hosts = vec![host("h1", TestMode::Default)];
        let outcomes = vec![outcome("h1", HostVerdict::Unreachable)];
        assert_eq!(reclassify_pending(&hosts, &outcomes), Verdict::Bad);
    }

    #[test]
    fn custom_mode_unreachable_reclassifies_to_skip() {
        let hosts = vec![host("h1", TestMode::Custom)];
        let outcomes = vec![outcome("h1", HostVerdict::Unreachable)];
        assert_eq!(reclassify_pending(&hosts, &outcomes), Verdict::Skip);
    }

    #[test]
    fn mixed_hosts_one_unreachable_default_mode_is_bad() {
        let hosts = vec![host("h1", TestMode::Default), host("h2", TestMode::Default)];
        let outcomes = vec![
            outcome("h1", HostVerdict::Pass),
            outcome("h2", HostVerdict::Unreachable),
        ];
        assert_eq!(reclassify_pending(&hosts, &outcomes), Verdict::Bad);
    }

    fn commits(n: usize) -> Vec<(String, String)> {
        (0..n).map(|i| (format!("sha{i}"), format!("commit {i}"))).collect()
    }

    async fn coordinator_fixture() -> (Coordinator<FakeBisectDriver>, Session) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let driver = FakeBisectDriver::new(commits(8));
        driver.start("sha0", "sha7").unwrap();
        let hosts = vec![host("h1", TestMode::Default)];
        let session = store
            .create_session("sha0", "sha7", serde_json::json!({}), &hosts)
            .await
            .unwrap();
        let coordinator = Coordinator::new(
            store,
            driver,
            Arc::new(NoRemote),
            hosts,
            HostRunnerConfig::default(),
        );
        (coordinator, session)
    }

    /// Crash window after `driver.mark` lands but before the final Store
    /// write (§8 scenario 5, Store-behind-VCS): resuming a `Running` session
    /// must replay the Store write from the host outcomes already recorded,
    /// without calling `mark` again.
    #[tokio::test]
    async fn resume_running_reconciles_a_dangling_iteration_once_the_vcs_has_moved_past_it() {
        let (coordinator, session) = coordinator_fixture().await;

        let candidate = coordinator.driver.current().unwrap().unwrap();
        let iteration = coordinator
            .store
            .create_iteration(session.id, 1, &candidate.sha, &candidate.message)
            .await
            .unwrap();
        let mut outcome = HostOutcome::new(iteration.id, "h1");
        outcome.phase = Phase::Test;
        outcome.verdict = HostVerdict::Fail;
        coordinator.store.put_host_outcome(outcome).await.unwrap();

        // The mark landed in the VCS but the process died before the Store
        // write that should have followed it.
        coordinator.driver.mark(Verdict::Bad).unwrap();

        let resumed = coordinator.resume(session).await.unwrap();
        assert_eq!(resumed.status, kbisect_core::SessionStatus::Running);

        let closed = coordinator.store.get_iteration(iteration.id).await.unwrap();
        assert_eq!(closed.verdict, Verdict::Bad);
    }

    /// Crash window before `driver.mark` is ever reached: resuming must leave
    /// the dangling iteration alone and let `drive` pick the same candidate
    /// back up from the VCS.
    #[tokio::test]
    async fn resume_running_leaves_a_dangling_iteration_when_the_vcs_was_never_marked() {
        let (coordinator, session) = coordinator_fixture().await;

        let candidate = coordinator.driver.current().unwrap().unwrap();
        let iteration = coordinator
            .store
            .create_iteration(session.id, 1, &candidate.sha, &candidate.message)
            .await
            .unwrap();

        let resumed = coordinator.resume(session).await.unwrap();
        assert_eq!(resumed.status, kbisect_core::SessionStatus::Running);

        let still_pending = coordinator.store.get_iteration(iteration.id).await.unwrap();
        assert_eq!(still_pending.verdict, Verdict::Pending);

        let next = coordinator.driver.current().unwrap().unwrap();
        assert_eq!(next.sha, candidate.sha);
    }
}
