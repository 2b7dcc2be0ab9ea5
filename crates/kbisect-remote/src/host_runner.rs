//! `HostRunner`: drives one host through BUILD → INSTALL+REBOOT →
//! WAIT_BOOT → TEST → DONE for a single iteration, with a bounded RECOVER
//! branch when the host goes unreachable (§4.6).

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use kbisect_core::{Host, HostOutcome, HostVerdict, Phase, TestMode};

use crate::boot_monitor::{BootMonitor, BootResult};
use crate::console::{ConsoleBackend, ConsoleCollector};
use crate::power::PowerController;
use crate::remote_exec::RemoteExec;

/// Fixed recovery policy (§4.6): three attempts, thirty seconds apart,
/// before a host is marked unreachable for the iteration.
const RECOVER_ATTEMPTS: u32 = 3;
const RECOVER_SPACING: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct HostRunnerConfig {
    pub build_timeout: Duration,
    pub boot_timeout: Duration,
    pub test_timeout: Duration,
    /// Console backends to try, in order, for the INSTALL→TEST capture
    /// window. Empty means capture is skipped entirely (§4.4: optional).
    pub console_backends: Vec<Arc<dyn ConsoleBackend>>,
}

impl Default for HostRunnerConfig {
    fn default() -> Self {
        Self {
            build_timeout: Duration::from_secs(1800),
            boot_timeout: Duration::from_secs(300),
            test_timeout: Duration::from_secs(600),
            console_backends: Vec::new(),
        }
    }
}

/// Output of driving one host through a single iteration, before the
/// aggregator sees it. `kernel_version` and the log/error-kind fields mirror
/// what the caller should copy onto the stored [`HostOutcome`].
pub struct RunOutcome {
    pub phase_reached: Phase,
    pub verdict: HostVerdict,
    pub kernel_version: Option<String>,
    pub error_kind: Option<String>,
    pub build_log: Option<Vec<u8>>,
    pub console_log: Option<Vec<u8>>,
    pub test_exit_code: Option<i32>,
}

pub struct HostRunner<'a> {
    host: &'a Host,
    remote: &'a dyn RemoteExec,
    config: HostRunnerConfig,
    console: ConsoleCollector,
}

impl<'a> HostRunner<'a> {
    pub fn new(host: &'a Host, remote: &'a dyn RemoteExec, config: HostRunnerConfig) -> Self {
        let console = ConsoleCollector::new(config.console_backends.clone());
        Self {
            host,
            remote,
            config,
            console,
        }
    }

    /// Run one bisection iteration's per-host phase sequence for `sha`.
    ///
    /// The console capture window spans INSTALL+REBOOT through TEST (§4.4,
    /// §4.6): it is started right before the reboot that arms the one-shot
    /// boot entry and stopped once this function has a final outcome,
    /// regardless of which branch produced it.
    #[instrument(skip(self), fields(host_id = %self.host.id, sha))]
    pub async fn run_iteration(&self, sha: &str) -> RunOutcome {
        let (expected_kernel_version, build_log) = match self.build(sha).await {
            Ok(built) => built,
            Err(outcome) => return outcome,
        };

        self.console.start(&self.host.id).await;
        let mut outcome = self.run_after_build(&expected_kernel_version).await;
        outcome.build_log = Some(build_log);
        let captured = self.console.stop().await;
        outcome.console_log = if captured.is_empty() {
            None
        } else {
            Some(captured)
        };
        outcome
    }

    async fn run_after_build(&self, expected_kernel_version: &str) -> RunOutcome {
        if let Err(outcome) = self.install_and_reboot().await {
            return outcome;
        }

        let monitor = BootMonitor::new(self.remote);
        match monitor
            .wait_for_boot(self.host, Some(expected_kernel_version), self.config.boot_timeout)
            .await
        {
            BootResult::BootedExpected { observed } => self.test(Some(observed)).await,
            BootResult::FellBack { observed } => RunOutcome {
                phase_reached: Phase::Boot,
                verdict: self.boot_failure_verdict(),
                kernel_version: Some(observed),
                error_kind: Some("boot_fallback".into()),
                build_log: None,
                console_log: None,
                test_exit_code: None,
            },
            BootResult::Timeout => self.recover().await,
        }
    }

    /// Restricted entry point for the CLI's one-shot `build` mode (§10.5):
    /// runs only the BUILD phase and always returns the captured output,
    /// regardless of whether it succeeded. Not used by `run_iteration`,
    /// which only needs the log on failure.
    #[instrument(skip(self), fields(host_id = %self.host.id, sha))]
    pub async fn build_only(&self, sha: &str) -> RunOutcome {
        let result = self
            .remote
            .run(
                self.host,
                "build_kernel",
                &[sha.to_string()],
                None,
                self.config.build_timeout,
            )
            .await;

        match result {
            Ok(r) => RunOutcome {
                phase_reached: Phase::Build,
                verdict: if r.exit_code == 0 {
                    HostVerdict::Pass
                } else {
                    HostVerdict::Fail
                },
                kernel_version: None,
                error_kind: if r.exit_code == 0 {
                    None
                } else {
                    Some("build_failed".into())
                },
                build_log: Some(r.stdout),
                console_log: None,
                test_exit_code: Some(r.exit_code),
            },
            Err(e) => RunOutcome {
                phase_reached: Phase::Build,
                verdict: HostVerdict::Unreachable,
                kernel_version: None,
                error_kind: Some(format!("{e}")),
                build_log: None,
                console_log: None,
                test_exit_code: None,
            },
        }
    }

    /// Runs BUILD and, on success, returns the kernel version string the op
    /// printed (§6: `build_kernel`'s stdout ends with the new kernel version
    /// string) along with the full captured stdout, which is always stored
    /// as the build log regardless of what later phases do with it.
    async fn build(&self, sha: &str) -> Result<(String, Vec<u8>), RunOutcome> {
        let result = self
            .remote
            .run(
                self.host,
                "build_kernel",
                &[sha.to_string()],
                None,
                self.config.build_timeout,
            )
            .await;

        match result {
            Ok(r) if r.exit_code == 0 => {
                let version = parse_kernel_version(&r.stdout);
                Ok((version, r.stdout))
            }
            Ok(r) => Err(RunOutcome {
                phase_reached: Phase::Build,
                verdict: HostVerdict::Fail,
                kernel_version: None,
                error_kind: Some("build_failed".into()),
                build_log: Some(r.stdout),
                console_log: None,
                test_exit_code: Some(r.exit_code),
            }),
            Err(e) => Err(RunOutcome {
                phase_reached: Phase::Build,
                verdict: HostVerdict::Unreachable,
                kernel_version: None,
                error_kind: Some(format!("{e}")),
                build_log: None,
                console_log: None,
                test_exit_code: None,
            }),
        }
    }

    /// `build_kernel` already installs the candidate and arms the one-shot
    /// boot entry (§4.6); this only needs to cycle power into it. Re-arming
    /// protection here would re-pin whatever kernel happens to be running.
    async fn install_and_reboot(&self) -> Result<(), RunOutcome> {
        let power = PowerController::new(self.host, self.remote);
        if let Err(e) = power.cycle().await {
            return Err(RunOutcome {
                phase_reached: Phase::Install,
                verdict: HostVerdict::Unreachable,
                kernel_version: None,
                error_kind: Some(format!("{e}")),
                build_log: None,
                console_log: None,
                test_exit_code: None,
            });
        }

        Ok(())
    }

    async fn test(&self, kernel_version: Option<String>) -> RunOutcome {
        let (op, args) = match (&self.host.test_mode, &self.host.test_script_path) {
            (TestMode::Custom, Some(script)) => ("run_custom_test", vec![script.clone()]),
            _ => ("run_test", vec![]),
        };

        let result = self
            .remote
            .run(self.host, op, &args, None, self.config.test_timeout)
            .await;

        match result {
            Ok(r) => RunOutcome {
                phase_reached: Phase::Test,
                verdict: if r.exit_code == 0 {
                    HostVerdict::Pass
                } else {
                    HostVerdict::Fail
                },
                kernel_version,
                error_kind: if r.exit_code == 0 {
                    None
                } else {
                    Some("test_failed".into())
                },
                build_log: None,
                console_log: None,
                test_exit_code: Some(r.exit_code),
            },
            Err(e) => RunOutcome {
                phase_reached: Phase::Test,
                verdict: HostVerdict::Unreachable,
                kernel_version,
                error_kind: Some(format!("{e}")),
                build_log: None,
                console_log: None,
                test_exit_code: None,
            },
        }
    }

    /// RECOVER: attempt to bring an unresponsive host back with fixed
    /// spacing between tries. Any response at all ends recovery — the
    /// one-shot boot entry has already fired and been consumed, so whatever
    /// came up is the protected kernel, not the candidate; the candidate is
    /// classified `boot_timeout_recovered` without running TEST (§4.6). If
    /// every attempt times out the host is unreachable for this iteration.
    async fn recover(&self) -> RunOutcome {
        let monitor = BootMonitor::new(self.remote);
        for attempt in 0..RECOVER_ATTEMPTS {
            warn!(host_id = %self.host.id, attempt, "attempting host recovery");
            let power = PowerController::new(self.host, self.remote);
            let _ = power.cycle().await;

            match monitor
                .wait_for_boot(self.host, None, self.config.boot_timeout)
                .await
            {
                BootResult::BootedExpected { observed } => {
                    info!(host_id = %self.host.id, observed, "host recovered, one-shot already consumed");
                    return RunOutcome {
                        phase_reached: Phase::Boot,
                        verdict: self.boot_failure_verdict(),
                        kernel_version: Some(observed),
                        error_kind: Some("boot_timeout_recovered".into()),
                        build_log: None,
                        console_log: None,
                        test_exit_code: None,
                    };
                }
                BootResult::FellBack { .. } => unreachable!("recover path never sets an expected kernel"),
                BootResult::Timeout => {
                    if attempt + 1 < RECOVER_ATTEMPTS {
                        tokio::time::sleep(RECOVER_SPACING).await;
                    }
                }
            }
        }

        RunOutcome {
            phase_reached: Phase::Boot,
            verdict: HostVerdict::Unreachable,
            kernel_version: None,
            error_kind: Some("boot_timeout".into()),
            build_log: None,
            console_log: None,
            test_exit_code: None,
        }
    }

    /// Default-test mode: failure to boot is itself the regression signal,
    /// so it counts as `fail`. Custom-test mode: a kernel that never ran the
    /// requested test tells us nothing about it, so it counts as `skip`.
    fn boot_failure_verdict(&self) -> HostVerdict {
        match self.host.test_mode {
            TestMode::Custom => HostVerdict::Skip,
            TestMode::Default => HostVerdict::Fail,
        }
    }
}

/// Extracts the kernel version `build_kernel` prints as the last non-blank
/// line of stdout (§6).
fn parse_kernel_version(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout)
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_exec::{RemoteExecError, RemoteResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        build_exit: i32,
        build_stdout: &'static str,
        uname_output: &'static str,
        test_exit: i32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RemoteExec for Scripted {
        async fn run(
            &self,
            _host: &Host,
            op_name: &str,
            _args: &[String],
            _stdin: Option<&[u8]>,
            _timeout_dur: Duration,
        ) -> Result<RemoteResult, RemoteExecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match op_name {
                "build_kernel" => Ok(RemoteResult {
                    exit_code: self.build_exit,
                    stdout: self.build_stdout.as_bytes().to_vec(),
                    stderr: Vec::new(),
                }),
                "uname" => Ok(RemoteResult {
                    exit_code: 0,
                    stdout: self.uname_output.as_bytes().to_vec(),
                    stderr: Vec::new(),
                }),
                "run_test" | "run_custom_test" => Ok(RemoteResult {
                    exit_code: self.test_exit,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                }),
                _ => Ok(RemoteResult {
                    exit_code: 0,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                }),
            }
        }

        async fn echo(&self, _host: &Host, _timeout_dur: Duration) -> Result<(), RemoteExecError> {
            Ok(())
        }
    }

    fn host() -> Host {
        host_with_mode(TestMode::Default)
    }

    fn host_with_mode(test_mode: TestMode) -> Host {
        Host {
            id: "h1".into(),
            address: "127.0.0.1".into(),
            remote_user: "root".into(),
            kernel_source_path: "/src/linux".into(),
            power_controller: kbisect_core::PowerControllerKind::ShellReboot,
            test_mode,
            test_script_path: None,
            base_config_path: None,
        }
    }

    #[tokio::test]
    async fn build_failure_stops_before_install() {
        let remote = Scripted {
            build_exit: 2,
            build_stdout: "",
            uname_output: "sha123",
            test_exit: 0,
            calls: AtomicU32::new(0),
        };
        let runner = HostRunner::new(&host(), &remote, HostRunnerConfig::default());
        let outcome = runner.run_iteration("sha123").await;
        assert_eq!(outcome.phase_reached, Phase::Build);
        assert_eq!(outcome.verdict, HostVerdict::Fail);
        assert!(outcome.build_log.is_some(), "build log must be kept on failure too");
    }

    #[tokio::test]
    async fn full_success_path_reaches_test_pass() {
        let remote = Scripted {
            build_exit: 0,
            build_stdout: "compiling...\n6.9.0-rc1-00001-gdeadbee\n",
            uname_output: "6.9.0-rc1-00001-gdeadbee",
            test_exit: 0,
            calls: AtomicU32::new(0),
        };
        let runner = HostRunner::new(&host(), &remote, HostRunnerConfig::default());
        let outcome = runner.run_iteration("sha123").await;
        assert_eq!(outcome.phase_reached, Phase::Test);
        assert_eq!(outcome.verdict, HostVerdict::Pass);
        assert_eq!(outcome.kernel_version.as_deref(), Some("6.9.0-rc1-00001-gdeadbee"));
        assert!(outcome.build_log.is_some(), "build log must be stored on success");
    }

    #[tokio::test]
    async fn boot_fallback_is_fail_without_running_test() {
        let remote = Scripted {
            build_exit: 0,
            build_stdout: "6.9.0-rc1-00001-gdeadbee",
            uname_output: "6.8.0-protected",
            test_exit: 0,
            calls: AtomicU32::new(0),
        };
        let runner = HostRunner::new(&host(), &remote, HostRunnerConfig::default());
        let outcome = runner.run_iteration("sha123").await;
        assert_eq!(outcome.phase_reached, Phase::Boot);
        assert_eq!(outcome.verdict, HostVerdict::Fail);
        assert_eq!(outcome.error_kind.as_deref(), Some("boot_fallback"));
    }

    #[tokio::test]
    async fn boot_fallback_is_skip_in_custom_test_mode() {
        let remote = Scripted {
            build_exit: 0,
            build_stdout: "6.9.0-rc1-00001-gdeadbee",
            uname_output: "6.8.0-protected",
            test_exit: 0,
            calls: AtomicU32::new(0),
        };
        let runner = HostRunner::new(&host_with_mode(TestMode::Custom), &remote, HostRunnerConfig::default());
        let outcome = runner.run_iteration("sha123").await;
        assert_eq!(outcome.phase_reached, Phase::Boot);
        assert_eq!(outcome.verdict, HostVerdict::Skip);
        assert_eq!(outcome.error_kind.as_deref(), Some("boot_fallback"));
    }

    #[tokio::test]
    async fn test_failure_is_reported_with_exit_code() {
        let remote = Scripted {
            build_exit: 0,
            build_stdout: "6.9.0-rc1-00001-gdeadbee",
            uname_output: "6.9.0-rc1-00001-gdeadbee",
            test_exit: 1,
            calls: AtomicU32::new(0),
        };
        let runner = HostRunner::new(&host(), &remote, HostRunnerConfig::default());
        let outcome = runner.run_iteration("sha123").await;
        assert_eq!(outcome.verdict, HostVerdict::Fail);
        assert_eq!(outcome.test_exit_code, Some(1));
    }

    struct AlwaysUnreachable;

    #[async_trait]
    impl RemoteExec for AlwaysUnreachable {
        async fn run(
            &self,
            _host: &Host,
            op_name: &str,
            _args: &[String],
            _stdin: Option<&[u8]>,
            _timeout_dur: Duration,
        ) -> Result<RemoteResult, RemoteExecError> {
            match op_name {
                "build_kernel" => Ok(RemoteResult {
                    exit_code: 0,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                }),
                "uname" => Err(RemoteExecError::Timeout(Duration::from_secs(1))),
                _ => Ok(RemoteResult {
                    exit_code: 0,
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                }),
            }
        }

        async fn echo(&self, _host: &Host, _timeout_dur: Duration) -> Result<(), RemoteExecError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn boot_timeout_exhausts_recovery_and_is_unreachable() {
        let remote = AlwaysUnreachable;
        let config = HostRunnerConfig {
            build_timeout: Duration::from_secs(60),
            boot_timeout: Duration::from_millis(100),
            test_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        let runner = HostRunner::new(&host(), &remote, config);
        let outcome = runner.run_iteration("sha123").await;
        assert_eq!(outcome.phase_reached, Phase::Boot);
        assert_eq!(outcome.verdict, HostVerdict::Unreachable);
        assert_eq!(outcome.error_kind.as_deref(), Some("boot_timeout"));
    }
}
