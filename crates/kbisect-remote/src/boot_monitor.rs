//! `BootMonitor`: wait until a host is reachable and responsive again,
//! reporting what kernel it actually booted (§4.5).

use std::time::{Duration, Instant};

use tracing::debug;

use kbisect_core::Host;

use crate::remote_exec::RemoteExec;

const POLL_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const POLL_MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootResult {
    /// Reachable and the observed kernel matches what was expected.
    BootedExpected { observed: String },
    /// Reachable, but the observed kernel differs — the one-shot boot
    /// failed and firmware selected the protected kernel.
    FellBack { observed: String },
    /// Never became reachable within the timeout.
    Timeout,
}

pub struct BootMonitor<'a> {
    remote: &'a dyn RemoteExec,
}

impl<'a> BootMonitor<'a> {
    pub fn new(remote: &'a dyn RemoteExec) -> Self {
        Self { remote }
    }

    /// Poll `host` with exponential backoff (capped at a few seconds) until
    /// it answers `uname -r` or `timeout` elapses. When `expected_kernel`
    /// is `None` (the RECOVER path), any successful answer counts as
    /// reachable without comparing versions.
    pub async fn wait_for_boot(
        &self,
        host: &Host,
        expected_kernel: Option<&str>,
        timeout: Duration,
    ) -> BootResult {
        let deadline = Instant::now() + timeout;
        let mut backoff = POLL_INITIAL_BACKOFF;

        loop {
            if Instant::now() >= deadline {
                return BootResult::Timeout;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let probe_timeout = remaining.min(Duration::from_secs(10));

            match self
                .remote
                .run(host, "uname", &["-r".to_string()], None, probe_timeout)
                .await
            {
                Ok(result) if result.exit_code == 0 => {
                    let observed = String::from_utf8_lossy(&result.stdout)
                        .trim()
                        .to_string();
                    debug!(host_id = %host.id, observed, "host responded");
                    return match expected_kernel {
                        Some(expected) if expected == observed => {
                            BootResult::BootedExpected { observed }
                        }
                        Some(_) => BootResult::FellBack { observed },
                        None => BootResult::BootedExpected { observed },
                    };
                }
                _ => {
                    tokio::time::sleep(backoff.min(remaining)).await;
                    backoff = (backoff * 2).min(POLL_MAX_BACKOFF);
                }
            }
        }
    }
}
