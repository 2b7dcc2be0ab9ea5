//! `RemoteExec`: run a single named operation on a host, streaming output.
//!
//! The concrete transport is opaque to callers (§4.2) — this implementation
//! shells out over `ssh`, mirroring the workspace's pattern of driving an
//! external command through `tokio::process::Command` with a bounded
//! timeout (the same shape as the CI stage runner).

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use kbisect_core::{Host, KbisectError};

/// Outcome of one `RemoteExec::run` call.
#[derive(Debug, Clone)]
pub struct RemoteResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// The three failure modes §4.2 distinguishes: a clean non-zero exit is not
/// an error at this layer (it's surfaced via `RemoteResult::exit_code`) —
/// only transport-level failures produce `RemoteExecError`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteExecError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("channel lost: {0}")]
    ChannelLost(String),
}

impl RemoteExecError {
    pub fn into_kbisect_error(self, host_id: &str) -> KbisectError {
        match self {
            RemoteExecError::Timeout(_) => KbisectError::RemoteUnreachable {
                host_id: host_id.to_string(),
                reason: "timed out".to_string(),
            },
            RemoteExecError::ChannelLost(reason) => KbisectError::RemoteChannelLost {
                host_id: host_id.to_string(),
                reason,
            },
        }
    }
}

/// Capability to run one named operation on one host.
///
/// Operations map to entry points in the on-host script library (§6):
/// `init_protection`, `build_kernel`, `collect_metadata`, `run_test`,
/// `cleanup_old_kernels`, `list_kernels`, `verify_protection`.
#[async_trait]
pub trait RemoteExec: Send + Sync {
    /// Run `op_name args...` on `host`, with optional stdin, cancelled if
    /// `timeout` elapses.
    async fn run(
        &self,
        host: &Host,
        op_name: &str,
        args: &[String],
        stdin: Option<&[u8]>,
        timeout_dur: Duration,
    ) -> Result<RemoteResult, RemoteExecError>;

    /// A lightweight liveness probe used on resume (§4.9 step 1) and by
    /// BootMonitor's polling loop.
    async fn echo(&self, host: &Host, timeout_dur: Duration) -> Result<(), RemoteExecError>;
}

/// `ssh`-based `RemoteExec`. Each operation is invoked as
/// `ssh <user>@<address> <op_name> <args...>` against the script library
/// deployed on the host at `init` time.
pub struct SshRemoteExec;

impl SshRemoteExec {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SshRemoteExec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExec for SshRemoteExec {
    async fn run(
        &self,
        host: &Host,
        op_name: &str,
        args: &[String],
        stdin: Option<&[u8]>,
        timeout_dur: Duration,
    ) -> Result<RemoteResult, RemoteExecError> {
        let target = format!("{}@{}", host.remote_user, host.address);
        debug!(host_id = %host.id, op_name, "running remote operation");

        let mut cmd = Command::new("ssh");
        cmd.arg(&target).arg(op_name).args(args);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| RemoteExecError::ChannelLost(e.to_string()))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input)
                    .await
                    .map_err(|e| RemoteExecError::ChannelLost(e.to_string()))?;
            }
        }

        let wait = child.wait_with_output();
        let output = timeout(timeout_dur, wait)
            .await
            .map_err(|_| RemoteExecError::Timeout(timeout_dur))?
            .map_err(|e| RemoteExecError::ChannelLost(e.to_string()))?;

        Ok(RemoteResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn echo(&self, host: &Host, timeout_dur: Duration) -> Result<(), RemoteExecError> {
        match self.run(host, "true", &[], None, timeout_dur).await {
            Ok(r) if r.exit_code == 0 => Ok(()),
            Ok(r) => {
                warn!(host_id = %host.id, exit_code = r.exit_code, "echo probe returned non-zero");
                Err(RemoteExecError::ChannelLost(format!(
                    "echo exited {}",
                    r.exit_code
                )))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> Host {
        Host {
            id: "h1".into(),
            address: "127.0.0.1".into(),
            remote_user: "root".into(),
            kernel_source_path: "/src/linux".into(),
            power_controller: kbisect_core::PowerControllerKind::ShellReboot,
            test_mode: kbisect_core::TestMode::Default,
            test_script_path: None,
            base_config_path: None,
        }
    }

    #[test]
    fn timeout_error_maps_to_remote_unreachable() {
        let err = RemoteExecError::Timeout(Duration::from_secs(5)).into_kbisect_error("h1");
        assert!(matches!(err, KbisectError::RemoteUnreachable { .. }));
    }

    #[test]
    fn channel_lost_maps_through() {
        let err =
            RemoteExecError::ChannelLost("broken pipe".into()).into_kbisect_error("h1");
        assert!(matches!(err, KbisectError::RemoteChannelLost { .. }));
    }

    #[test]
    fn host_fixture_is_shell_reboot() {
        assert_eq!(
            host().power_controller,
            kbisect_core::PowerControllerKind::ShellReboot
        );
    }
}
