//! kbisect-remote: drives a single host's remote execution channel,
//! power controller, console capture, and boot monitoring for one
//! bisection iteration.
//!
//! [`host_runner::HostRunner`] is the entry point the coordinator uses; the
//! other modules are the collaborators it composes.

pub mod boot_monitor;
pub mod console;
pub mod host_runner;
pub mod power;
pub mod remote_exec;

pub use boot_monitor::{BootMonitor, BootResult};
pub use console::{ConsoleBackend, ConsoleCollector, ConsoleSession};
pub use host_runner::{HostRunner, HostRunnerConfig, RunOutcome};
pub use power::{PowerController, PowerError, PowerStatus};
pub use remote_exec::{RemoteExec, RemoteExecError, RemoteResult, SshRemoteExec};
