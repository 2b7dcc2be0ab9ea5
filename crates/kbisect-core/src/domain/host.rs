//! Host: static configuration entity for one test machine.

use serde::{Deserialize, Serialize};

/// Which power back end a host is wired to. A `ShellReboot` host is a
/// first-class variant, not a missing/null configuration — it simply
/// cannot recover a host that has stopped responding to its remote shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PowerControllerKind {
    Ipmi {
        bmc_address: String,
        username: String,
        /// Path to a restrictive-permission file holding the password;
        /// never the password itself, so config snapshots never carry it.
        password_file: String,
    },
    LabAutomation {
        endpoint: String,
        /// Path to a file holding the bearer token used by the lab's
        /// reboot-ticketing API.
        token_file: String,
    },
    ShellReboot,
}

/// Whether a host runs the default boot-test or a user-supplied test
/// script; governs the per-host verdict mapping in the HostRunner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    Default,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    pub id: String,
    pub address: String,
    pub remote_user: String,
    pub kernel_source_path: String,
    pub power_controller: PowerControllerKind,
    pub test_mode: TestMode,
    pub test_script_path: Option<String>,
    pub base_config_path: Option<String>,
}

impl Host {
    /// A host in `Custom` mode must name the script to run; `Default` mode
    /// ignores `test_script_path` even if one was supplied.
    pub fn validate(&self) -> Result<(), String> {
        if self.test_mode == TestMode::Custom && self.test_script_path.is_none() {
            return Err(format!(
                "host {} is in custom test mode but has no test_script_path",
                self.id
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(test_mode: TestMode, script: Option<&str>) -> Host {
        Host {
            id: "h1".into(),
            address: "10.0.0.1".into(),
            remote_user: "root".into(),
            kernel_source_path: "/src/linux".into(),
            power_controller: PowerControllerKind::ShellReboot,
            test_mode,
            test_script_path: script.map(String::from),
            base_config_path: None,
        }
    }

    #[test]
    fn custom_mode_requires_script() {
        assert!(host(TestMode::Custom, None).validate().is_err());
        assert!(host(TestMode::Custom, Some("/bin/test.sh")).validate().is_ok());
    }

    #[test]
    fn default_mode_does_not_require_script() {
        assert!(host(TestMode::Default, None).validate().is_ok());
    }
}
