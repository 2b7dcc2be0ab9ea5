//! TOML configuration for a bisection run: good/bad refs, the local kernel
//! source working copy the `BisectDriver` walks, the hosts to test across,
//! and the per-phase timeouts (§6, §10.3).
//!
//! Accepts the legacy single-host `[slave]` table in place of `hosts` for
//! configs written before multi-host support existed; the two are mutually
//! exclusive, never merged.

use std::path::{Path, PathBuf};

use kbisect_core::{Host, KbisectError};
use serde::Deserialize;

const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_BOOT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_TEST_TIMEOUT_SECS: u64 = 600;
const DEFAULT_DB_PATH: &str = "kbisect.db";

#[derive(Debug, Deserialize)]
struct RawConfig {
    good: String,
    bad: String,
    repo_path: PathBuf,
    #[serde(default)]
    hosts: Option<Vec<Host>>,
    /// Legacy single-host form, superseded by `hosts` (§11).
    #[serde(default)]
    slave: Option<Host>,
    #[serde(default)]
    build_timeout_secs: Option<u64>,
    #[serde(default)]
    boot_timeout_secs: Option<u64>,
    #[serde(default)]
    test_timeout_secs: Option<u64>,
    #[serde(default)]
    db_path: Option<String>,
}

/// A loaded, validated configuration, plus the JSON snapshot frozen onto
/// the session at creation time.
#[derive(Debug, Clone)]
pub struct Config {
    pub good_ref: String,
    pub bad_ref: String,
    pub repo_path: PathBuf,
    pub hosts: Vec<Host>,
    pub build_timeout_secs: u64,
    pub boot_timeout_secs: u64,
    pub test_timeout_secs: u64,
    pub db_path: String,
    pub snapshot: serde_json::Value,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, KbisectError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            KbisectError::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|e| {
            KbisectError::ConfigInvalid(format!("invalid TOML in {}: {e}", path.display()))
        })?;

        let hosts = match (raw.hosts, raw.slave) {
            (Some(hosts), None) => hosts,
            (None, Some(slave)) => vec![slave],
            (Some(_), Some(_)) => {
                return Err(KbisectError::ConfigInvalid(
                    "config supplies both `hosts` and the legacy `slave` table; remove one".into(),
                ))
            }
            (None, None) => {
                return Err(KbisectError::ConfigInvalid(
                    "config supplies neither `hosts` nor the legacy `slave` table".into(),
                ))
            }
        };

        if hosts.is_empty() {
            return Err(KbisectError::ConfigInvalid("host list is empty".into()));
        }
        for host in &hosts {
            host.validate().map_err(KbisectError::ConfigInvalid)?;
        }

        let build_timeout_secs = raw.build_timeout_secs.unwrap_or(DEFAULT_BUILD_TIMEOUT_SECS);
        let boot_timeout_secs = raw.boot_timeout_secs.unwrap_or(DEFAULT_BOOT_TIMEOUT_SECS);
        let test_timeout_secs = raw.test_timeout_secs.unwrap_or(DEFAULT_TEST_TIMEOUT_SECS);
        let db_path = raw.db_path.clone().unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let snapshot = serde_json::json!({
            "good": raw.good,
            "bad": raw.bad,
            "repo_path": raw.repo_path,
            "hosts": hosts,
            "build_timeout_secs": build_timeout_secs,
            "boot_timeout_secs": boot_timeout_secs,
            "test_timeout_secs": test_timeout_secs,
        });

        Ok(Self {
            good_ref: raw.good,
            bad_ref: raw.bad,
            repo_path: raw.repo_path,
            hosts,
            build_timeout_secs,
            boot_timeout_secs,
            test_timeout_secs,
            db_path,
            snapshot,
        })
    }

    pub fn runner_config(&self) -> kbisect_remote::HostRunnerConfig {
        kbisect_remote::HostRunnerConfig {
            build_timeout: std::time::Duration::from_secs(self.build_timeout_secs),
            boot_timeout: std::time::Duration::from_secs(self.boot_timeout_secs),
            test_timeout: std::time::Duration::from_secs(self.test_timeout_secs),
            ..Default::default()
        }
    }

    pub fn host(&self, id: &str) -> Result<&Host, KbisectError> {
        self.hosts
            .iter()
            .find(|h| h.id == id)
            .ok_or_else(|| KbisectError::ConfigInvalid(format!("no host named {id} in config")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn rejects_neither_hosts_nor_slave() {
        let f = write_config(
            r#"
            good = "v6.1"
            bad = "v6.6"
            repo_path = "/src/linux"
            "#,
        );
        let err = Config::load(f.path()).unwrap_err();
        assert!(matches!(err, KbisectError::ConfigInvalid(_)));
    }

    #[test]
    fn rejects_both_hosts_and_slave() {
        let f = write_config(
            r#"
            good = "v6.1"
            bad = "v6.6"
            repo_path = "/src/linux"

            [[hosts]]
            id = "h1"
            address = "10.0.0.1"
            remote_user = "root"
            kernel_source_path = "/src/linux"
            test_mode = "default"
            [hosts.power_controller]
            kind = "shell_reboot"

            [slave]
            id = "legacy"
            address = "10.0.0.2"
            remote_user = "root"
            kernel_source_path = "/src/linux"
            test_mode = "default"
            [slave.power_controller]
            kind = "shell_reboot"
            "#,
        );
        let err = Config::load(f.path()).unwrap_err();
        assert!(matches!(err, KbisectError::ConfigInvalid(_)));
    }

    #[test]
    fn legacy_slave_table_loads_as_single_host() {
        let f = write_config(
            r#"
            good = "v6.1"
            bad = "v6.6"
            repo_path = "/src/linux"

            [slave]
            id = "legacy"
            address = "10.0.0.2"
            remote_user = "root"
            kernel_source_path = "/src/linux"
            test_mode = "default"
            [slave.power_controller]
            kind = "shell_reboot"
            "#,
        );
        let config = Config::load(f.path()).unwrap();
        assert_eq!(config.hosts.len(), 1);
        assert_eq!(config.hosts[0].id, "legacy");
        assert_eq!(config.build_timeout_secs, DEFAULT_BUILD_TIMEOUT_SECS);
    }

    #[test]
    fn custom_mode_host_missing_script_path_is_rejected() {
        let f = write_config(
            r#"
            good = "v6.1"
            bad = "v6.6"
            repo_path = "/src/linux"

            [[hosts]]
            id = "h1"
            address = "10.0.0.1"
            remote_user = "root"
            kernel_source_path = "/src/linux"
            test_mode = "custom"
            [hosts.power_controller]
            kind = "shell_reboot"
            "#,
        );
        let err = Config::load(f.path()).unwrap_err();
        assert!(matches!(err, KbisectError::ConfigInvalid(_)));
    }
}
