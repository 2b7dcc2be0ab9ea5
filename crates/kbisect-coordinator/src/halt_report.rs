//! The report emitted when a session halts pending operator recovery.

use uuid::Uuid;

/// One unreachable host plus whatever error kind its last phase recorded
/// (e.g. `power_backend_failure`, `boot_timeout`) — named in §7 as part of
/// the required halt message ("which power back ends failed").
#[derive(Debug, Clone)]
pub struct UnreachableHost {
    pub host_id: String,
    pub error_kind: Option<String>,
}

/// Emitted when the aggregator returns `Pending` — at least one host went
/// unreachable and recovery was exhausted. The session is left `Halted`;
/// these instructions are what an operator needs to bring it back.
#[derive(Debug, Clone)]
pub struct HaltReport {
    pub session_id: Uuid,
    pub iteration_id: Uuid,
    pub sha: String,
    pub unreachable_hosts: Vec<UnreachableHost>,
}

impl HaltReport {
    pub fn render_text(&self) -> String {
        let mut out = format!(
            "Session {} halted at commit {}\n",
            self.session_id, self.sha
        );
        out.push_str("Unreachable hosts:\n");
        for host in &self.unreachable_hosts {
            match &host.error_kind {
                Some(kind) => out.push_str(&format!("  - {} ({kind})\n", host.host_id)),
                None => out.push_str(&format!("  - {}\n", host.host_id)),
            }
        }
        out.push_str(
            "\nPower the above hosts back on, verify they answer a remote command, \
             then run `kbisect start` to resume.\n",
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_text_names_unreachable_hosts_and_reasons() {
        let report = HaltReport {
            session_id: Uuid::new_v4(),
            iteration_id: Uuid::new_v4(),
            sha: "deadbeef".into(),
            unreachable_hosts: vec![
                UnreachableHost {
                    host_id: "srv".into(),
                    error_kind: Some("boot_timeout".into()),
                },
                UnreachableHost {
                    host_id: "cli".into(),
                    error_kind: None,
                },
            ],
        };
        let text = report.render_text();
        assert!(text.contains("deadbeef"));
        assert!(text.contains("srv (boot_timeout)"));
        assert!(text.contains("- cli\n"));
        assert!(text.contains("kbisect start"));
    }
}
