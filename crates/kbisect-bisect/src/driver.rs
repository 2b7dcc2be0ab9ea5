//! `BisectDriver`: a narrow adapter over `git bisect` run against the
//! kernel source working copy (§4.8).
//!
//! The working copy is a single-writer resource owned exclusively by this
//! driver — HostRunners never touch it.

use std::path::{Path, PathBuf};
use std::process::Command;

use kbisect_core::Verdict;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("not a git repository: {}", .0.display())]
    NotARepo(PathBuf),
    #[error("bisect already started with different endpoints (good={existing_good}, bad={existing_bad})")]
    EndpointMismatch {
        existing_good: String,
        existing_bad: String,
    },
    #[error("unexpected git bisect output: {0}")]
    UnexpectedOutput(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// One commit the driver handed back via `current`, with its subject line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub sha: String,
    pub message: String,
}

pub struct GitBisectDriver {
    repo_dir: PathBuf,
}

impl GitBisectDriver {
    pub fn new(repo_dir: impl Into<PathBuf>) -> DriverResult<Self> {
        let repo_dir = repo_dir.into();
        if !is_git_repo(&repo_dir) {
            return Err(DriverError::NotARepo(repo_dir));
        }
        Ok(Self { repo_dir })
    }

    /// Idempotent: if a bisection is already in progress, verifies the
    /// recorded endpoints match rather than restarting it.
    pub fn start(&self, good_ref: &str, bad_ref: &str) -> DriverResult<()> {
        if let Some((existing_good, existing_bad)) = self.existing_endpoints()? {
            if existing_good != good_ref || existing_bad != bad_ref {
                return Err(DriverError::EndpointMismatch {
                    existing_good,
                    existing_bad,
                });
            }
            return Ok(());
        }

        self.run_git(&["bisect", "start"])?;
        self.run_git(&["bisect", "bad", bad_ref])?;
        self.run_git(&["bisect", "good", good_ref])?;
        Ok(())
    }

    /// The commit `git bisect` chose to test next, or `None` if the search
    /// already converged (no bisection in progress).
    pub fn current(&self) -> DriverResult<Option<Candidate>> {
        if !self.is_bisecting()? {
            return Ok(None);
        }

        let sha = self.run_git(&["rev-parse", "HEAD"])?.trim().to_string();
        let message = self
            .run_git(&["log", "-1", "--format=%s", &sha])?
            .trim()
            .to_string();

        Ok(Some(Candidate { sha, message }))
    }

    /// Marks the current candidate and returns the converged first-bad
    /// commit when the search has finished.
    pub fn mark(&self, verdict: Verdict) -> DriverResult<Option<String>> {
        let subcommand = match verdict {
            Verdict::Good => "good",
            Verdict::Bad => "bad",
            Verdict::Skip => "skip",
            Verdict::Pending => {
                return Err(DriverError::UnexpectedOutput(
                    "cannot mark a pending verdict".into(),
                ))
            }
        };

        let output = self.run_git(&["bisect", subcommand])?;
        if let Some(sha) = parse_first_bad(&output) {
            return Ok(Some(sha));
        }
        if is_inconclusive(&output) {
            return Ok(Some("inconclusive".to_string()));
        }
        Ok(None)
    }

    pub fn reset(&self) -> DriverResult<()> {
        self.run_git(&["bisect", "reset"])?;
        Ok(())
    }

    fn is_bisecting(&self) -> DriverResult<bool> {
        Ok(self.repo_dir.join(".git").join("BISECT_START").exists())
    }

    fn existing_endpoints(&self) -> DriverResult<Option<(String, String)>> {
        let log_path = self.repo_dir.join(".git").join("BISECT_LOG");
        if !log_path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&log_path)
            .map_err(|e| DriverError::CommandFailed(e.to_string()))?;

        let mut good = None;
        let mut bad = None;
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("# bad: ") {
                bad = rest.split_whitespace().next().map(String::from);
            } else if let Some(rest) = line.strip_prefix("# good: ") {
                good = rest.split_whitespace().next().map(String::from);
            }
        }

        match (good, bad) {
            (Some(g), Some(b)) => Ok(Some((g, b))),
            _ => Ok(None),
        }
    }

    fn run_git(&self, args: &[&str]) -> DriverResult<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .map_err(|e| DriverError::CommandFailed(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::CommandFailed(format!(
                "git {:?} failed: {stderr}",
                args
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn parse_first_bad(bisect_output: &str) -> Option<String> {
    for line in bisect_output.lines() {
        if line.contains("is the first bad commit") {
            return line.split_whitespace().next().map(String::from);
        }
    }
    None
}

/// Detects the terminal "every remaining candidate was skipped" state
/// (§8 boundary behavior): `git bisect skip` prints "only 'skip'ped commits
/// left to test" and "We cannot bisect more!" instead of naming a first-bad
/// commit, leaving `BISECT_START` in place forever if not treated as done.
fn is_inconclusive(bisect_output: &str) -> bool {
    bisect_output.contains("only 'skip'ped commits left")
        || bisect_output.contains("We cannot bisect more")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_linear_repo(commits: usize) -> (tempfile::TempDir, Vec<String>) {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);

        let mut shas = Vec::new();
        for i in 0..commits {
            run_git(
                dir.path(),
                &["commit", "--allow-empty", "-m", &format!("commit {i}")],
            );
            let sha = StdCommand::new("git")
                .args(["rev-parse", "HEAD"])
                .current_dir(dir.path())
                .output()
                .unwrap();
            shas.push(String::from_utf8_lossy(&sha.stdout).trim().to_string());
        }
        (dir, shas)
    }

    #[test]
    fn start_then_current_yields_a_candidate() {
        let (dir, shas) = make_linear_repo(5);
        let driver = GitBisectDriver::new(dir.path()).unwrap();
        driver.start(&shas[0], &shas[4]).unwrap();

        let candidate = driver.current().unwrap();
        assert!(candidate.is_some());
        driver.reset().unwrap();
    }

    #[test]
    fn start_is_idempotent_with_matching_endpoints() {
        let (dir, shas) = make_linear_repo(5);
        let driver = GitBisectDriver::new(dir.path()).unwrap();
        driver.start(&shas[0], &shas[4]).unwrap();
        assert!(driver.start(&shas[0], &shas[4]).is_ok());
        driver.reset().unwrap();
    }

    #[test]
    fn marking_converges_to_first_bad() {
        let (dir, shas) = make_linear_repo(5);
        let driver = GitBisectDriver::new(dir.path()).unwrap();
        driver.start(&shas[0], &shas[4]).unwrap();

        let mut first_bad = None;
        for _ in 0..shas.len() {
            let candidate = match driver.current().unwrap() {
                Some(c) => c,
                None => break,
            };
            let verdict = if shas.iter().position(|s| s == &candidate.sha).unwrap() >= 2 {
                Verdict::Bad
            } else {
                Verdict::Good
            };
            if let Some(done) = driver.mark(verdict).unwrap() {
                first_bad = Some(done);
                break;
            }
        }

        assert_eq!(first_bad.as_deref(), Some(shas[2].as_str()));
        driver.reset().unwrap();
    }

    #[test]
    fn all_skip_output_is_inconclusive_not_none() {
        let output = "There are only 'skip'ped commits left to test.\n\
                       The first bad commit could be any of:\n\
                       deadbeef\n\
                       feedface\n\
                       We cannot bisect more!\n";
        assert!(parse_first_bad(output).is_none());
        assert!(is_inconclusive(output));
    }

    #[test]
    fn new_rejects_non_repo_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            GitBisectDriver::new(dir.path()),
            Err(DriverError::NotARepo(_))
        ));
    }
}
