//! Git subprocess wrapper and overnight branch isolation.
//!
//! All git invocations go through [`ProcessRunner`] with the configured
//! timeout. Commits retry with backoff because the index lock is the one
//! resource a developer's editor or IDE can transiently hold; "nothing to
//! commit" counts as success so re-running a deployment is idempotent.

use crate::config::GitConfig;
use crate::error::{CrashfixError, Result};
use crate::process::{ProcessRunner, RunOutput};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Filesystem names Windows reserves for devices. An entry with one of
/// these stems silently breaks `git add` on that platform, so the
/// overnight run removes them before branching.
const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The working tree already matched HEAD. Success for idempotence.
    NothingToCommit,
}

pub struct GitRepo<'a> {
    repo_root: PathBuf,
    config: GitConfig,
    runner: &'a dyn ProcessRunner,
}

impl<'a> GitRepo<'a> {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        config: GitConfig,
        runner: &'a dyn ProcessRunner,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            config,
            runner,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    fn run(&self, args: &[&str]) -> Result<RunOutput> {
        self.runner.run("git", args, &self.repo_root, self.timeout())
    }

    /// Run git and fail with `GitFailed` on non-zero exit.
    fn run_checked(&self, op: &str, args: &[&str]) -> Result<RunOutput> {
        let out = self.run(args)?;
        if !out.success() {
            return Err(CrashfixError::GitFailed {
                op: op.to_string(),
                detail: tail(&out.combined(), 500),
            });
        }
        Ok(out)
    }

    pub fn is_clean(&self) -> Result<bool> {
        let out = self.run_checked("status", &["status", "--porcelain"])?;
        Ok(out.stdout.trim().is_empty())
    }

    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_checked("rev-parse", &["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(out.stdout.trim().to_string())
    }

    pub fn checkout(&self, branch: &str) -> Result<()> {
        self.run_checked("checkout", &["checkout", branch])?;
        Ok(())
    }

    pub fn add(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run_checked("add", &args)?;
        Ok(())
    }

    pub fn add_all(&self) -> Result<()> {
        self.run_checked("add", &["add", "-A"])?;
        Ok(())
    }

    /// Discard all uncommitted changes, restoring the last committed state.
    pub fn reset_hard(&self) -> Result<()> {
        self.run_checked("reset", &["reset", "--hard", "HEAD"])?;
        Ok(())
    }

    /// Commit staged changes with bounded retries and linear backoff.
    pub fn commit(&self, message: &str) -> Result<CommitOutcome> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let out = self.run(&["commit", "-m", message])?;
            if out.success() {
                return Ok(CommitOutcome::Committed);
            }
            let detail = out.combined();
            if detail.contains("nothing to commit")
                || detail.contains("nothing added to commit")
            {
                return Ok(CommitOutcome::NothingToCommit);
            }
            if attempt > self.config.commit_retries {
                return Err(CrashfixError::GitFailed {
                    op: "commit".to_string(),
                    detail: tail(&detail, 500),
                });
            }
            warn!(attempt, "commit failed, retrying after backoff");
            std::thread::sleep(Duration::from_secs(
                self.config.commit_backoff_seconds * u64::from(attempt),
            ));
        }
    }

    pub fn push(&self, branch: &str) -> Result<()> {
        self.run_checked("push", &["push", self.config.remote.as_str(), branch])?;
        Ok(())
    }

    pub fn push_set_upstream(&self, branch: &str) -> Result<()> {
        self.run_checked(
            "push",
            &["push", "-u", self.config.remote.as_str(), branch],
        )?;
        Ok(())
    }

    /// Best-effort local and remote deletion of a branch from a prior run.
    pub fn delete_branch_force(&self, branch: &str) {
        if let Ok(out) = self.run(&["branch", "-D", branch]) {
            if out.success() {
                info!(branch, "deleted stale local branch");
            }
        }
        let remote = self.config.remote.clone();
        if let Ok(out) = self.run(&["push", remote.as_str(), "--delete", branch]) {
            if out.success() {
                info!(branch, "deleted stale remote branch");
            }
        }
    }

    pub fn create_branch(&self, branch: &str) -> Result<()> {
        self.run_checked("checkout", &["checkout", "-b", branch])?;
        Ok(())
    }

    /// `git config user.name`, if set. Used as the approver identity.
    pub fn user_name(&self) -> Option<String> {
        let out = self.run(&["config", "user.name"]).ok()?;
        if !out.success() {
            return None;
        }
        let name = out.stdout.trim().to_string();
        (!name.is_empty()).then_some(name)
    }

    // -----------------------------------------------------------------------
    // Branch isolation (overnight mode)
    // -----------------------------------------------------------------------

    /// Create and push the disposable branch all overnight fixes land on.
    ///
    /// Steps: remove reserved-device-name entries, settle the working tree
    /// on `base` (auto-committing and pushing stray changes), force-delete
    /// any same-named branch from a prior run, branch off and push so the
    /// branch exists remotely before the first fix is committed to it.
    pub fn prepare_isolated_branch(&self, base: &str) -> Result<String> {
        let purged = purge_reserved_names(&self.repo_root)?;
        if purged > 0 {
            warn!(purged, "removed reserved-device-name entries from working tree");
        }

        self.checkout(base)?;
        if !self.is_clean()? {
            info!("auto-committing stray local changes before overnight run");
            self.add_all()?;
            self.commit("Auto-commit local changes before overnight run")?;
            if let Err(e) = self.push(base) {
                warn!(error = %e, "failed to push stray changes, continuing");
            }
        }

        let branch = isolated_branch_name(chrono::Utc::now().date_naive());
        self.delete_branch_force(&branch);
        self.create_branch(&branch)?;
        self.push_set_upstream(&branch)?;
        info!(branch, base, "isolated branch ready");
        Ok(branch)
    }
}

/// `overnight-fixes-<YYYY-MM-DD>` — deterministic per calendar day, so a
/// re-run the same night reuses (after deletion) the same name.
pub fn isolated_branch_name(date: NaiveDate) -> String {
    format!("overnight-fixes-{}", date.format("%Y-%m-%d"))
}

/// Remove working-tree entries whose stem is a reserved device name.
/// Skips `.git` itself. Returns the number of entries removed.
pub fn purge_reserved_names(root: &Path) -> Result<u32> {
    fn stem_is_reserved(name: &str) -> bool {
        let stem = name.split('.').next().unwrap_or(name);
        RESERVED_DEVICE_NAMES
            .iter()
            .any(|r| r.eq_ignore_ascii_case(stem))
    }

    fn walk(dir: &Path, removed: &mut u32) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == ".git" {
                continue;
            }
            let path = entry.path();
            if stem_is_reserved(&name) {
                if path.is_dir() {
                    std::fs::remove_dir_all(&path)?;
                } else {
                    std::fs::remove_file(&path)?;
                }
                *removed += 1;
            } else if path.is_dir() {
                walk(&path, removed)?;
            }
        }
        Ok(())
    }

    let mut removed = 0;
    walk(root, &mut removed)?;
    Ok(removed)
}

/// Last `max` characters of `s`, prefixed with an ellipsis when truncated.
pub(crate) fn tail(s: &str, max: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max {
        s.to_string()
    } else {
        let tail: String = chars[chars.len() - max..].iter().collect();
        format!("…{tail}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedRunner;
    use tempfile::TempDir;

    fn repo<'a>(root: &Path, runner: &'a ScriptedRunner) -> GitRepo<'a> {
        let mut config = GitConfig::default();
        config.commit_backoff_seconds = 0;
        GitRepo::new(root, config, runner)
    }

    #[test]
    fn is_clean_parses_porcelain() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        runner.push_ok("");
        runner.push_ok(" M src/main.cpp\n");

        let git = repo(dir.path(), &runner);
        assert!(git.is_clean().unwrap());
        assert!(!git.is_clean().unwrap());
    }

    #[test]
    fn commit_nothing_to_commit_is_success() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        runner.push_fail(1, "nothing to commit, working tree clean");

        let git = repo(dir.path(), &runner);
        assert_eq!(git.commit("msg").unwrap(), CommitOutcome::NothingToCommit);
    }

    #[test]
    fn commit_retries_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        runner.push_fail(128, "fatal: Unable to create '.git/index.lock': File exists");
        runner.push_fail(128, "fatal: Unable to create '.git/index.lock': File exists");
        runner.push_ok("[develop abc1234] msg");

        let git = repo(dir.path(), &runner);
        assert_eq!(git.commit("msg").unwrap(), CommitOutcome::Committed);
        assert_eq!(runner.call_count(), 3);
    }

    #[test]
    fn commit_gives_up_after_bounded_retries() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        for _ in 0..10 {
            runner.push_fail(128, "fatal: index.lock exists");
        }

        let git = repo(dir.path(), &runner);
        assert!(matches!(
            git.commit("msg"),
            Err(CrashfixError::GitFailed { .. })
        ));
        // 1 initial attempt + commit_retries retries
        assert_eq!(runner.call_count(), 4);
    }

    #[test]
    fn run_checked_surfaces_truncated_detail() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        runner.push_fail(1, &"x".repeat(2000));

        let git = repo(dir.path(), &runner);
        match git.push("develop") {
            Err(CrashfixError::GitFailed { op, detail }) => {
                assert_eq!(op, "push");
                assert!(detail.chars().count() <= 501);
            }
            other => panic!("expected GitFailed, got {other:?}"),
        }
    }

    #[test]
    fn isolated_branch_name_is_date_stamped() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        assert_eq!(isolated_branch_name(date), "overnight-fixes-2026-08-30");
    }

    #[test]
    fn purge_removes_reserved_names_recursively() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/NUL"), b"oops").unwrap();
        std::fs::write(dir.path().join("con.log"), b"oops").unwrap();
        std::fs::write(dir.path().join("src/main.cpp"), b"int main(){}").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), b"").unwrap();

        let removed = purge_reserved_names(dir.path()).unwrap();
        assert_eq!(removed, 2);
        assert!(dir.path().join("src/main.cpp").exists());
        assert!(!dir.path().join("src/NUL").exists());
        assert!(!dir.path().join("con.log").exists());
        assert!(dir.path().join(".git/config").exists());
    }

    #[test]
    fn tail_truncates_from_the_end() {
        assert_eq!(tail("short", 10), "short");
        let t = tail(&format!("{}END", "a".repeat(100)), 3);
        assert_eq!(t, "…END");
    }
}
