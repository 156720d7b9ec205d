//! Fix deployment: apply, verify, commit, push, restart.
//!
//! A fix proposal is a set of full-file replacements. The manager applies
//! them with the originals held in memory, gates everything on the build,
//! and writes the terminal [`DeploymentRecord`] at the end of the attempt
//! regardless of push or restart outcome — the request is handled exactly
//! once either way. A failed build reverts the working tree and writes no
//! record, so the fix stays eligible for a corrected response.

use crate::build::{BuildOutcome, BuildVerifier};
use crate::config::ServiceConfig;
use crate::error::{CrashfixError, Result};
use crate::git::{CommitOutcome, GitRepo};
use crate::process::ProcessRunner;
use crate::types::{AnalysisRequest, AnalysisResponse, DeploymentRecord, FileChange};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// DeploymentPolicy
// ---------------------------------------------------------------------------

/// How a verified fix leaves the working tree. Selected at orchestrator
/// construction; the rest of the pipeline is shared between modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentPolicy {
    /// Approval-gated: commit on the mainline branch for human review.
    ApproveThenDeploy,
    /// Overnight: commit to the isolated branch, then restart the service.
    DeployImmediately,
}

impl DeploymentPolicy {
    fn commit_marker(self) -> &'static str {
        match self {
            DeploymentPolicy::ApproveThenDeploy => "approval-gated",
            DeploymentPolicy::DeployImmediately => "overnight-auto",
        }
    }
}

// ---------------------------------------------------------------------------
// DeployResult
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum DeployResult {
    /// Terminal record written; `record.deployed` tells whether the service
    /// restart also happened.
    Done(DeploymentRecord),
    /// Build failed: working tree reverted, nothing committed, no record.
    BuildFailed { excerpt: String },
}

// ---------------------------------------------------------------------------
// DeploymentManager
// ---------------------------------------------------------------------------

pub struct DeploymentManager<'a> {
    queue_root: PathBuf,
    git: GitRepo<'a>,
    verifier: BuildVerifier<'a>,
    service: Option<ServiceConfig>,
    runner: &'a dyn ProcessRunner,
}

impl<'a> DeploymentManager<'a> {
    pub fn new(
        queue_root: impl Into<PathBuf>,
        git: GitRepo<'a>,
        verifier: BuildVerifier<'a>,
        service: Option<ServiceConfig>,
        runner: &'a dyn ProcessRunner,
    ) -> Self {
        Self {
            queue_root: queue_root.into(),
            git,
            verifier,
            service,
            runner,
        }
    }

    /// Deploy `response` onto `branch` under `policy`. See module docs for
    /// the failure contract.
    pub fn deploy(
        &self,
        response: &AnalysisResponse,
        policy: DeploymentPolicy,
        branch: &str,
    ) -> Result<DeployResult> {
        let id = &response.request_id;
        let started_at = Utc::now();
        info!(request = %id, branch, "deploying fix proposal");

        let originals = self.apply_files(&response.proposal.files)?;

        let build: BuildOutcome = self.verifier.build()?;
        if !build.success {
            error!(request = %id, "build failed, reverting working tree");
            self.revert_files(&originals)?;
            return Ok(DeployResult::BuildFailed {
                excerpt: build.excerpt,
            });
        }

        let message = self.commit_message(response, policy);
        let file_paths: Vec<&str> = response
            .proposal
            .files
            .iter()
            .map(|f| f.path.as_str())
            .collect();

        let mut committed = false;
        let mut pushed = false;
        match self
            .git
            .add(&file_paths)
            .and_then(|()| self.git.commit(&message))
        {
            Ok(outcome) => {
                committed = true;
                if outcome == CommitOutcome::NothingToCommit {
                    info!(request = %id, "nothing to commit, fix already present");
                }
                match self.git.push(branch) {
                    Ok(()) => pushed = true,
                    Err(e) => warn!(request = %id, error = %e, "push failed, commit remains local"),
                }
            }
            Err(e) => {
                // Build already succeeded: the fix is applied but not
                // durably committed. Left in place for manual recovery.
                warn!(request = %id, error = %e, "commit failed after successful build");
            }
        }

        let mut deployed = false;
        if policy == DeploymentPolicy::DeployImmediately && committed {
            deployed = self.restart_service(id);
        }

        let record = DeploymentRecord {
            request_id: id.clone(),
            compiled: true,
            committed,
            pushed,
            deployed,
            branch: branch.to_string(),
            started_at,
            finished_at: Utc::now(),
        };
        record.save(&self.queue_root)?;
        info!(request = %id, committed, pushed, deployed, "deployment recorded");
        Ok(DeployResult::Done(record))
    }

    /// Overwrite each proposal file, returning the pre-fix contents for
    /// revert. `None` means the file did not exist.
    fn apply_files(&self, files: &[FileChange]) -> Result<Vec<(PathBuf, Option<Vec<u8>>)>> {
        let mut originals = Vec::with_capacity(files.len());
        for file in files {
            let rel = validate_fix_path(&file.path)?;
            let abs = self.git.repo_root().join(rel);
            let original = match std::fs::read(&abs) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            crate::io::atomic_write(&abs, file.content.as_bytes())?;
            originals.push((abs, original));
        }
        Ok(originals)
    }

    fn revert_files(&self, originals: &[(PathBuf, Option<Vec<u8>>)]) -> Result<()> {
        for (path, original) in originals {
            match original {
                Some(bytes) => crate::io::atomic_write(path, bytes)?,
                None => {
                    if path.exists() {
                        std::fs::remove_file(path)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn commit_message(&self, response: &AnalysisResponse, policy: DeploymentPolicy) -> String {
        let id = &response.request_id;
        let mut msg = match AnalysisRequest::load(&self.queue_root, id) {
            Ok(req) => format!(
                "Fix crash {}: {}\n\nLocation: {}:{} in {}\n",
                req.crash.crash_id,
                req.crash.summary,
                req.crash.source_file,
                req.crash.source_line,
                req.crash.function
            ),
            Err(_) => format!("Fix crash {id}\n\n"),
        };
        msg.push_str(&format!(
            "Root cause: {}\nStrategy: {}\nMode: {}\n",
            response.proposal.root_cause,
            response.proposal.strategy,
            policy.commit_marker()
        ));
        msg
    }

    /// Stop, copy, restart the configured service. Returns whether the full
    /// sequence succeeded; failure is a warning, never a rollback — the fix
    /// already compiles and is pushed.
    fn restart_service(&self, id: &str) -> bool {
        let Some(svc) = &self.service else {
            return false;
        };
        let timeout = Duration::from_secs(svc.restart_timeout_seconds);
        let root = self.git.repo_root();

        // pkill exits 1 when no process matched; both are fine here.
        match self.runner.run("pkill", &["-x", &svc.process_name], root, timeout) {
            Ok(_) => {}
            Err(e) => {
                warn!(request = %id, error = %e, "failed to stop service");
                return false;
            }
        }

        let binary_src = root.join(&svc.binary);
        let Some(binary_name) = binary_src.file_name() else {
            warn!(request = %id, "service binary path has no filename");
            return false;
        };
        let binary_dest = svc.deploy_dir.join(binary_name);
        if let Err(e) = std::fs::create_dir_all(&svc.deploy_dir)
            .and_then(|()| std::fs::copy(&binary_src, &binary_dest).map(|_| ()))
        {
            warn!(request = %id, error = %e, "failed to copy service binary");
            return false;
        }
        if let Some(symbols) = &svc.symbols {
            let src = root.join(symbols);
            if let Some(name) = src.file_name() {
                if let Err(e) = std::fs::copy(&src, svc.deploy_dir.join(name)) {
                    warn!(request = %id, error = %e, "failed to copy debug symbols");
                }
            }
        }

        let dest_str = binary_dest.to_string_lossy().into_owned();
        match self.runner.spawn_detached(&dest_str, &[], &svc.deploy_dir) {
            Ok(pid) => {
                info!(request = %id, pid, "service restarted");
                true
            }
            Err(e) => {
                warn!(request = %id, error = %e, "failed to restart service");
                false
            }
        }
    }
}

/// Proposal paths are applied relative to the repository root and must not
/// escape it.
fn validate_fix_path(path: &str) -> Result<&Path> {
    let p = Path::new(path);
    let escapes = p.is_absolute()
        || path.is_empty()
        || p.components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    if escapes {
        return Err(CrashfixError::InvalidFixPath(path.to_string()));
    }
    Ok(p)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
