//! The polling control loop.
//!
//! One orchestrator, parameterized by [`DeploymentPolicy`], replaces the
//! gated and overnight variants. Per-request states:
//!
//! ```text
//! PENDING → TRIGGERED → (awaiting response) → RESPONSE_READY
//!     → [gated: AWAITING_APPROVAL → APPROVED | REJECTED]
//!     → DEPLOYED | BUILD_FAILED | REJECTED
//! ```
//!
//! `DEPLOYED`, `BUILD_FAILED`, and `REJECTED` are terminal. A build
//! failure in overnight mode is skipped silently for the rest of this
//! process lifetime rather than retried. No error escapes the loop — one
//! request's failure never aborts the others.

use crate::approval::ApprovalGate;
use crate::build::BuildVerifier;
use crate::config::Config;
use crate::deploy::{DeployResult, DeploymentManager, DeploymentPolicy};
use crate::error::{CrashfixError, Result};
use crate::git::GitRepo;
use crate::process::ProcessRunner;
use crate::store::{ProcessedSet, RequestStore};
use crate::trigger::AnalysisTrigger;
use crate::types::{AnalysisResponse, ApprovalDecision};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

pub struct Orchestrator<'a> {
    config: Config,
    policy: DeploymentPolicy,
    repo_root: PathBuf,
    store: RequestStore,
    trigger: AnalysisTrigger,
    gate: ApprovalGate,
    deployer: DeploymentManager<'a>,
    git: GitRepo<'a>,
    /// Requests triggered this lifetime (redesign of the old global set).
    triggered: ProcessedSet,
    /// Requests whose fix failed to build this lifetime; skipped silently.
    build_failed: ProcessedSet,
    target_branch: String,
    iteration: u64,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        config: Config,
        policy: DeploymentPolicy,
        runner: &'a dyn ProcessRunner,
    ) -> Result<Self> {
        let repo_root = repo_root.into();
        let queue_root = config.queue_root_abs(&repo_root);
        for dir in crate::paths::queue_dirs(&queue_root) {
            crate::io::ensure_dir(&dir)?;
        }

        let git = GitRepo::new(&repo_root, config.git.clone(), runner);
        let deploy_git = GitRepo::new(&repo_root, config.git.clone(), runner);
        let verifier = BuildVerifier::new(&repo_root, config.build.clone(), runner);
        let deployer = DeploymentManager::new(
            &queue_root,
            deploy_git,
            verifier,
            config.service.clone(),
            runner,
        );

        let target_branch = config.git.base_branch.clone();
        Ok(Self {
            store: RequestStore::new(&queue_root),
            trigger: AnalysisTrigger::new(&queue_root, config.response_poll()),
            gate: ApprovalGate::new(&queue_root),
            deployer,
            git,
            triggered: ProcessedSet::new(),
            build_failed: ProcessedSet::new(),
            target_branch,
            iteration: 0,
            repo_root,
            config,
            policy,
        })
    }

    pub fn target_branch(&self) -> &str {
        &self.target_branch
    }

    /// Mode-specific startup. Overnight runs never touch the base branch
    /// directly: all fixes land on a fresh date-stamped isolated branch.
    pub fn startup(&mut self) -> Result<()> {
        if self.policy == DeploymentPolicy::DeployImmediately {
            self.target_branch = self
                .git
                .prepare_isolated_branch(&self.config.git.base_branch)?;
        }
        info!(
            policy = ?self.policy,
            branch = %self.target_branch,
            repo = %self.repo_root.display(),
            "orchestrator ready"
        );
        Ok(())
    }

    /// One full pass: trigger new requests, handle ready responses, and
    /// (gated mode) deploy approved fixes. Errors are logged per request
    /// and never propagate.
    pub fn tick(&mut self) {
        self.iteration += 1;
        self.poll_pending();
        self.poll_responses();
        if self.policy == DeploymentPolicy::ApproveThenDeploy {
            self.poll_approved();
        }
        if self.config.heartbeat_iterations > 0
            && self.iteration % self.config.heartbeat_iterations == 0
        {
            info!(
                iteration = self.iteration,
                triggered = self.triggered.len(),
                build_failed = self.build_failed.len(),
                "heartbeat"
            );
        }
    }

    /// Run until `shutdown` is set. Finishes the current iteration before
    /// exiting; in-flight subprocesses are never forcibly killed.
    pub fn run_loop(&mut self, shutdown: &AtomicBool) -> Result<()> {
        self.startup()?;
        while !shutdown.load(Ordering::SeqCst) {
            self.tick();
            sleep_interruptible(self.config.poll_interval(), shutdown);
        }
        info!("shutdown requested, exiting after current iteration");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn poll_pending(&mut self) {
        let pending = match self.store.scan_pending(&self.triggered) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "request scan failed, will retry next poll");
                return;
            }
        };
        for request in pending {
            if let Err(e) = self.trigger.trigger(&request) {
                // Request stays PENDING; retried on the next poll.
                warn!(request = %request.id, error = %e, "trigger write failed");
                continue;
            }
            if let Err(e) = self.store.mark_triggered(&request.id) {
                warn!(request = %request.id, error = %e, "failed to mark request in progress");
            }
            self.triggered.insert(&request.id);

            match self
                .trigger
                .await_response(&request.id, self.config.response_timeout())
            {
                Ok(_) => {
                    // Picked up by the response phase of this same tick.
                }
                Err(CrashfixError::Timeout(_)) => {
                    warn!(request = %request.id, "analysis timed out, requeueing");
                    self.triggered.remove(&request.id);
                    if let Err(e) = self.store.requeue(&request.id) {
                        warn!(request = %request.id, error = %e, "requeue failed");
                    }
                }
                Err(e) => {
                    warn!(request = %request.id, error = %e, "awaiting response failed");
                }
            }
        }
    }

    fn poll_responses(&mut self) {
        let ready = match self.store.scan_response_ready() {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "response scan failed, will retry next poll");
                return;
            }
        };
        for response in ready {
            let id = response.request_id.clone();
            if self.build_failed.contains(&id) {
                continue;
            }
            match self.policy {
                DeploymentPolicy::ApproveThenDeploy => {
                    // Render once; an existing decision (any status) means
                    // the request is already past this state.
                    if ApprovalDecision::load(self.store.queue_root(), &id).is_ok() {
                        continue;
                    }
                    if let Err(e) = self.gate.request_review(&response) {
                        warn!(request = %id, error = %e, "review rendering failed");
                    }
                }
                DeploymentPolicy::DeployImmediately => {
                    self.deploy_response(&response, None);
                }
            }
        }
    }

    fn poll_approved(&mut self) {
        let approved = match self.gate.scan_approved() {
            Ok(a) => a,
            Err(e) => {
                error!(error = %e, "approval scan failed, will retry next poll");
                return;
            }
        };
        for decision in approved {
            let id = decision.request_id.clone();
            let response = match AnalysisResponse::load(self.store.queue_root(), &id) {
                Ok(r) => r,
                Err(e) => {
                    warn!(request = %id, error = %e, "approved fix has no readable response");
                    continue;
                }
            };
            self.deploy_response(&response, Some(&decision));
        }
    }

    /// Deploy one response and record the terminal state. `decision` is
    /// present in gated mode and absent in overnight mode.
    fn deploy_response(&mut self, response: &AnalysisResponse, decision: Option<&ApprovalDecision>) {
        let id = response.request_id.clone();
        match self
            .deployer
            .deploy(response, self.policy, &self.target_branch)
        {
            Ok(DeployResult::Done(record)) => {
                if decision.is_some() {
                    if let Err(e) = self.gate.mark_deployed(&id) {
                        warn!(request = %id, error = %e, "failed to flip approval to deployed");
                    }
                }
                info!(
                    request = %id,
                    committed = record.committed,
                    pushed = record.pushed,
                    deployed = record.deployed,
                    "request terminally handled"
                );
            }
            Ok(DeployResult::BuildFailed { excerpt }) => {
                error!(request = %id, %excerpt, "fix failed to build");
                match decision {
                    Some(_) => {
                        // Approved-but-unbuildable is its own terminal state,
                        // not a revert to pending.
                        if let Err(e) = self.gate.mark_deploy_failed(&id) {
                            warn!(request = %id, error = %e, "failed to mark deploy_failed");
                        }
                    }
                    None => {
                        self.build_failed.insert(&id);
                    }
                }
            }
            Err(e) => {
                error!(request = %id, error = %e, "deployment errored, will retry next poll");
            }
        }
    }
}

/// Sleep for `total`, waking early if `shutdown` is set.
fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let chunk = Duration::from_millis(250);
    let mut remaining = total;
    while !remaining.is_zero() && !shutdown.load(Ordering::SeqCst) {
        let step = remaining.min(chunk);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths;
    use crate::testutil::{seed_request, seed_response, ScriptedRunner};
    use crate::types::{AnalysisRequest, ApprovalStatus, DeploymentRecord, RequestStatus};
    use tempfile::TempDir;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.poll_interval_seconds = 0;
        config.response_timeout_seconds = 0;
        config.response_poll_seconds = 0;
        config.git.commit_backoff_seconds = 0;
        config.build.program = "make".to_string();
        config
    }

    fn orchestrator<'a>(
        repo: &TempDir,
        policy: DeploymentPolicy,
        runner: &'a ScriptedRunner,
    ) -> Orchestrator<'a> {
        Orchestrator::new(repo.path(), test_config(), policy, runner).unwrap()
    }

    fn queue_root(repo: &TempDir) -> std::path::PathBuf {
        test_config().queue_root_abs(repo.path())
    }

    #[test]
    fn scenario_a_trigger_then_timeout_requeues() {
        let repo = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let mut orch = orchestrator(&repo, DeploymentPolicy::DeployImmediately, &runner);
        let q = queue_root(&repo);
        seed_request(&q, "crash_1");

        orch.tick();

        assert!(paths::trigger_path(&q, "crash_1").exists());
        // Timed out with zero deadline; requeued for a later pass.
        let req = AnalysisRequest::load(&q, "crash_1").unwrap();
        assert_eq!(req.status, RequestStatus::Pending);
    }

    #[test]
    fn overnight_response_deploys_and_records() {
        let repo = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let mut orch = orchestrator(&repo, DeploymentPolicy::DeployImmediately, &runner);
        orch.startup().unwrap();
        assert!(orch.target_branch().starts_with("overnight-fixes-"));

        let q = queue_root(&repo);
        seed_request(&q, "crash_3");
        seed_response(&q, "crash_3", "src/render/mesh.cpp", "patched\n");

        orch.tick();

        let record = DeploymentRecord::load(&q, "crash_3").unwrap();
        assert!(record.compiled && record.committed && record.pushed);
        assert_eq!(record.branch, orch.target_branch());
        assert!(runner
            .commands()
            .iter()
            .any(|c| c.contains("Fix crash crash_3")));
    }

    #[test]
    fn at_most_once_deployment_across_ticks() {
        let repo = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let mut orch = orchestrator(&repo, DeploymentPolicy::DeployImmediately, &runner);
        let q = queue_root(&repo);
        seed_request(&q, "crash_3");
        seed_response(&q, "crash_3", "src/a.cpp", "x");

        orch.tick();
        let first = DeploymentRecord::load(&q, "crash_3").unwrap();
        orch.tick();
        orch.tick();
        let after = DeploymentRecord::load(&q, "crash_3").unwrap();
        assert_eq!(first, after, "record must be written exactly once");
    }

    #[test]
    fn overnight_build_failure_is_terminal_for_this_run() {
        let repo = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let mut orch = orchestrator(&repo, DeploymentPolicy::DeployImmediately, &runner);
        let q = queue_root(&repo);
        seed_request(&q, "crash_2");
        seed_response(&q, "crash_2", "src/a.cpp", "broken");
        runner.push_fail(2, "error: does not compile");

        orch.tick();
        assert!(!DeploymentRecord::exists(&q, "crash_2"));
        let calls_after_first = runner.call_count();

        // Silently skipped on later ticks, not retried.
        orch.tick();
        assert_eq!(runner.call_count(), calls_after_first);
    }

    #[test]
    fn gated_response_renders_review_and_waits() {
        let repo = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let mut orch = orchestrator(&repo, DeploymentPolicy::ApproveThenDeploy, &runner);
        let q = queue_root(&repo);
        seed_request(&q, "crash_4");
        seed_response(&q, "crash_4", "src/a.cpp", "x");

        orch.tick();

        assert!(paths::review_path(&q, "crash_4").exists());
        let d = ApprovalDecision::load(&q, "crash_4").unwrap();
        assert_eq!(d.status, ApprovalStatus::Pending);
        // Nothing deployed while awaiting review.
        assert!(!DeploymentRecord::exists(&q, "crash_4"));

        // Re-polling without a verdict changes nothing.
        orch.tick();
        let d = ApprovalDecision::load(&q, "crash_4").unwrap();
        assert_eq!(d.status, ApprovalStatus::Pending);
    }

    #[test]
    fn scenario_d_approved_fix_deploys_and_flips_record() {
        let repo = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let mut orch = orchestrator(&repo, DeploymentPolicy::ApproveThenDeploy, &runner);
        let q = queue_root(&repo);
        seed_request(&q, "crash_4");
        seed_response(&q, "crash_4", "src/a.cpp", "x");

        orch.tick();
        ApprovalGate::new(&q)
            .decide("crash_4", true, Some("casey".into()), None)
            .unwrap();
        orch.tick();

        assert!(DeploymentRecord::exists(&q, "crash_4"));
        let d = ApprovalDecision::load(&q, "crash_4").unwrap();
        assert_eq!(d.status, ApprovalStatus::Deployed);
    }

    #[test]
    fn rejected_fix_never_deploys() {
        let repo = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let mut orch = orchestrator(&repo, DeploymentPolicy::ApproveThenDeploy, &runner);
        let q = queue_root(&repo);
        seed_request(&q, "crash_4");
        seed_response(&q, "crash_4", "src/a.cpp", "x");

        orch.tick();
        ApprovalGate::new(&q)
            .decide("crash_4", false, None, Some("not the root cause".into()))
            .unwrap();
        orch.tick();
        orch.tick();

        assert!(!DeploymentRecord::exists(&q, "crash_4"));
        let d = ApprovalDecision::load(&q, "crash_4").unwrap();
        assert_eq!(d.status, ApprovalStatus::Rejected);
    }

    #[test]
    fn gated_build_failure_marks_deploy_failed() {
        let repo = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let mut orch = orchestrator(&repo, DeploymentPolicy::ApproveThenDeploy, &runner);
        let q = queue_root(&repo);
        seed_request(&q, "crash_5");
        seed_response(&q, "crash_5", "src/a.cpp", "broken");

        orch.tick();
        ApprovalGate::new(&q).decide("crash_5", true, None, None).unwrap();
        runner.push_fail(2, "error: nope");
        orch.tick();

        assert!(!DeploymentRecord::exists(&q, "crash_5"));
        let d = ApprovalDecision::load(&q, "crash_5").unwrap();
        assert_eq!(d.status, ApprovalStatus::DeployFailed);

        // Terminal: later ticks do not retry the build.
        let calls = runner.call_count();
        orch.tick();
        assert_eq!(runner.call_count(), calls);
    }

    #[test]
    fn run_loop_exits_on_shutdown() {
        let repo = TempDir::new().unwrap();
        let runner = ScriptedRunner::new();
        let mut orch = orchestrator(&repo, DeploymentPolicy::ApproveThenDeploy, &runner);
        let shutdown = AtomicBool::new(true);
        orch.run_loop(&shutdown).unwrap();
    }
}
