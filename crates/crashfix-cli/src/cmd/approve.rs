use anyhow::Context;
use crashfix_core::{
    approval::ApprovalGate,
    config::Config,
    git::GitRepo,
    process::SystemRunner,
};
use std::path::Path;

/// Record a reviewer verdict on a fix awaiting approval.
pub fn run(
    root: &Path,
    id: &str,
    approved: bool,
    approver: Option<String>,
    comment: Option<String>,
) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let queue_root = config.queue_root_abs(root);

    // Default the approver to the local git identity
    let runner = SystemRunner;
    let approver = approver.or_else(|| GitRepo::new(root, config.git.clone(), &runner).user_name());

    let gate = ApprovalGate::new(&queue_root);
    let decision = gate
        .decide(id, approved, approver, comment)
        .with_context(|| format!("failed to record verdict for {id}"))?;

    let verdict = if approved { "approved" } else { "rejected" };
    match &decision.approver {
        Some(name) => println!("{id} {verdict} by {name}"),
        None => println!("{id} {verdict}"),
    }
    if approved {
        println!("The fix will deploy on the orchestrator's next poll.");
    }
    Ok(())
}
