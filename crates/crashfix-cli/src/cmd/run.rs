use anyhow::Context;
use crashfix_core::{
    config::Config,
    deploy::DeploymentPolicy,
    lock::InstanceLock,
    orchestrator::Orchestrator,
    process::SystemRunner,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub fn run(root: &Path, policy: DeploymentPolicy) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;

    // Fail fast on missing tools rather than mid-deployment.
    which::which("git").context("git not found on PATH")?;
    which::which(&config.build.program)
        .with_context(|| format!("build program '{}' not found on PATH", config.build.program))?;

    // Single instance per repository. Held until the loop exits.
    let lock = InstanceLock::acquire(root).context("another orchestrator is running")?;

    // First Ctrl-C requests a graceful stop after the current iteration;
    // a second one aborts the process outright.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .context("failed to start signal runtime")?;
        std::thread::spawn(move || {
            rt.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    shutdown.store(true, Ordering::SeqCst);
                    info!("interrupt received, finishing current iteration");
                }
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });
        });
    }

    let runner = SystemRunner;
    let mut orchestrator = Orchestrator::new(root, config, policy, &runner)?;
    let result = orchestrator.run_loop(&shutdown);

    lock.release().ok();
    result.map_err(Into::into)
}
