use anyhow::Context;
use crashfix_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing crashfix in: {}", root.display());

    let crashfix_dir = paths::crashfix_dir(root);
    io::ensure_dir(&crashfix_dir)
        .with_context(|| format!("failed to create {}", crashfix_dir.display()))?;

    // Write config.yaml if missing
    let config_path = paths::config_path(root);
    let config = if config_path.exists() {
        println!("  exists:  .crashfix/config.yaml");
        Config::load(root).context("failed to load config.yaml")?
    } else {
        let config = Config::default();
        config.save(root).context("failed to write config.yaml")?;
        println!("  created: .crashfix/config.yaml");
        config
    };

    // Scaffold the queue directories
    let queue_root = config.queue_root_abs(root);
    for dir in paths::queue_dirs(&queue_root) {
        io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    println!("  created: {}", queue_root.display());

    // Orchestrator state never belongs in version control
    io::ensure_gitignore_entry(root, ".crashfix/")?;
    println!("  updated: .gitignore");

    Ok(())
}
