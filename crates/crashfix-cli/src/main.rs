mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand, ValueEnum};
use crashfix_core::deploy::DeploymentPolicy;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(
    name = "crashfix",
    about = "Autonomous crash remediation — analyze, gate, and deploy fixes for production crashes",
    version,
    propagate_version = true
)]
struct Cli {
    /// Repository root (default: auto-detect from .crashfix/ or .git/)
    #[arg(long, global = true, env = "CRASHFIX_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Deploy only after a human approves each fix
    Gated,
    /// Deploy fixes onto an isolated branch as they arrive
    Overnight,
}

impl From<Mode> for DeploymentPolicy {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Gated => DeploymentPolicy::ApproveThenDeploy,
            Mode::Overnight => DeploymentPolicy::DeployImmediately,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize crashfix in the current repository
    Init,

    /// Run the orchestrator loop until interrupted
    Run {
        /// Deployment mode
        #[arg(long, value_enum, default_value = "gated")]
        mode: Mode,
    },

    /// Show every request and its derived state
    Status,

    /// Approve a fix awaiting review
    Approve {
        /// Request id (e.g. crash_a3f2)
        id: String,

        /// Reviewer name (default: git user.name)
        #[arg(long)]
        approver: Option<String>,

        /// Optional note recorded with the verdict
        #[arg(long)]
        comment: Option<String>,
    },

    /// Reject a fix awaiting review
    Reject {
        /// Request id (e.g. crash_a3f2)
        id: String,

        /// Reviewer name (default: git user.name)
        #[arg(long)]
        approver: Option<String>,

        /// Why the fix was rejected
        #[arg(long)]
        comment: Option<String>,
    },
}

/// The long-running loop logs to stdout and to `.crashfix/crashfix.log`;
/// one-shot commands log warnings to stderr only.
fn init_tracing(root: &Path, long_running: bool) {
    let default_level = if long_running {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    let filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into());

    let log_file = if long_running {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(crashfix_core::paths::log_path(root))
            .ok()
    } else {
        None
    };

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    let file_layer = log_file.map(|f| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::sync::Arc::new(f))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let root_path = cli.root.as_deref();
    let root = root::resolve_root(root_path);

    init_tracing(&root, matches!(cli.command, Commands::Run { .. }));

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Run { mode } => cmd::run::run(&root, mode.into()),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Approve {
            id,
            approver,
            comment,
        } => cmd::approve::run(&root, &id, true, approver, comment),
        Commands::Reject {
            id,
            approver,
            comment,
        } => cmd::approve::run(&root, &id, false, approver, comment),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
