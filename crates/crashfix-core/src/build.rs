//! Build verification.
//!
//! One synchronous, bounded call to the configured build tool. Deployment
//! never proceeds past a failed build.

use crate::config::BuildConfig;
use crate::error::Result;
use crate::git::tail;
use crate::process::ProcessRunner;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// How much build output is kept as the failure diagnostic.
const EXCERPT_CHARS: usize = 1500;

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub success: bool,
    /// Truncated tail of combined output. Empty on success.
    pub excerpt: String,
    pub duration: Duration,
}

pub struct BuildVerifier<'a> {
    repo_root: PathBuf,
    config: BuildConfig,
    runner: &'a dyn ProcessRunner,
}

impl<'a> BuildVerifier<'a> {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        config: BuildConfig,
        runner: &'a dyn ProcessRunner,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            config,
            runner,
        }
    }

    pub fn build(&self) -> Result<BuildOutcome> {
        let args: Vec<&str> = self.config.args.iter().map(String::as_str).collect();
        let started = Instant::now();
        let out = self.runner.run(
            &self.config.program,
            &args,
            &self.repo_root,
            Duration::from_secs(self.config.timeout_seconds),
        )?;
        let duration = started.elapsed();

        if out.success() {
            info!(program = %self.config.program, ?duration, "build succeeded");
            return Ok(BuildOutcome {
                success: true,
                excerpt: String::new(),
                duration,
            });
        }

        let excerpt = if out.timed_out {
            format!(
                "build timed out after {}s\n{}",
                self.config.timeout_seconds,
                tail(&out.combined(), EXCERPT_CHARS)
            )
        } else {
            tail(&out.combined(), EXCERPT_CHARS)
        };
        error!(program = %self.config.program, exit_code = out.exit_code, "build failed");
        Ok(BuildOutcome {
            success: false,
            excerpt,
            duration,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
