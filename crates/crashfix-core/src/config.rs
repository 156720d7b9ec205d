use crate::error::{CrashfixError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// BuildConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Build program, e.g. `cmake`, `make`, `cargo`.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_build_timeout")]
    pub timeout_seconds: u64,
}

fn default_build_timeout() -> u64 {
    1800
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            program: "make".to_string(),
            args: Vec::new(),
            timeout_seconds: default_build_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Optional deployed-service section. When present, overnight deployments
/// stop the running process, copy the fresh binary and symbols into
/// `deploy_dir`, and restart it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Process name passed to `pkill` when stopping the service.
    pub process_name: String,
    /// Freshly built binary, relative to the repository root.
    pub binary: PathBuf,
    /// Debug symbols copied alongside the binary, if the build produces them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<PathBuf>,
    pub deploy_dir: PathBuf,
    #[serde(default = "default_restart_timeout")]
    pub restart_timeout_seconds: u64,
}

fn default_restart_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// GitConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Retries after the first commit attempt, for transient index.lock
    /// contention.
    #[serde(default = "default_commit_retries")]
    pub commit_retries: u32,
    #[serde(default = "default_commit_backoff")]
    pub commit_backoff_seconds: u64,
    #[serde(default = "default_git_timeout")]
    pub timeout_seconds: u64,
}

fn default_base_branch() -> String {
    "develop".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_commit_retries() -> u32 {
    3
}

fn default_commit_backoff() -> u64 {
    2
}

fn default_git_timeout() -> u64 {
    120
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            remote: default_remote(),
            commit_retries: default_commit_retries(),
            commit_backoff_seconds: default_commit_backoff(),
            timeout_seconds: default_git_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Queue root, relative to the repository root unless absolute.
    #[serde(default = "default_queue_root")]
    pub queue_root: PathBuf,

    /// Main loop sleep between polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Deadline for `await_response` after a trigger marker is written.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_seconds: u64,

    /// Interval between response-file existence checks while waiting.
    #[serde(default = "default_response_poll")]
    pub response_poll_seconds: u64,

    /// Heartbeat log line every N loop iterations.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_iterations: u64,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceConfig>,
}

fn default_version() -> u32 {
    1
}

fn default_queue_root() -> PathBuf {
    PathBuf::from(".crashfix/queue")
}

fn default_poll_interval() -> u64 {
    30
}

fn default_response_timeout() -> u64 {
    900
}

fn default_response_poll() -> u64 {
    5
}

fn default_heartbeat() -> u64 {
    20
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            queue_root: default_queue_root(),
            poll_interval_seconds: default_poll_interval(),
            response_timeout_seconds: default_response_timeout(),
            response_poll_seconds: default_response_poll(),
            heartbeat_iterations: default_heartbeat(),
            build: BuildConfig::default(),
            git: GitConfig::default(),
            service: None,
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(CrashfixError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Absolute queue root for a given repository root.
    pub fn queue_root_abs(&self, root: &Path) -> PathBuf {
        if self.queue_root.is_absolute() {
            self.queue_root.clone()
        } else {
            root.join(&self.queue_root)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_seconds)
    }

    pub fn response_poll(&self) -> Duration {
        Duration::from_secs(self.response_poll_seconds)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
