//! Single-instance lock over the repository.
//!
//! The working tree and the git index are the only mutable shared
//! resources, so exactly one orchestrator may run per repository. The lock
//! is a YAML pidfile at a fixed path; a lock left behind by a dead process
//! is reclaimed automatically instead of requiring manual cleanup.

use crate::error::{CrashfixError, Result};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held for the lifetime of the orchestrator. Released on drop, which
/// covers both clean shutdown and unwinds out of the run loop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    pid: u32,
}

impl InstanceLock {
    /// Take the lock for the current process.
    ///
    /// An existing record whose pid is still running fails with
    /// `AlreadyRunning`. A record from a dead process (or one that doesn't
    /// parse) is treated as stale and replaced.
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = paths::lock_path(root);
        let pid = std::process::id();

        if path.exists() {
            match read_record(&path) {
                Some(existing) if process_alive(existing.pid) => {
                    return Err(CrashfixError::AlreadyRunning(existing.pid));
                }
                Some(existing) => {
                    warn!(
                        stale_pid = existing.pid,
                        "reclaiming lock from dead process"
                    );
                    std::fs::remove_file(&path)?;
                }
                None => {
                    warn!(path = %path.display(), "removing unparseable lock record");
                    std::fs::remove_file(&path)?;
                }
            }
        }

        let record = LockRecord {
            pid,
            acquired_at: Utc::now(),
        };
        let data = serde_yaml::to_string(&record)?;
        crate::io::atomic_write(&path, data.as_bytes())?;
        Ok(Self { path, pid })
    }

    /// Explicit release for callers that want the error instead of the
    /// best-effort drop.
    pub fn release(self) -> Result<()> {
        self.remove_if_owned()?;
        std::mem::forget(self);
        Ok(())
    }

    fn remove_if_owned(&self) -> Result<()> {
        // Only delete a record we still own: a crashed-and-reclaimed lock
        // belongs to the new instance.
        if let Some(record) = read_record(&self.path) {
            if record.pid == self.pid {
                std::fs::remove_file(&self.path)?;
            }
        }
        Ok(())
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = self.remove_if_owned() {
            warn!(error = %e, "failed to release instance lock");
        }
    }
}

fn read_record(path: &Path) -> Option<LockRecord> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_yaml::from_str(&data).ok()
}

/// Whether a process with `pid` is currently running.
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_alive(pid: u32) -> bool {
    // kill -0 probes for existence without sending a signal.
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // No portable probe; err on the side of refusing to start.
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
