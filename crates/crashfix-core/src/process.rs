//! Subprocess invocation behind a narrow trait.
//!
//! Every external tool the orchestrator touches — the build system, git,
//! the service binary — goes through [`ProcessRunner`], so tests can
//! simulate build and VCS failures without invoking real tools. The
//! production implementation is [`SystemRunner`], which enforces a
//! per-call timeout: a stuck external tool can never hang the poll loop.

use crate::error::{CrashfixError, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// RunOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Stdout and stderr concatenated, for diagnostics.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessRunner
// ---------------------------------------------------------------------------

pub trait ProcessRunner {
    /// Run `program` with `args` in `cwd`, killing it after `timeout`.
    ///
    /// A non-zero exit is **not** an `Err` — callers decide what a failure
    /// means. `Err` is reserved for the program being unspawnable.
    fn run(&self, program: &str, args: &[&str], cwd: &Path, timeout: Duration)
        -> Result<RunOutput>;

    /// Start `program` without waiting for it. Used only to restart the
    /// deployed service, which outlives the orchestrator's call.
    fn spawn_detached(&self, program: &str, args: &[&str], cwd: &Path) -> Result<u32>;
}

// ---------------------------------------------------------------------------
// SystemRunner
// ---------------------------------------------------------------------------

/// Real subprocess execution via `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<RunOutput> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CrashfixError::SpawnFailed {
                program: program.to_string(),
                detail: e.to_string(),
            })?;

        // Drain both pipes on reader threads so a chatty child can't
        // deadlock against a full pipe while we wait on it.
        let stdout_handle = spawn_reader(child.stdout.take());
        let stderr_handle = spawn_reader(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let mut timed_out = false;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break Some(status),
                None if Instant::now() >= deadline => {
                    let _ = child.kill();
                    timed_out = true;
                    break child.wait().ok();
                }
                None => std::thread::sleep(Duration::from_millis(50)),
            }
        };

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();
        let exit_code = status.and_then(|s| s.code()).unwrap_or(-1);

        Ok(RunOutput {
            exit_code,
            stdout,
            stderr,
            timed_out,
        })
    }

    fn spawn_detached(&self, program: &str, args: &[&str], cwd: &Path) -> Result<u32> {
        let child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CrashfixError::SpawnFailed {
                program: program.to_string(),
                detail: e.to_string(),
            })?;
        Ok(child.id())
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    source: Option<R>,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut r) = source {
            let mut bytes = Vec::new();
            if r.read_to_end(&mut bytes).is_ok() {
                buf = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        buf
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn captures_stdout_and_exit_code() {
        let out = SystemRunner
            .run(
                "sh",
                &["-c", "echo hello; exit 0"],
                Path::new("."),
                Duration::from_secs(5),
            )
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    #[cfg(unix)]
    fn nonzero_exit_is_not_an_error() {
        let out = SystemRunner
            .run(
                "sh",
                &["-c", "echo boom >&2; exit 3"],
                Path::new("."),
                Duration::from_secs(5),
            )
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "boom");
        assert!(out.combined().contains("boom"));
    }

    #[test]
    #[cfg(unix)]
    fn timeout_kills_the_child() {
        let start = Instant::now();
        let out = SystemRunner
            .run(
                "sh",
                &["-c", "sleep 30"],
                Path::new("."),
                Duration::from_millis(200),
            )
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn unspawnable_program_is_an_error() {
        let result = SystemRunner.run(
            "definitely-not-a-real-binary-xyz",
            &[],
            Path::new("."),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(CrashfixError::SpawnFailed { .. })));
    }
}
