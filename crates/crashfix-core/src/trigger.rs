//! Hand-off to the external analysis agent.
//!
//! The agent watches `auto_process/` for trigger markers and deposits its
//! answer under `responses/`. Everything is plain files — no network, no
//! shared memory. Waiting is a bounded poll on the calling thread only;
//! the rest of the process (and the agent) keeps running.

use crate::error::{CrashfixError, Result};
use crate::paths;
use crate::types::{AnalysisRequest, AnalysisResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Filesystem artifact signaling the agent to begin work on one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMarker {
    pub request_id: String,
    pub crash_id: String,
    pub triggered_at: DateTime<Utc>,
}

impl TriggerMarker {
    pub fn load(queue_root: &Path, id: &str) -> Result<Self> {
        paths::validate_request_id(id)?;
        let path = paths::trigger_path(queue_root, id);
        if !path.exists() {
            return Err(CrashfixError::RequestNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }
}

pub struct AnalysisTrigger {
    queue_root: PathBuf,
    /// Interval between response-file checks while waiting.
    poll: Duration,
}

impl AnalysisTrigger {
    pub fn new(queue_root: impl Into<PathBuf>, poll: Duration) -> Self {
        Self {
            queue_root: queue_root.into(),
            poll,
        }
    }

    /// Write the trigger marker for `request`. Overwriting an existing
    /// marker is fine — the write is idempotent, and a failed write leaves
    /// the request PENDING for retry on the next poll.
    pub fn trigger(&self, request: &AnalysisRequest) -> Result<()> {
        paths::validate_request_id(&request.id)?;
        let marker = TriggerMarker {
            request_id: request.id.clone(),
            crash_id: request.crash.crash_id.clone(),
            triggered_at: Utc::now(),
        };
        let data = serde_yaml::to_string(&marker)?;
        crate::io::atomic_write(&paths::trigger_path(&self.queue_root, &request.id), data.as_bytes())?;
        info!(request = %request.id, "trigger marker written");
        Ok(())
    }

    /// Block the calling thread until the response for `id` appears, or
    /// fail with `Timeout` after `timeout`. An unreadable response file is
    /// re-polled rather than failing — the agent may still be writing it.
    pub fn await_response(&self, id: &str, timeout: Duration) -> Result<AnalysisResponse> {
        let deadline = Instant::now() + timeout;
        loop {
            if AnalysisResponse::exists(&self.queue_root, id) {
                match AnalysisResponse::load(&self.queue_root, id) {
                    Ok(resp) => {
                        debug!(request = %id, "analysis response received");
                        return Ok(resp);
                    }
                    Err(e) => {
                        warn!(request = %id, error = %e, "response present but unreadable, re-polling");
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(CrashfixError::Timeout(id.to_string()));
            }
            std::thread::sleep(self.poll);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CrashReport, FileChange, FixProposal};
    use tempfile::TempDir;

    fn request(id: &str) -> AnalysisRequest {
        AnalysisRequest::new(CrashReport {
            crash_id: id.to_string(),
            category: "assert".to_string(),
            source_file: "src/audio/mixer.cpp".to_string(),
            source_line: 51,
            function: "Mixer::mix".to_string(),
            summary: "buffer underrun assertion".to_string(),
        })
    }

    #[test]
    fn trigger_writes_marker() {
        let dir = TempDir::new().unwrap();
        let trigger = AnalysisTrigger::new(dir.path(), Duration::from_millis(10));
        trigger.trigger(&request("crash_1")).unwrap();

        let marker = TriggerMarker::load(dir.path(), "crash_1").unwrap();
        assert_eq!(marker.request_id, "crash_1");
        assert_eq!(marker.crash_id, "crash_1");
    }

    #[test]
    fn trigger_twice_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let trigger = AnalysisTrigger::new(dir.path(), Duration::from_millis(10));
        trigger.trigger(&request("crash_1")).unwrap();
        trigger.trigger(&request("crash_1")).unwrap();
    }

    #[test]
    fn await_response_times_out() {
        let dir = TempDir::new().unwrap();
        let trigger = AnalysisTrigger::new(dir.path(), Duration::from_millis(5));
        let result = trigger.await_response("crash_1", Duration::from_millis(40));
        assert!(matches!(result, Err(CrashfixError::Timeout(id)) if id == "crash_1"));
    }

    #[test]
    fn await_response_returns_once_written() {
        let dir = TempDir::new().unwrap();
        let queue = dir.path().to_path_buf();

        let writer = std::thread::spawn({
            let queue = queue.clone();
            move || {
                std::thread::sleep(Duration::from_millis(30));
                AnalysisResponse {
                    request_id: "crash_1".to_string(),
                    proposal: FixProposal {
                        files: vec![FileChange {
                            path: "src/audio/mixer.cpp".to_string(),
                            content: "// patched\n".to_string(),
                        }],
                        strategy: "clamp".to_string(),
                        root_cause: "underrun".to_string(),
                    },
                    created_at: Utc::now(),
                }
                .save(&queue)
                .unwrap();
            }
        });

        let trigger = AnalysisTrigger::new(&queue, Duration::from_millis(5));
        let resp = trigger
            .await_response("crash_1", Duration::from_secs(5))
            .unwrap();
        assert_eq!(resp.request_id, "crash_1");
        writer.join().unwrap();
    }
}
