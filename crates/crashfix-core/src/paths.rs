use crate::error::{CrashfixError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

/// Runtime state directory at the repository root.
pub const CRASHFIX_DIR: &str = ".crashfix";

pub const REQUESTS_DIR: &str = "requests";
pub const RESPONSES_DIR: &str = "responses";
pub const APPROVALS_DIR: &str = "approvals";
pub const TRIGGERS_DIR: &str = "auto_process";
pub const DEPLOYED_DIR: &str = "overnight_deployed";
pub const REVIEWS_DIR: &str = "reviews";

pub const CONFIG_FILE: &str = ".crashfix/config.yaml";
pub const LOCK_FILE: &str = ".crashfix/orchestrator.lock";
pub const LOG_FILE: &str = ".crashfix/crashfix.log";

pub const REQUEST_PREFIX: &str = "request_";
pub const RESPONSE_PREFIX: &str = "response_";
pub const APPROVAL_PREFIX: &str = "approval_";
pub const TRIGGER_PREFIX: &str = "process_";
pub const DEPLOYED_PREFIX: &str = "deployed_";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn crashfix_dir(root: &Path) -> PathBuf {
    root.join(CRASHFIX_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn lock_path(root: &Path) -> PathBuf {
    root.join(LOCK_FILE)
}

pub fn log_path(root: &Path) -> PathBuf {
    root.join(LOG_FILE)
}

pub fn requests_dir(queue_root: &Path) -> PathBuf {
    queue_root.join(REQUESTS_DIR)
}

pub fn responses_dir(queue_root: &Path) -> PathBuf {
    queue_root.join(RESPONSES_DIR)
}

pub fn approvals_dir(queue_root: &Path) -> PathBuf {
    queue_root.join(APPROVALS_DIR)
}

pub fn triggers_dir(queue_root: &Path) -> PathBuf {
    queue_root.join(TRIGGERS_DIR)
}

pub fn deployed_dir(queue_root: &Path) -> PathBuf {
    queue_root.join(DEPLOYED_DIR)
}

pub fn reviews_dir(queue_root: &Path) -> PathBuf {
    queue_root.join(REVIEWS_DIR)
}

pub fn request_path(queue_root: &Path, id: &str) -> PathBuf {
    requests_dir(queue_root).join(format!("{REQUEST_PREFIX}{id}"))
}

pub fn response_path(queue_root: &Path, id: &str) -> PathBuf {
    responses_dir(queue_root).join(format!("{RESPONSE_PREFIX}{id}"))
}

pub fn approval_path(queue_root: &Path, id: &str) -> PathBuf {
    approvals_dir(queue_root).join(format!("{APPROVAL_PREFIX}{id}"))
}

pub fn trigger_path(queue_root: &Path, id: &str) -> PathBuf {
    triggers_dir(queue_root).join(format!("{TRIGGER_PREFIX}{id}"))
}

pub fn deployed_path(queue_root: &Path, id: &str) -> PathBuf {
    deployed_dir(queue_root).join(format!("{DEPLOYED_PREFIX}{id}"))
}

pub fn review_path(queue_root: &Path, id: &str) -> PathBuf {
    reviews_dir(queue_root).join(format!("review_{id}.txt"))
}

/// All queue subdirectories, in scaffold order.
pub fn queue_dirs(queue_root: &Path) -> [PathBuf; 6] {
    [
        requests_dir(queue_root),
        responses_dir(queue_root),
        approvals_dir(queue_root),
        triggers_dir(queue_root),
        deployed_dir(queue_root),
        reviews_dir(queue_root),
    ]
}

// ---------------------------------------------------------------------------
// Request id validation
// ---------------------------------------------------------------------------

static ID_RE: OnceLock<Regex> = OnceLock::new();

fn id_re() -> &'static Regex {
    ID_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]*$").unwrap())
}

/// Request ids become filename suffixes, so reject anything that could
/// escape the queue directory or collide across platforms.
pub fn validate_request_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 || !id_re().is_match(id) {
        return Err(CrashfixError::InvalidRequestId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        for id in ["crash_1", "a", "deadbeef-42", "sig_segv_0x004"] {
            validate_request_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_ids() {
        for id in ["", "_leading", "has space", "UPPER", "../escape", "a/b"] {
            assert!(validate_request_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn path_helpers() {
        let q = Path::new("/tmp/queue");
        assert_eq!(
            request_path(q, "crash_1"),
            PathBuf::from("/tmp/queue/requests/request_crash_1")
        );
        assert_eq!(
            trigger_path(q, "crash_1"),
            PathBuf::from("/tmp/queue/auto_process/process_crash_1")
        );
        assert_eq!(
            deployed_path(q, "crash_1"),
            PathBuf::from("/tmp/queue/overnight_deployed/deployed_crash_1")
        );
    }
}
