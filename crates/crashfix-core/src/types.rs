//! Queue record types.
//!
//! Every record is a small YAML document under the queue root. Records are
//! written with [`crate::io::atomic_write`] so a concurrent scan never sees
//! a partial document. Field names and timestamp formats round-trip exactly;
//! the external crash ingester and analysis agent read and write the same
//! files.

use crate::error::{CrashfixError, Result};
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// CrashReport
// ---------------------------------------------------------------------------

/// Structured description of a single crash, produced by the ingester.
/// Immutable once created — the orchestrator only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrashReport {
    pub crash_id: String,
    pub category: String,
    pub source_file: String,
    pub source_line: u32,
    pub function: String,
    pub summary: String,
}

// ---------------------------------------------------------------------------
// AnalysisRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::InProgress => write!(f, "in_progress"),
        }
    }
}

/// A crash awaiting (or undergoing) analysis. The id is stable and derived
/// from the crash, so re-ingesting the same crash maps to the same file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub id: String,
    pub crash: CrashReport,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRequest {
    pub fn new(crash: CrashReport) -> Self {
        Self {
            id: crash.crash_id.clone(),
            crash,
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn load(queue_root: &Path, id: &str) -> Result<Self> {
        paths::validate_request_id(id)?;
        let path = paths::request_path(queue_root, id);
        if !path.exists() {
            return Err(CrashfixError::RequestNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, queue_root: &Path) -> Result<()> {
        paths::validate_request_id(&self.id)?;
        let path = paths::request_path(queue_root, &self.id);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// AnalysisResponse / FixProposal
// ---------------------------------------------------------------------------

/// One file in a fix proposal: a full replacement, never a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixProposal {
    pub files: Vec<FileChange>,
    pub strategy: String,
    pub root_cause: String,
}

/// Written once by the external analysis agent; read-only to the
/// orchestrator. Acted on at most once — see the deployment marker and
/// approval-status de-duplication in `deploy` and `approval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub request_id: String,
    pub proposal: FixProposal,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResponse {
    pub fn load(queue_root: &Path, id: &str) -> Result<Self> {
        paths::validate_request_id(id)?;
        let path = paths::response_path(queue_root, id);
        if !path.exists() {
            return Err(CrashfixError::RequestNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    /// Present in the orchestrator only for tests and tooling — production
    /// responses come from the analysis agent.
    pub fn save(&self, queue_root: &Path) -> Result<()> {
        paths::validate_request_id(&self.request_id)?;
        let path = paths::response_path(queue_root, &self.request_id);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn exists(queue_root: &Path, id: &str) -> bool {
        paths::response_path(queue_root, id).exists()
    }
}

// ---------------------------------------------------------------------------
// ApprovalDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Deployed,
    /// An approved fix that failed to build during deployment. Terminal —
    /// re-queueing a fix known not to compile would burn a build every poll.
    DeployFailed,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ApprovalStatus::Rejected | ApprovalStatus::Deployed | ApprovalStatus::DeployFailed
        )
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::Deployed => write!(f, "deployed"),
            ApprovalStatus::DeployFailed => write!(f, "deploy_failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub request_id: String,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn pending(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            status: ApprovalStatus::Pending,
            approver: None,
            comment: None,
            updated_at: Utc::now(),
        }
    }

    pub fn load(queue_root: &Path, id: &str) -> Result<Self> {
        paths::validate_request_id(id)?;
        let path = paths::approval_path(queue_root, id);
        if !path.exists() {
            return Err(CrashfixError::ApprovalNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, queue_root: &Path) -> Result<()> {
        paths::validate_request_id(&self.request_id)?;
        let path = paths::approval_path(queue_root, &self.request_id);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }
}

// ---------------------------------------------------------------------------
// DeploymentRecord
// ---------------------------------------------------------------------------

/// Terminal marker for a request: written at the end of a deployment
/// attempt regardless of push/restart outcome, never rewritten afterwards.
/// Its presence is what makes deployment at-most-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub request_id: String,
    pub compiled: bool,
    pub committed: bool,
    pub pushed: bool,
    pub deployed: bool,
    pub branch: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn load(queue_root: &Path, id: &str) -> Result<Self> {
        paths::validate_request_id(id)?;
        let path = paths::deployed_path(queue_root, id);
        if !path.exists() {
            return Err(CrashfixError::RequestNotFound(id.to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn save(&self, queue_root: &Path) -> Result<()> {
        paths::validate_request_id(&self.request_id)?;
        let path = paths::deployed_path(queue_root, &self.request_id);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn exists(queue_root: &Path, id: &str) -> bool {
        paths::deployed_path(queue_root, id).exists()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
