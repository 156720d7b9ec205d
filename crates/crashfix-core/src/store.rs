//! Durable request queue scanning.
//!
//! Requests live as individual files under `requests/`; the store never
//! holds them in memory between polls. Scans are filtered against three
//! things: the on-disk response (the request is already being answered),
//! the on-disk deployment marker (the request is terminally handled), and
//! the caller-owned [`ProcessedSet`] for this process lifetime. Unreadable
//! records are skipped with a warning — a transient I/O error on one
//! request must never stall the others.

use crate::error::Result;
use crate::paths;
use crate::types::{AnalysisRequest, AnalysisResponse, DeploymentRecord, RequestStatus};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::warn;

// ---------------------------------------------------------------------------
// ProcessedSet
// ---------------------------------------------------------------------------

/// In-memory de-duplication for one orchestrator lifetime.
///
/// Owned by the orchestrator and passed by reference into scans — never a
/// package-level singleton. Durable de-duplication across restarts is the
/// deployment marker and the approval status, not this set.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    seen: HashSet<String>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the id was newly inserted.
    pub fn insert(&mut self, id: &str) -> bool {
        self.seen.insert(id.to_string())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.seen.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// ---------------------------------------------------------------------------
// RequestStore
// ---------------------------------------------------------------------------

pub struct RequestStore {
    queue_root: PathBuf,
}

impl RequestStore {
    pub fn new(queue_root: impl Into<PathBuf>) -> Self {
        Self {
            queue_root: queue_root.into(),
        }
    }

    pub fn queue_root(&self) -> &Path {
        &self.queue_root
    }

    /// All parseable requests, in file enumeration order.
    pub fn list_all(&self) -> Result<Vec<AnalysisRequest>> {
        let mut requests = Vec::new();
        for id in enumerate_ids(&paths::requests_dir(&self.queue_root), paths::REQUEST_PREFIX)? {
            match AnalysisRequest::load(&self.queue_root, &id) {
                Ok(req) => requests.push(req),
                Err(e) => warn!(request = %id, error = %e, "skipping unreadable request"),
            }
        }
        Ok(requests)
    }

    /// PENDING requests with no response, no deployment marker, and not yet
    /// seen by this process. Discovery order; requests are independent, so
    /// no ordering is promised across ids.
    pub fn scan_pending(&self, processed: &ProcessedSet) -> Result<Vec<AnalysisRequest>> {
        let mut pending = Vec::new();
        for req in self.list_all()? {
            if req.status != RequestStatus::Pending {
                continue;
            }
            if processed.contains(&req.id) {
                continue;
            }
            if AnalysisResponse::exists(&self.queue_root, &req.id) {
                continue;
            }
            if DeploymentRecord::exists(&self.queue_root, &req.id) {
                continue;
            }
            pending.push(req);
        }
        Ok(pending)
    }

    /// Record that a trigger marker has been emitted for `id` by flipping
    /// the request to IN_PROGRESS in place. Idempotent: a request already
    /// in progress (or already gone) is not an error.
    pub fn mark_triggered(&self, id: &str) -> Result<()> {
        let mut req = match AnalysisRequest::load(&self.queue_root, id) {
            Ok(req) => req,
            Err(e) => {
                warn!(request = %id, error = %e, "mark_triggered: request unreadable");
                return Ok(());
            }
        };
        if req.status == RequestStatus::InProgress {
            return Ok(());
        }
        req.status = RequestStatus::InProgress;
        req.save(&self.queue_root)
    }

    /// Flip a request back to PENDING so a later pass re-triggers it.
    /// Used when analysis times out without producing a response.
    pub fn requeue(&self, id: &str) -> Result<()> {
        let mut req = AnalysisRequest::load(&self.queue_root, id)?;
        if req.status == RequestStatus::Pending {
            return Ok(());
        }
        req.status = RequestStatus::Pending;
        req.save(&self.queue_root)
    }

    /// Responses that have not yet reached a terminal deployment marker,
    /// in file enumeration order.
    pub fn scan_response_ready(&self) -> Result<Vec<AnalysisResponse>> {
        let mut ready = Vec::new();
        for id in enumerate_ids(&paths::responses_dir(&self.queue_root), paths::RESPONSE_PREFIX)? {
            if DeploymentRecord::exists(&self.queue_root, &id) {
                continue;
            }
            match AnalysisResponse::load(&self.queue_root, &id) {
                Ok(resp) => ready.push(resp),
                Err(e) => warn!(request = %id, error = %e, "skipping unreadable response"),
            }
        }
        Ok(ready)
    }
}

/// Ids of records in `dir` whose filename starts with `prefix`.
/// A missing directory is an empty queue, not an error.
pub(crate) fn enumerate_ids(dir: &Path, prefix: &str) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    if !dir.exists() {
        return Ok(ids);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(id) = name.strip_prefix(prefix) {
            if paths::validate_request_id(id).is_ok() {
                ids.push(id.to_string());
            }
        }
    }
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
