//! Human approval gate for the gated deployment policy.
//!
//! `request_review` renders a plain-text review document and creates a
//! `pending` decision record, then returns — it never blocks. A reviewer
//! flips the record with `crashfix approve`/`reject` (or by any other
//! means that writes the same YAML). Only `approved` records with no
//! deployment marker are eligible for deployment; `rejected` is terminal.
//!
//! Single-request state machine:
//! `response-generated → awaiting-review → {approved → deployed} | {rejected}`
//! A record that is neither approved nor rejected is still awaiting and
//! re-polled.

use crate::error::{CrashfixError, Result};
use crate::paths;
use crate::store::enumerate_ids;
use crate::types::{
    AnalysisRequest, AnalysisResponse, ApprovalDecision, ApprovalStatus, DeploymentRecord,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct ApprovalGate {
    queue_root: PathBuf,
}

impl ApprovalGate {
    pub fn new(queue_root: impl Into<PathBuf>) -> Self {
        Self {
            queue_root: queue_root.into(),
        }
    }

    /// Render the review document for `response` and ensure a `pending`
    /// decision record exists. Idempotent: an existing decision is never
    /// clobbered, so a re-render cannot un-approve or un-reject a fix.
    pub fn request_review(&self, response: &AnalysisResponse) -> Result<()> {
        let id = &response.request_id;
        paths::validate_request_id(id)?;

        let request = AnalysisRequest::load(&self.queue_root, id).ok();
        let doc = render_review(response, request.as_ref());
        crate::io::atomic_write(&paths::review_path(&self.queue_root, id), doc.as_bytes())?;

        let decision = ApprovalDecision::pending(id.clone());
        let data = serde_yaml::to_string(&decision)?;
        let created = crate::io::write_if_missing(
            &paths::approval_path(&self.queue_root, id),
            data.as_bytes(),
        )?;
        if created {
            info!(request = %id, "review requested");
        }
        Ok(())
    }

    /// Decisions still awaiting a verdict. Anything non-terminal and not
    /// yet approved counts as awaiting.
    pub fn scan_awaiting(&self) -> Result<Vec<ApprovalDecision>> {
        self.scan(|d| d.status == ApprovalStatus::Pending)
    }

    /// Approved decisions with no deployment marker — the only records the
    /// deployment manager is allowed to act on.
    pub fn scan_approved(&self) -> Result<Vec<ApprovalDecision>> {
        let queue_root = self.queue_root.clone();
        self.scan(move |d| {
            d.status == ApprovalStatus::Approved
                && !DeploymentRecord::exists(&queue_root, &d.request_id)
        })
    }

    fn scan(
        &self,
        keep: impl Fn(&ApprovalDecision) -> bool,
    ) -> Result<Vec<ApprovalDecision>> {
        let mut decisions = Vec::new();
        for id in enumerate_ids(
            &paths::approvals_dir(&self.queue_root),
            paths::APPROVAL_PREFIX,
        )? {
            match ApprovalDecision::load(&self.queue_root, &id) {
                Ok(d) if keep(&d) => decisions.push(d),
                Ok(_) => {}
                Err(e) => warn!(request = %id, error = %e, "skipping unreadable approval"),
            }
        }
        Ok(decisions)
    }

    /// Record a human verdict on an awaiting review.
    pub fn decide(
        &self,
        id: &str,
        approved: bool,
        approver: Option<String>,
        comment: Option<String>,
    ) -> Result<ApprovalDecision> {
        let mut decision = ApprovalDecision::load(&self.queue_root, id)?;
        if decision.status != ApprovalStatus::Pending {
            return Err(CrashfixError::ApprovalWrongStatus {
                id: id.to_string(),
                status: decision.status.to_string(),
                expected: ApprovalStatus::Pending.to_string(),
            });
        }
        decision.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        decision.approver = approver;
        decision.comment = comment.clone();
        decision.updated_at = Utc::now();
        decision.save(&self.queue_root)?;

        if !approved {
            // The review artifact states what happened; a rejected fix must
            // be legible without reading the YAML.
            let note = match &comment {
                Some(c) => format!("\nREJECTED at {}: {c}\n", decision.updated_at.to_rfc3339()),
                None => format!("\nREJECTED at {}\n", decision.updated_at.to_rfc3339()),
            };
            crate::io::append_text(&paths::review_path(&self.queue_root, id), &note)?;
        }

        info!(request = %id, status = %decision.status, "approval decision recorded");
        Ok(decision)
    }

    /// Transition `approved → deployed` after a successful deployment.
    pub fn mark_deployed(&self, id: &str) -> Result<()> {
        self.transition_from_approved(id, ApprovalStatus::Deployed)
    }

    /// Transition `approved → deploy_failed` when the approved fix did not
    /// build during deployment. Terminal by design.
    pub fn mark_deploy_failed(&self, id: &str) -> Result<()> {
        self.transition_from_approved(id, ApprovalStatus::DeployFailed)
    }

    fn transition_from_approved(&self, id: &str, to: ApprovalStatus) -> Result<()> {
        let mut decision = ApprovalDecision::load(&self.queue_root, id)?;
        if decision.status != ApprovalStatus::Approved {
            return Err(CrashfixError::ApprovalWrongStatus {
                id: id.to_string(),
                status: decision.status.to_string(),
                expected: ApprovalStatus::Approved.to_string(),
            });
        }
        decision.status = to;
        decision.updated_at = Utc::now();
        decision.save(&self.queue_root)
    }
}

fn render_review(response: &AnalysisResponse, request: Option<&AnalysisRequest>) -> String {
    let mut doc = String::new();
    doc.push_str("CRASH FIX REVIEW\n");
    doc.push_str("================\n\n");
    doc.push_str(&format!("Request:     {}\n", response.request_id));
    if let Some(req) = request {
        doc.push_str(&format!("Crash:       {}\n", req.crash.crash_id));
        doc.push_str(&format!("Category:    {}\n", req.crash.category));
        doc.push_str(&format!(
            "Location:    {}:{} in {}\n",
            req.crash.source_file, req.crash.source_line, req.crash.function
        ));
        doc.push_str(&format!("Summary:     {}\n", req.crash.summary));
    }
    doc.push_str(&format!(
        "Generated:   {}\n\n",
        response.created_at.to_rfc3339()
    ));
    doc.push_str(&format!("Root cause:  {}\n", response.proposal.root_cause));
    doc.push_str(&format!("Strategy:    {}\n\n", response.proposal.strategy));
    doc.push_str("Files changed (full replacement):\n");
    for file in &response.proposal.files {
        doc.push_str(&format!("  - {} ({} bytes)\n", file.path, file.content.len()));
    }
    doc.push_str(&format!(
        "\nTo act on this fix:\n  crashfix approve {id}\n  crashfix reject {id} --comment \"...\"\n",
        id = response.request_id
    ));
    doc
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
