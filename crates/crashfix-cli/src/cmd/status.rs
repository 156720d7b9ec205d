use crate::output::{print_json, print_table};
use anyhow::Context;
use crashfix_core::{
    config::Config,
    store::RequestStore,
    types::{AnalysisResponse, ApprovalDecision, ApprovalStatus, DeploymentRecord, RequestStatus},
};
use std::path::Path;

/// Effective state of one request, derived from the queue files.
fn derive_state(queue_root: &Path, id: &str, status: RequestStatus) -> String {
    if DeploymentRecord::exists(queue_root, id) {
        return "deployed".to_string();
    }
    if let Ok(decision) = ApprovalDecision::load(queue_root, id) {
        return match decision.status {
            ApprovalStatus::Pending => "awaiting_review".to_string(),
            other => other.to_string(),
        };
    }
    if AnalysisResponse::exists(queue_root, id) {
        return "response_ready".to_string();
    }
    status.to_string()
}

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let queue_root = config.queue_root_abs(root);
    let store = RequestStore::new(&queue_root);
    let requests = store.list_all().context("failed to list requests")?;

    if json {
        #[derive(serde::Serialize)]
        struct RequestSummary<'a> {
            id: &'a str,
            state: String,
            category: &'a str,
            crash_id: &'a str,
            summary: &'a str,
        }

        #[derive(serde::Serialize)]
        struct StatusOutput<'a> {
            queue_root: String,
            requests: Vec<RequestSummary<'a>>,
        }

        let summaries: Vec<RequestSummary> = requests
            .iter()
            .map(|r| RequestSummary {
                id: &r.id,
                state: derive_state(&queue_root, &r.id, r.status),
                category: &r.crash.category,
                crash_id: &r.crash.crash_id,
                summary: &r.crash.summary,
            })
            .collect();

        return print_json(&StatusOutput {
            queue_root: queue_root.display().to_string(),
            requests: summaries,
        });
    }

    if requests.is_empty() {
        println!("No analysis requests in {}", queue_root.display());
        return Ok(());
    }

    let rows: Vec<Vec<String>> = requests
        .iter()
        .map(|r| {
            vec![
                r.id.clone(),
                derive_state(&queue_root, &r.id, r.status),
                r.crash.category.clone(),
                r.crash.summary.clone(),
            ]
        })
        .collect();
    print_table(&["REQUEST", "STATE", "CATEGORY", "SUMMARY"], rows);
    Ok(())
}
