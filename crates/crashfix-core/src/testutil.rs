//! Shared fixtures and doubles for unit tests.

use crate::process::{ProcessRunner, RunOutput};
use crate::types::{AnalysisRequest, AnalysisResponse, CrashReport, FileChange, FixProposal};
use chrono::Utc;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

/// A [`ProcessRunner`] that replays scripted outputs in order and records
/// every invocation. An empty script answers with success and no output,
/// so tests only script the calls they care about.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    script: RefCell<VecDeque<RunOutput>>,
    calls: RefCell<Vec<(String, Vec<String>)>>,
    spawned: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, stdout: &str) {
        self.script.borrow_mut().push_back(RunOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            timed_out: false,
        });
    }

    pub fn push_fail(&self, exit_code: i32, stderr: &str) {
        self.script.borrow_mut().push_back(RunOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            timed_out: false,
        });
    }

    pub fn push_timeout(&self) {
        self.script.borrow_mut().push_back(RunOutput {
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        });
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Programs started via `spawn_detached`, in order.
    pub fn spawned(&self) -> Vec<String> {
        self.spawned.borrow().clone()
    }

    /// All invocations as `"program arg1 arg2 …"` strings.
    pub fn commands(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|(program, args)| {
                let mut s = program.clone();
                for a in args {
                    s.push(' ');
                    s.push_str(a);
                }
                s
            })
            .collect()
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        _cwd: &Path,
        _timeout: Duration,
    ) -> crate::error::Result<RunOutput> {
        self.calls.borrow_mut().push((
            program.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));
        Ok(self.script.borrow_mut().pop_front().unwrap_or(RunOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
        }))
    }

    fn spawn_detached(
        &self,
        program: &str,
        _args: &[&str],
        _cwd: &Path,
    ) -> crate::error::Result<u32> {
        self.spawned.borrow_mut().push(program.to_string());
        Ok(4242)
    }
}

pub(crate) fn sample_crash(id: &str) -> CrashReport {
    CrashReport {
        crash_id: id.to_string(),
        category: "null-deref".to_string(),
        source_file: "src/render/mesh.cpp".to_string(),
        source_line: 412,
        function: "Mesh::upload".to_string(),
        summary: "null vertex buffer dereferenced on resize".to_string(),
    }
}

pub(crate) fn seed_request(queue_root: &Path, id: &str) -> AnalysisRequest {
    let req = AnalysisRequest::new(sample_crash(id));
    req.save(queue_root).unwrap();
    req
}

pub(crate) fn seed_response(queue_root: &Path, id: &str, path: &str, content: &str) -> AnalysisResponse {
    let resp = AnalysisResponse {
        request_id: id.to_string(),
        proposal: FixProposal {
            files: vec![FileChange {
                path: path.to_string(),
                content: content.to_string(),
            }],
            strategy: "null guard before upload".to_string(),
            root_cause: "resize frees the buffer mid-upload".to_string(),
        },
        created_at: Utc::now(),
    };
    resp.save(queue_root).unwrap();
    resp
}
