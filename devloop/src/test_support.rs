//! Scripted collaborators and fixtures for loop tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::run_state::{PublishRecord, RunPolicy, RunState, TaskIdentity};
use crate::core::types::{
    CheckDefinition, CheckOutcome, CheckOutcomes, CheckStatus, FileChange,
};
use crate::io::checks::CheckRunner;
use crate::io::generation::{GenerationError, GenerationRequest, GenerationResponse, Generator};
use crate::io::publish::Publisher;
use crate::io::workspace::Workspace;

/// Returns queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedGenerator {
    script: RefCell<VecDeque<Result<GenerationResponse, GenerationError>>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(script: Vec<Result<GenerationResponse, GenerationError>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        self.requests.borrow_mut().push(request.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(GenerationError::Unreachable(
                    "generator script exhausted".to_string(),
                ))
            })
    }
}

/// Returns queued check results in order. `Err` entries simulate runner faults.
#[derive(Default)]
pub struct ScriptedCheckRunner {
    script: RefCell<VecDeque<Result<CheckOutcomes, String>>>,
    calls: Cell<usize>,
}

impl ScriptedCheckRunner {
    pub fn new(script: Vec<Result<CheckOutcomes, String>>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl CheckRunner for ScriptedCheckRunner {
    fn run_checks(
        &self,
        _project_path: &Path,
        _checks: &[CheckDefinition],
    ) -> Result<CheckOutcomes> {
        self.calls.set(self.calls.get() + 1);
        match self.script.borrow_mut().pop_front() {
            Some(Ok(outcomes)) => Ok(outcomes),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("check script exhausted")),
        }
    }
}

/// Records applied changes without touching the filesystem.
#[derive(Default)]
pub struct RecordingWorkspace {
    applied: RefCell<Vec<Vec<FileChange>>>,
    fail_with: Option<String>,
}

impl RecordingWorkspace {
    pub fn failing(message: &str) -> Self {
        Self {
            applied: RefCell::new(Vec::new()),
            fail_with: Some(message.to_string()),
        }
    }

    pub fn applied(&self) -> Vec<Vec<FileChange>> {
        self.applied.borrow().clone()
    }
}

impl Workspace for RecordingWorkspace {
    fn apply(&self, _root: &Path, changes: &[FileChange]) -> Result<Vec<String>> {
        if let Some(message) = &self.fail_with {
            return Err(anyhow!(message.clone()));
        }
        self.applied.borrow_mut().push(changes.to_vec());
        Ok(changes.iter().map(|c| c.path.clone()).collect())
    }
}

/// Returns a fixed publish result and counts calls.
pub struct RecordingPublisher {
    result: Result<PublishRecord, String>,
    calls: Cell<usize>,
}

impl RecordingPublisher {
    pub fn succeeding(branch: &str, revision: &str) -> Self {
        Self {
            result: Ok(PublishRecord {
                branch: Some(branch.to_string()),
                revision: Some(revision.to_string()),
                reference_url: None,
                reference_number: None,
            }),
            calls: Cell::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, _state: &RunState) -> Result<PublishRecord> {
        self.calls.set(self.calls.get() + 1);
        self.result.clone().map_err(|message| anyhow!(message))
    }
}

/// A response proposing `paths`, each with short content.
pub fn response(paths: &[&str]) -> GenerationResponse {
    GenerationResponse {
        files: paths
            .iter()
            .map(|path| FileChange::upsert(*path, format!("# {path}\n")))
            .collect(),
        notes: format!("generated {} files", paths.len()),
    }
}

pub fn outcome(name: &str, status: CheckStatus, critical: bool) -> CheckOutcome {
    CheckOutcome {
        name: name.to_string(),
        status,
        exit_code: match status {
            CheckStatus::Pass => Some(0),
            CheckStatus::Fail => Some(1),
            CheckStatus::Error | CheckStatus::Skip => None,
        },
        output: format!("{name} output"),
        duration_ms: 1,
        critical,
    }
}

/// `test` is critical, everything else is not.
pub fn outcomes(entries: &[(&str, CheckStatus)]) -> CheckOutcomes {
    entries
        .iter()
        .map(|(name, status)| outcome(name, *status, *name == "test"))
        .collect()
}

pub fn task_identity(project_path: impl Into<PathBuf>) -> TaskIdentity {
    TaskIdentity {
        task_key: "PROJ-7".to_string(),
        task_description: "Add a greeting endpoint".to_string(),
        project_name: "demo".to_string(),
        project_path: project_path.into(),
        language: "python".to_string(),
    }
}

pub fn run_state(max_iterations: u32, dry_run: bool) -> RunState {
    // Construction only fails for a zero budget, which callers never pass.
    RunState::new(
        "run-test",
        task_identity("/tmp/devloop-test-project"),
        RunPolicy {
            max_iterations,
            dry_run,
            model: "test-model".to_string(),
        },
    )
    .expect("valid run state")
}
