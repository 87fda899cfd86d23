//! In-memory record of one workflow run.
//!
//! The controller is the only writer. Every mutation goes through a method that
//! enforces the run invariants:
//!
//! - `current_iteration` starts at 1, only increases, and never exceeds
//!   `max_iterations`.
//! - Once an iteration has been recorded, `iterations.len() == current_iteration`.
//! - An iteration's verdict moves from `pending` to a terminal value exactly once.
//! - Earlier iterations are never edited after the next one begins.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::core::gate::GateReport;
use crate::core::types::{CheckOutcomes, IterationResult, Verdict};

/// Violations of the run invariants. These indicate controller bugs, not task
/// failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunStateError {
    #[error("max_iterations must be >= 1")]
    InvalidMaxIterations,
    #[error("expected iteration {expected} but got {got}")]
    IterationOutOfOrder { expected: u32, got: u32 },
    #[error("iteration {iteration} is already recorded")]
    AlreadyRecorded { iteration: u32 },
    #[error("iteration {iteration} must be recorded as pending")]
    NotPending { iteration: u32 },
    #[error("no iteration recorded for {iteration}")]
    NotRecorded { iteration: u32 },
    #[error("iteration {iteration} already has verdict {verdict}")]
    AlreadyEvaluated { iteration: u32, verdict: Verdict },
    #[error("cannot store a pending verdict")]
    PendingVerdict,
    #[error("iteration {iteration} has not been evaluated")]
    NotEvaluated { iteration: u32 },
    #[error("iteration budget of {max_iterations} exhausted")]
    BudgetExhausted { max_iterations: u32 },
}

/// What the run is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskIdentity {
    /// Opaque task key, e.g. an issue identifier.
    pub task_key: String,
    pub task_description: String,
    pub project_name: String,
    pub project_path: PathBuf,
    pub language: String,
}

/// Per-run policy fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunPolicy {
    pub max_iterations: u32,
    /// Suppresses side-effecting publish actions.
    pub dry_run: bool,
    pub model: String,
}

/// Outputs of the publish step, filled in after the loop ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishRecord {
    pub branch: Option<String>,
    pub revision: Option<String>,
    pub reference_url: Option<String>,
    pub reference_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunState {
    run_id: String,
    task: TaskIdentity,
    policy: RunPolicy,
    current_iteration: u32,
    iterations: Vec<IterationResult>,
    publish: Option<PublishRecord>,
}

impl RunState {
    pub fn new(
        run_id: impl Into<String>,
        task: TaskIdentity,
        policy: RunPolicy,
    ) -> Result<Self, RunStateError> {
        if policy.max_iterations == 0 {
            return Err(RunStateError::InvalidMaxIterations);
        }
        Ok(Self {
            run_id: run_id.into(),
            task,
            policy,
            current_iteration: 1,
            iterations: Vec::new(),
            publish: None,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn task(&self) -> &TaskIdentity {
        &self.task
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    pub fn max_iterations(&self) -> u32 {
        self.policy.max_iterations
    }

    /// 1-based number of the iteration in progress (or last completed).
    pub fn current_iteration(&self) -> u32 {
        self.current_iteration
    }

    pub fn iterations(&self) -> &[IterationResult] {
        &self.iterations
    }

    /// The record for `current_iteration`, if it has been recorded.
    pub fn current(&self) -> Option<&IterationResult> {
        self.iterations
            .get(self.current_iteration as usize - 1)
            .filter(|it| it.iteration == self.current_iteration)
    }

    pub fn last(&self) -> Option<&IterationResult> {
        self.iterations.last()
    }

    /// Critique from the most recent evaluated iteration, fed to the next attempt.
    pub fn latest_critique(&self) -> Option<&str> {
        self.iterations
            .last()
            .filter(|it| it.verdict != Verdict::Pending)
            .and_then(|it| it.critique.as_deref())
    }

    /// Verdict of the last iteration, or `Pending` when nothing was recorded.
    pub fn final_verdict(&self) -> Verdict {
        self.iterations
            .last()
            .map(|it| it.verdict)
            .unwrap_or(Verdict::Pending)
    }

    pub fn publish(&self) -> Option<&PublishRecord> {
        self.publish.as_ref()
    }

    /// Append the pending result for the current iteration.
    pub fn record_iteration(&mut self, result: IterationResult) -> Result<(), RunStateError> {
        if result.iteration != self.current_iteration {
            return Err(RunStateError::IterationOutOfOrder {
                expected: self.current_iteration,
                got: result.iteration,
            });
        }
        if self.iterations.len() as u32 >= self.current_iteration {
            return Err(RunStateError::AlreadyRecorded {
                iteration: result.iteration,
            });
        }
        if result.verdict != Verdict::Pending {
            return Err(RunStateError::NotPending {
                iteration: result.iteration,
            });
        }
        self.iterations.push(result);
        Ok(())
    }

    /// Store the gate's evaluation on the current iteration. Allowed exactly once.
    pub fn complete_review(
        &mut self,
        checks: CheckOutcomes,
        report: GateReport,
    ) -> Result<Verdict, RunStateError> {
        let iteration = self.current_iteration;
        if report.verdict == Verdict::Pending {
            return Err(RunStateError::PendingVerdict);
        }
        let current = self
            .iterations
            .get_mut(iteration as usize - 1)
            .ok_or(RunStateError::NotRecorded { iteration })?;
        if current.verdict != Verdict::Pending {
            return Err(RunStateError::AlreadyEvaluated {
                iteration,
                verdict: current.verdict,
            });
        }
        current.checks = checks;
        current.critique = report.critique;
        current.verdict = report.verdict;
        Ok(current.verdict)
    }

    /// Move to the next iteration. The current one must be evaluated and the budget
    /// must allow another pass.
    pub fn advance(&mut self) -> Result<u32, RunStateError> {
        let iteration = self.current_iteration;
        match self.current() {
            None => return Err(RunStateError::NotRecorded { iteration }),
            Some(current) if current.verdict == Verdict::Pending => {
                return Err(RunStateError::NotEvaluated { iteration });
            }
            Some(_) => {}
        }
        if iteration >= self.policy.max_iterations {
            return Err(RunStateError::BudgetExhausted {
                max_iterations: self.policy.max_iterations,
            });
        }
        self.current_iteration += 1;
        Ok(self.current_iteration)
    }

    pub fn set_publish(&mut self, record: PublishRecord) {
        self.publish = Some(record);
    }
}
