//! Iteration controller: drives generate → review → decide until a stop condition.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! AwaitingGeneration ──ok──▶ AwaitingReview ──▶ Deciding ──continue──▶ AwaitingGeneration
//!        │                                         │
//!        └─err──▶ Stopped(generation_failed)       └─stop──▶ Stopped(reason)
//! ```
//!
//! where `reason` is `completed`, `budget_exhausted` or `cancelled`.
//!
//! Every transition publishes exactly one event. Handlers observe the run but never
//! steer it. After a `completed` or `budget_exhausted` stop the final state is handed
//! to the publisher (skipped in dry-run).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::core::gate::{self, GateReport};
use crate::core::path_filter::{PathPolicy, filter_changes};
use crate::core::policy::{Decision, decide};
use crate::core::run_state::{RunState, RunStateError};
use crate::core::types::{CheckDefinition, CheckOutcomes, IterationResult, Verdict};
use crate::events::{Emitter, EventBus, EventType};
use crate::io::checks::CheckRunner;
use crate::io::generation::{GenerationParams, GenerationRequest, Generator};
use crate::io::publish::Publisher;
use crate::io::workspace::Workspace;

const COMPONENT: &str = "controller";

/// Cooperative cancellation, checked between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run inputs the controller needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub checks: Vec<CheckDefinition>,
    pub path_policy: PathPolicy,
    pub generation: GenerationParams,
    /// Serialized project summary sent with every request.
    pub project_summary: String,
    /// When false the publish step is skipped even outside dry-run.
    pub publish_enabled: bool,
}

/// How the loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// An iteration passed the gate.
    Completed,
    /// The budget ran out without a pass.
    BudgetExhausted,
    GenerationFailed { error: String },
    Cancelled,
    /// A run-state invariant was violated. Indicates a bug, reported instead of panicking.
    InternalError { error: String },
}

impl Termination {
    fn reached_publish(&self) -> bool {
        matches!(self, Termination::Completed | Termination::BudgetExhausted)
    }
}

/// Result of the publish hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishStatus {
    /// The loop never reached the publish step.
    NotAttempted,
    Skipped { reason: String },
    Published,
    Failed { error: String },
}

/// Structured summary returned to the caller. The loop never panics or returns `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    /// True when the loop stopped on a pass or on an exhausted budget (best effort),
    /// and publishing did not fail.
    pub success: bool,
    pub message: String,
    pub termination: Termination,
    pub final_verdict: Verdict,
    /// Number of iterations recorded.
    pub iterations: u32,
    pub publish: PublishStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LoopState {
    AwaitingGeneration,
    AwaitingReview,
    Deciding,
    Stopped(Termination),
}

/// Constraints sent to the generator for `iteration`.
pub fn build_constraints(
    allowed_paths: &[String],
    excluded_paths: &[String],
    language: &str,
    iteration: u32,
) -> Vec<String> {
    let mut constraints = vec![
        format!("Only modify files within: {}", allowed_paths.join(", ")),
        format!("Do not modify: {}", excluded_paths.join(", ")),
        "All code must be production-ready with proper error handling".to_string(),
        "Include tests for new functionality".to_string(),
        format!("Target language: {language}"),
    ];
    if iteration > 1 {
        constraints.push("Address all issues from previous review".to_string());
    }
    constraints
}

/// Critique stored when the review step itself could not run.
fn fault_critique(err: &anyhow::Error) -> String {
    format!(
        "Quality checks could not be run.\n\nError: {err:#}\n\n\
         Please fix these issues and regenerate the code."
    )
}

pub struct Controller<'a, G, C, W, P> {
    generator: &'a G,
    checks: &'a C,
    workspace: &'a W,
    publisher: &'a P,
    bus: &'a EventBus,
    settings: LoopSettings,
    cancel: CancelFlag,
}

impl<'a, G, C, W, P> Controller<'a, G, C, W, P>
where
    G: Generator,
    C: CheckRunner,
    W: Workspace,
    P: Publisher,
{
    pub fn new(
        generator: &'a G,
        checks: &'a C,
        workspace: &'a W,
        publisher: &'a P,
        bus: &'a EventBus,
        settings: LoopSettings,
    ) -> Self {
        Self {
            generator,
            checks,
            workspace,
            publisher,
            bus,
            settings,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Drive `state` to a terminal condition, then publish when appropriate.
    #[instrument(skip_all, fields(run_id = state.run_id(), task_key = %state.task().task_key))]
    pub fn run(&self, state: &mut RunState) -> RunOutcome {
        let run_id = state.run_id().to_string();
        let emitter = Emitter::new(self.bus, &run_id, COMPONENT);

        emitter.emit(
            EventType::Started,
            json!({
                "iteration": state.current_iteration(),
                "max_iterations": state.max_iterations(),
                "task_key": state.task().task_key,
                "language": state.task().language,
                "dry_run": state.policy().dry_run,
                "checks": self.settings.checks.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            }),
        );
        info!(max_iterations = state.max_iterations(), "run started");

        let mut current = LoopState::AwaitingGeneration;
        let termination = loop {
            let step = match current {
                LoopState::AwaitingGeneration => self.generate(state, &emitter),
                LoopState::AwaitingReview => self.review(state, &emitter),
                LoopState::Deciding => self.decide(state, &emitter),
                LoopState::Stopped(termination) => break termination,
            };
            current = step.unwrap_or_else(|err| {
                error!(error = %err, "run state invariant violated");
                LoopState::Stopped(Termination::InternalError {
                    error: err.to_string(),
                })
            });
        };

        let publish = if termination.reached_publish() {
            self.publish(state, &emitter)
        } else {
            PublishStatus::NotAttempted
        };
        self.outcome(state, termination, publish)
    }

    fn generate(
        &self,
        state: &mut RunState,
        emitter: &Emitter<'_>,
    ) -> Result<LoopState, RunStateError> {
        let iteration = state.current_iteration();
        let task = state.task();
        let request = GenerationRequest {
            task_description: task.task_description.clone(),
            project_name: task.project_name.clone(),
            language: task.language.clone(),
            project_summary: self.settings.project_summary.clone(),
            constraints: build_constraints(
                self.settings.path_policy.allowed_rules(),
                self.settings.path_policy.excluded_rules(),
                &task.language,
                iteration,
            ),
            iteration,
            critique: state.latest_critique().map(str::to_string),
            params: self.settings.generation.clone(),
        };

        let response = match self.generator.generate(&request) {
            Ok(response) => response,
            Err(err) => {
                warn!(iteration, error = %err, "generation failed");
                emitter.emit(
                    EventType::GenerationFailed,
                    json!({"iteration": iteration, "kind": err.kind(), "error": err.to_string()}),
                );
                return Ok(LoopState::Stopped(Termination::GenerationFailed {
                    error: err.to_string(),
                }));
            }
        };

        let proposed = response.files.len();
        let report = filter_changes(&self.settings.path_policy, response.files);
        for rejected in &report.rejected {
            warn!(
                iteration,
                path = %rejected.path,
                reason = %rejected.reason,
                "rejected generated file"
            );
            emitter.emit(
                EventType::FileRejected,
                json!({
                    "iteration": iteration,
                    "path": rejected.path,
                    "reason": rejected.reason.kind(),
                    "detail": rejected.reason.to_string(),
                }),
            );
        }

        let accepted: Vec<String> = report.accepted.iter().map(|f| f.path.clone()).collect();
        let rejected = report.rejected.len() as u32;
        state.record_iteration(IterationResult::pending(
            iteration,
            report.accepted,
            rejected,
            response.notes,
        ))?;

        info!(iteration, proposed, accepted = accepted.len(), rejected, "generated");
        emitter.emit(
            EventType::Generated,
            json!({
                "iteration": iteration,
                "proposed": proposed,
                "accepted": accepted,
                "rejected": rejected,
            }),
        );
        Ok(LoopState::AwaitingReview)
    }

    fn review(
        &self,
        state: &mut RunState,
        emitter: &Emitter<'_>,
    ) -> Result<LoopState, RunStateError> {
        let iteration = state.current_iteration();
        let files = state
            .current()
            .map(|it| it.files.clone())
            .ok_or(RunStateError::NotRecorded { iteration })?;
        let project_path = state.task().project_path.clone();

        let checked = self
            .workspace
            .apply(&project_path, &files)
            .and_then(|_| self.checks.run_checks(&project_path, &self.settings.checks));

        match checked {
            Ok(outcomes) => {
                let report = gate::evaluate(&outcomes);
                let summary: Vec<_> = outcomes
                    .iter()
                    .map(|o| json!({"name": o.name, "status": o.status, "critical": o.critical}))
                    .collect();
                let verdict = state.complete_review(outcomes, report)?;
                let event_type = match verdict {
                    Verdict::Pass => EventType::ReviewPassed,
                    Verdict::SoftFail => EventType::ReviewSoftFail,
                    Verdict::HardFail | Verdict::Pending => EventType::ReviewHardFail,
                };
                info!(iteration, verdict = %verdict, "reviewed");
                emitter.emit(
                    event_type,
                    json!({"iteration": iteration, "verdict": verdict, "checks": summary}),
                );
            }
            Err(err) => {
                warn!(iteration, error = %format!("{err:#}"), "review could not run");
                state.complete_review(
                    CheckOutcomes::new(),
                    GateReport {
                        verdict: Verdict::HardFail,
                        critique: Some(fault_critique(&err)),
                    },
                )?;
                emitter.emit(
                    EventType::ReviewFailed,
                    json!({
                        "iteration": iteration,
                        "verdict": Verdict::HardFail,
                        "error": format!("{err:#}"),
                    }),
                );
            }
        }
        Ok(LoopState::Deciding)
    }

    fn decide(
        &self,
        state: &mut RunState,
        emitter: &Emitter<'_>,
    ) -> Result<LoopState, RunStateError> {
        let iteration = state.current_iteration();
        let verdict = state
            .current()
            .map(|it| it.verdict)
            .ok_or(RunStateError::NotRecorded { iteration })?;

        match decide(verdict, iteration, state.max_iterations()) {
            Decision::StopPassed => {
                emitter.emit(
                    EventType::Completed,
                    json!({"iteration": iteration, "verdict": verdict}),
                );
                Ok(LoopState::Stopped(Termination::Completed))
            }
            Decision::StopBudgetExhausted => {
                emitter.emit(
                    EventType::MaxIterationsReached,
                    json!({
                        "iteration": iteration,
                        "max_iterations": state.max_iterations(),
                        "verdict": verdict,
                    }),
                );
                Ok(LoopState::Stopped(Termination::BudgetExhausted))
            }
            Decision::Continue if self.cancel.is_cancelled() => {
                info!(iteration, "cancelled between iterations");
                emitter.emit(
                    EventType::Cancelled,
                    json!({"iteration": iteration, "verdict": verdict}),
                );
                Ok(LoopState::Stopped(Termination::Cancelled))
            }
            Decision::Continue => {
                let next = state.advance()?;
                emitter.emit(
                    EventType::IterationStarted,
                    json!({
                        "iteration": next,
                        "previous_verdict": verdict,
                        "critique_chars": state.latest_critique().map_or(0, |c| c.chars().count()),
                    }),
                );
                Ok(LoopState::AwaitingGeneration)
            }
        }
    }

    fn publish(&self, state: &mut RunState, emitter: &Emitter<'_>) -> PublishStatus {
        let skip_reason = if state.policy().dry_run {
            Some("dry_run")
        } else if !self.settings.publish_enabled {
            Some("disabled")
        } else {
            None
        };
        if let Some(reason) = skip_reason {
            emitter.emit(EventType::PublishSkipped, json!({"reason": reason}));
            return PublishStatus::Skipped {
                reason: reason.to_string(),
            };
        }

        match self.publisher.publish(state) {
            Ok(record) if record.branch.is_none() && record.revision.is_none() => {
                emitter.emit(EventType::PublishSkipped, json!({"reason": "no_changes"}));
                PublishStatus::Skipped {
                    reason: "no_changes".to_string(),
                }
            }
            Ok(record) => {
                if let Some(branch) = &record.branch {
                    emitter.emit(EventType::BranchCreated, json!({"branch": branch}));
                }
                if let Some(revision) = &record.revision {
                    emitter.emit(
                        EventType::CommitCreated,
                        json!({"branch": record.branch, "revision": revision}),
                    );
                }
                state.set_publish(record);
                PublishStatus::Published
            }
            Err(err) => {
                let error = format!("{err:#}");
                warn!(error = %error, "publish failed");
                emitter.emit(EventType::PublishFailed, json!({"error": error}));
                PublishStatus::Failed { error }
            }
        }
    }

    fn outcome(
        &self,
        state: &RunState,
        termination: Termination,
        publish: PublishStatus,
    ) -> RunOutcome {
        let iterations = state.iterations().len() as u32;
        let final_verdict = state.final_verdict();
        let mut message = match &termination {
            Termination::Completed => format!("checks passed on iteration {iterations}"),
            Termination::BudgetExhausted => format!(
                "iteration budget of {} exhausted; final verdict {final_verdict}",
                state.max_iterations()
            ),
            Termination::GenerationFailed { error } => format!(
                "generation failed on iteration {}: {error}",
                state.current_iteration()
            ),
            Termination::Cancelled => format!("cancelled after iteration {iterations}"),
            Termination::InternalError { error } => format!("internal error: {error}"),
        };
        if let PublishStatus::Failed { error } = &publish {
            message.push_str(&format!("; publish failed: {error}"));
        }
        let success = termination.reached_publish()
            && !matches!(publish, PublishStatus::Failed { .. });
        info!(success, iterations, final_verdict = %final_verdict, "run finished");
        RunOutcome {
            success,
            message,
            termination,
            final_verdict,
            iterations,
            publish,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CheckStatus;
    use crate::test_support::{
        RecordingPublisher, RecordingWorkspace, ScriptedCheckRunner, ScriptedGenerator, outcomes,
        response, run_state,
    };
    use std::rc::Rc;

    fn settings() -> LoopSettings {
        LoopSettings {
            checks: vec![
                CheckDefinition::new("test", "pytest", true),
                CheckDefinition::new("lint", "ruff", false),
            ],
            path_policy: PathPolicy::new(&["**".to_string()], &["**/.git/**".to_string()], 1024)
                .expect("policy"),
            generation: GenerationParams::default(),
            project_summary: "{}".to_string(),
            publish_enabled: true,
        }
    }

    #[test]
    fn constraints_grow_after_first_iteration() {
        let allowed = ["**".to_string()];
        let excluded = ["**/.git/**".to_string()];
        let first = build_constraints(&allowed, &excluded, "python", 1);
        assert_eq!(first.len(), 5);
        assert_eq!(first[0], "Only modify files within: **");
        assert_eq!(first[4], "Target language: python");
        let second = build_constraints(&["**".to_string()], &[], "python", 2);
        assert_eq!(
            second.last().map(String::as_str),
            Some("Address all issues from previous review")
        );
    }

    #[test]
    fn passing_first_iteration_stops_and_publishes() {
        let bus = EventBus::new();
        let generator = ScriptedGenerator::new(vec![Ok(response(&["app.py"]))]);
        let checks = ScriptedCheckRunner::new(vec![Ok(outcomes(&[("test", CheckStatus::Pass)]))]);
        let workspace = RecordingWorkspace::default();
        let publisher = RecordingPublisher::succeeding("feat/proj_7", "abc123");
        let mut state = run_state(3, false);

        let outcome =
            Controller::new(&generator, &checks, &workspace, &publisher, &bus, settings())
                .run(&mut state);

        assert!(outcome.success);
        assert_eq!(outcome.termination, Termination::Completed);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.publish, PublishStatus::Published);
        assert_eq!(generator.calls(), 1);
        assert_eq!(publisher.calls(), 1);
        assert_eq!(workspace.applied().len(), 1);
        assert_eq!(
            state.publish().and_then(|p| p.revision.as_deref()),
            Some("abc123")
        );
        assert_eq!(
            bus.event_types(),
            vec![
                EventType::Started,
                EventType::Generated,
                EventType::ReviewPassed,
                EventType::Completed,
                EventType::BranchCreated,
                EventType::CommitCreated,
            ]
        );
    }

    #[test]
    fn critique_is_carried_to_the_next_request() {
        let bus = EventBus::new();
        let generator =
            ScriptedGenerator::new(vec![Ok(response(&["a.py"])), Ok(response(&["a.py"]))]);
        let checks = ScriptedCheckRunner::new(vec![
            Ok(outcomes(&[("test", CheckStatus::Fail), ("lint", CheckStatus::Pass)])),
            Ok(outcomes(&[("test", CheckStatus::Pass), ("lint", CheckStatus::Pass)])),
        ]);
        let publisher = RecordingPublisher::succeeding("b", "r");
        let mut state = run_state(3, true);

        let outcome = Controller::new(
            &generator,
            &checks,
            &RecordingWorkspace::default(),
            &publisher,
            &bus,
            settings(),
        )
        .run(&mut state);

        assert!(outcome.success);
        assert_eq!(outcome.iterations, 2);
        let requests = generator.requests();
        assert_eq!(requests[0].critique, None);
        let critique = requests[1].critique.as_deref().expect("critique");
        assert!(critique.starts_with("Quality check failures:"));
        assert!(critique.contains("## TEST"));
        assert_eq!(requests[1].iteration, 2);
        assert_eq!(state.iterations()[0].verdict, Verdict::HardFail);
        assert_eq!(publisher.calls(), 0);
        assert_eq!(
            outcome.publish,
            PublishStatus::Skipped {
                reason: "dry_run".to_string()
            }
        );
    }

    #[test]
    fn review_fault_becomes_hard_fail() {
        let bus = EventBus::new();
        let generator = ScriptedGenerator::new(vec![Ok(response(&["a.py"]))]);
        let checks = ScriptedCheckRunner::new(vec![Err("runner crashed".to_string())]);
        let mut state = run_state(1, true);

        let outcome = Controller::new(
            &generator,
            &checks,
            &RecordingWorkspace::default(),
            &RecordingPublisher::succeeding("b", "r"),
            &bus,
            settings(),
        )
        .run(&mut state);

        assert!(outcome.success);
        assert_eq!(outcome.termination, Termination::BudgetExhausted);
        assert_eq!(outcome.final_verdict, Verdict::HardFail);
        let critique = state.iterations()[0].critique.as_deref().expect("critique");
        assert!(critique.contains("runner crashed"));
        let failed = bus.history(Some(EventType::ReviewFailed));
        assert_eq!(failed.len(), 1);
        assert!(failed[0].payload_str("error").is_some_and(|e| e.contains("runner crashed")));
    }

    #[test]
    fn workspace_fault_skips_checks() {
        let bus = EventBus::new();
        let generator = ScriptedGenerator::new(vec![Ok(response(&["a.py"]))]);
        let checks = ScriptedCheckRunner::new(vec![Ok(outcomes(&[("test", CheckStatus::Pass)]))]);
        let mut state = run_state(1, true);

        let outcome = Controller::new(
            &generator,
            &checks,
            &RecordingWorkspace::failing("disk full"),
            &RecordingPublisher::succeeding("b", "r"),
            &bus,
            settings(),
        )
        .run(&mut state);

        assert_eq!(checks.calls(), 0);
        assert_eq!(outcome.final_verdict, Verdict::HardFail);
        assert_eq!(bus.history(Some(EventType::ReviewFailed)).len(), 1);
    }

    #[test]
    fn cancellation_is_honored_between_iterations() {
        let bus = EventBus::new();
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        bus.subscribe(EventType::ReviewSoftFail, move |_| {
            flag.cancel();
            Ok(())
        })
        .expect("subscribe");
        let generator =
            ScriptedGenerator::new(vec![Ok(response(&["a.py"])), Ok(response(&["a.py"]))]);
        let checks = ScriptedCheckRunner::new(vec![Ok(outcomes(&[
            ("test", CheckStatus::Pass),
            ("lint", CheckStatus::Fail),
        ]))]);
        let publisher = RecordingPublisher::succeeding("b", "r");
        let mut state = run_state(3, false);

        let outcome = Controller::new(
            &generator,
            &checks,
            &RecordingWorkspace::default(),
            &publisher,
            &bus,
            settings(),
        )
        .with_cancel_flag(cancel)
        .run(&mut state);

        assert_eq!(outcome.termination, Termination::Cancelled);
        assert_eq!(outcome.publish, PublishStatus::NotAttempted);
        assert_eq!(generator.calls(), 1);
        assert_eq!(publisher.calls(), 0);
        assert_eq!(bus.event_types().last(), Some(&EventType::Cancelled));
    }

    #[test]
    fn publish_failure_keeps_verdict_but_clears_success() {
        let bus = EventBus::new();
        let generator = ScriptedGenerator::new(vec![Ok(response(&["a.py"]))]);
        let checks = ScriptedCheckRunner::new(vec![Ok(outcomes(&[("test", CheckStatus::Pass)]))]);
        let mut state = run_state(2, false);

        let outcome = Controller::new(
            &generator,
            &checks,
            &RecordingWorkspace::default(),
            &RecordingPublisher::failing("remote rejected"),
            &bus,
            settings(),
        )
        .run(&mut state);

        assert!(!outcome.success);
        assert_eq!(outcome.final_verdict, Verdict::Pass);
        assert_eq!(outcome.termination, Termination::Completed);
        assert!(outcome.message.contains("remote rejected"));
        assert!(state.publish().is_none());
        assert_eq!(bus.event_types().last(), Some(&EventType::PublishFailed));
    }

    #[test]
    fn exhausted_budget_succeeds_unless_publish_fails() {
        let soft = || -> Result<_, String> {
            Ok(outcomes(&[("test", CheckStatus::Pass), ("lint", CheckStatus::Fail)]))
        };
        let run = |publisher: &RecordingPublisher| {
            let bus = EventBus::new();
            let generator = ScriptedGenerator::new(vec![Ok(response(&["a.py"]))]);
            let checks = ScriptedCheckRunner::new(vec![soft()]);
            let mut state = run_state(1, false);
            Controller::new(
                &generator,
                &checks,
                &RecordingWorkspace::default(),
                publisher,
                &bus,
                settings(),
            )
            .run(&mut state)
        };

        let published = run(&RecordingPublisher::succeeding("b", "r"));
        assert_eq!(published.termination, Termination::BudgetExhausted);
        assert_eq!(published.final_verdict, Verdict::SoftFail);
        assert!(published.success);

        let rejected = run(&RecordingPublisher::failing("remote rejected"));
        assert_eq!(rejected.termination, Termination::BudgetExhausted);
        assert!(!rejected.success);
    }

    #[test]
    fn disabled_publish_is_skipped() {
        let bus = EventBus::new();
        let generator = ScriptedGenerator::new(vec![Ok(response(&["a.py"]))]);
        let checks = ScriptedCheckRunner::new(vec![Ok(outcomes(&[]))]);
        let publisher = RecordingPublisher::succeeding("b", "r");
        let mut state = run_state(1, false);

        let outcome = Controller::new(
            &generator,
            &checks,
            &RecordingWorkspace::default(),
            &publisher,
            &bus,
            LoopSettings {
                publish_enabled: false,
                ..settings()
            },
        )
        .run(&mut state);

        assert!(outcome.success);
        assert_eq!(publisher.calls(), 0);
        assert_eq!(
            bus.history(Some(EventType::PublishSkipped))[0].payload_str("reason"),
            Some("disabled")
        );
    }

    #[test]
    fn failing_handlers_do_not_change_the_run() {
        let bus = EventBus::new();
        let seen = Rc::new(std::cell::Cell::new(0));
        let counter = seen.clone();
        bus.subscribe(EventType::Generated, |_| panic!("observer bug"))
            .expect("subscribe");
        bus.subscribe(EventType::ReviewPassed, |_| Err(anyhow::anyhow!("observer error")))
            .expect("subscribe");
        bus.subscribe_all(move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        })
        .expect("subscribe");
        let generator = ScriptedGenerator::new(vec![Ok(response(&["a.py"]))]);
        let checks = ScriptedCheckRunner::new(vec![Ok(outcomes(&[("test", CheckStatus::Pass)]))]);
        let mut state = run_state(3, true);

        let outcome = Controller::new(
            &generator,
            &checks,
            &RecordingWorkspace::default(),
            &RecordingPublisher::succeeding("b", "r"),
            &bus,
            settings(),
        )
        .run(&mut state);

        assert!(outcome.success);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(bus.faults().len(), 2);
        assert_eq!(seen.get(), bus.len());
        assert_eq!(
            bus.event_types(),
            vec![
                EventType::Started,
                EventType::Generated,
                EventType::ReviewPassed,
                EventType::Completed,
                EventType::PublishSkipped,
            ]
        );
    }
}
