//! Stopping policy for the iteration loop.

use serde::Serialize;

use crate::core::types::Verdict;

/// What the controller does after an iteration has been evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Regenerate with the current critique.
    Continue,
    /// Accept: the iteration passed.
    StopPassed,
    /// Budget exhausted; proceed with the last (non-passing) iteration.
    StopBudgetExhausted,
}

/// Decide whether to stop after `iteration` (1-based).
///
/// Rules are evaluated in order: a pass always stops, then the budget, then retry.
/// A `Pending` verdict never reaches this point in the controller; it is treated as
/// a failure so the loop cannot exit early on an unevaluated iteration.
pub fn decide(verdict: Verdict, iteration: u32, max_iterations: u32) -> Decision {
    if verdict.is_pass() {
        return Decision::StopPassed;
    }
    if iteration >= max_iterations {
        return Decision::StopBudgetExhausted;
    }
    Decision::Continue
}
