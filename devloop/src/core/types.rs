//! Shared deterministic types for the iteration loop.
//!
//! These types define stable contracts between the gate, the controller and the
//! adapters. They do not depend on external state or I/O.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Gate classification of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Checks have not been evaluated yet.
    Pending,
    Pass,
    /// Only non-critical checks failed.
    SoftFail,
    /// At least one critical check failed or errored.
    HardFail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pending => "pending",
            Verdict::Pass => "pass",
            Verdict::SoftFail => "soft_fail",
            Verdict::HardFail => "hard_fail",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw status of a single quality command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    /// The command ran and exited non-zero.
    Fail,
    /// The command could not complete (timeout, spawn failure).
    Error,
    Skip,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Fail => "fail",
            CheckStatus::Error => "error",
            CheckStatus::Skip => "skip",
        }
    }

    /// `Error` counts as a failure for verdicts; it is only reported distinctly.
    pub fn is_failure(&self) -> bool {
        matches!(self, CheckStatus::Fail | CheckStatus::Error)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured quality command.
///
/// Criticality is declared here, at definition time. Nothing downstream infers it
/// from the check name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDefinition {
    pub name: String,
    /// Shell command line, run through `sh -c`.
    pub command: String,
    /// A failing critical check forces `hard_fail`.
    pub critical: bool,
    /// Per-check override of the run-wide check timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl CheckDefinition {
    pub fn new(name: impl Into<String>, command: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            critical,
            timeout_secs: None,
        }
    }

    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }
}

/// Result of running one quality command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub name: String,
    pub status: CheckStatus,
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr, already bounded by the check runner.
    pub output: String,
    pub duration_ms: u64,
    /// Copied from the check definition.
    pub critical: bool,
}

/// Ordered check outcomes for one iteration, keyed by check name.
///
/// Insertion order is execution order. Names are unique: inserting an outcome for a
/// name that is already present replaces it in place. Deserialization goes through
/// the same rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CheckOutcome>")]
pub struct CheckOutcomes(Vec<CheckOutcome>);

impl CheckOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, outcome: CheckOutcome) {
        match self.0.iter_mut().find(|o| o.name == outcome.name) {
            Some(existing) => *existing = outcome,
            None => self.0.push(outcome),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CheckOutcome> {
        self.0.iter().find(|o| o.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CheckOutcome> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|o| o.name.as_str()).collect()
    }
}

impl From<Vec<CheckOutcome>> for CheckOutcomes {
    fn from(outcomes: Vec<CheckOutcome>) -> Self {
        outcomes.into_iter().collect()
    }
}

impl FromIterator<CheckOutcome> for CheckOutcomes {
    fn from_iter<I: IntoIterator<Item = CheckOutcome>>(iter: I) -> Self {
        let mut outcomes = CheckOutcomes::new();
        for outcome in iter {
            outcomes.insert(outcome);
        }
        outcomes
    }
}

impl<'a> IntoIterator for &'a CheckOutcomes {
    type Item = &'a CheckOutcome;
    type IntoIter = std::slice::Iter<'a, CheckOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    #[default]
    CreateOrUpdate,
    Delete,
}

/// A proposed edit, accepted into an iteration only after path/size filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path relative to the project root.
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub operation: FileOperation,
}

impl FileChange {
    pub fn upsert(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            operation: FileOperation::CreateOrUpdate,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: String::new(),
            operation: FileOperation::Delete,
        }
    }
}

/// Record of one generate → review pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationResult {
    pub iteration: u32,
    pub files: Vec<FileChange>,
    /// Proposals dropped by the path/size filter.
    pub rejected_files: u32,
    pub notes: String,
    pub checks: CheckOutcomes,
    pub critique: Option<String>,
    pub verdict: Verdict,
}

impl IterationResult {
    pub fn pending(
        iteration: u32,
        files: Vec<FileChange>,
        rejected_files: u32,
        notes: String,
    ) -> Self {
        Self {
            iteration,
            files,
            rejected_files,
            notes,
            checks: CheckOutcomes::new(),
            critique: None,
            verdict: Verdict::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, status: CheckStatus) -> CheckOutcome {
        CheckOutcome {
            name: name.to_string(),
            status,
            exit_code: Some(0),
            output: String::new(),
            duration_ms: 1,
            critical: false,
        }
    }

    #[test]
    fn outcomes_serialize_as_a_plain_list() {
        let outcomes: CheckOutcomes = [outcome("lint", CheckStatus::Pass)].into_iter().collect();
        let value = serde_json::to_value(&outcomes).expect("serialize");
        assert!(value.is_array());
        assert_eq!(value[0]["name"], "lint");
    }

    #[test]
    fn deserialized_duplicates_collapse_to_the_last_entry() {
        let raw = serde_json::json!([
            outcome("test", CheckStatus::Fail),
            outcome("lint", CheckStatus::Pass),
            outcome("test", CheckStatus::Pass),
        ]);
        let outcomes: CheckOutcomes = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(outcomes.names(), vec!["test", "lint"]);
        assert_eq!(outcomes.get("test").expect("test").status, CheckStatus::Pass);
    }
}
