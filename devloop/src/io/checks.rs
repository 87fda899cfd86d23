//! Quality check execution.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::text::truncate_chars;
use crate::core::types::{CheckDefinition, CheckOutcome, CheckOutcomes, CheckStatus};
use crate::io::process::{run_bounded, shell};

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_OUTPUT_LIMIT_CHARS: usize = 5000;

/// Runs an ordered list of checks against a project directory.
///
/// Individual check problems (non-zero exit, timeout, spawn failure) are reported as
/// outcomes. `Err` is reserved for faults that prevent running any check at all.
pub trait CheckRunner {
    fn run_checks(&self, project_path: &Path, checks: &[CheckDefinition]) -> Result<CheckOutcomes>;
}

/// Runs each check as `sh -c <command>` in the project directory.
#[derive(Debug, Clone)]
pub struct ShellCheckRunner {
    default_timeout: Duration,
    output_limit_chars: usize,
}

impl Default for ShellCheckRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_TIMEOUT, DEFAULT_OUTPUT_LIMIT_CHARS)
    }
}

impl ShellCheckRunner {
    pub fn new(default_timeout: Duration, output_limit_chars: usize) -> Self {
        Self {
            default_timeout,
            output_limit_chars,
        }
    }

    #[instrument(skip_all, fields(check = %check.name))]
    fn run_one(&self, project_path: &Path, check: &CheckDefinition) -> CheckOutcome {
        let timeout = check.timeout_or(self.default_timeout);
        // Chars are at most 4 bytes; capture enough bytes to fill the char budget.
        let capture_limit = self.output_limit_chars.saturating_mul(4);
        debug!(command = %check.command, timeout_secs = timeout.as_secs(), "running check");

        let (status, exit_code, output, duration_ms) =
            match run_bounded(shell(&check.command, project_path), None, timeout, capture_limit) {
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "check could not be started");
                    (
                        CheckStatus::Error,
                        None,
                        format!("Failed to run command: {err:#}"),
                        0,
                    )
                }
                Ok(out) => {
                    let duration_ms = out.elapsed.as_millis() as u64;
                    if out.timed_out {
                        let mut text = format!(
                            "Command timed out after {} seconds",
                            timeout.as_secs()
                        );
                        let partial = out.combined_text();
                        if !partial.is_empty() {
                            text.push('\n');
                            text.push_str(&partial);
                        }
                        (CheckStatus::Error, None, text, duration_ms)
                    } else if out.status.success() {
                        (CheckStatus::Pass, out.status.code(), out.combined_text(), duration_ms)
                    } else {
                        (CheckStatus::Fail, out.status.code(), out.combined_text(), duration_ms)
                    }
                }
            };

        let (bounded, _) = truncate_chars(&output, self.output_limit_chars);
        info!(status = %status, exit_code = ?exit_code, duration_ms, "check finished");
        CheckOutcome {
            name: check.name.clone(),
            status,
            exit_code,
            output: bounded.to_string(),
            duration_ms,
            critical: check.critical,
        }
    }
}

impl CheckRunner for ShellCheckRunner {
    fn run_checks(&self, project_path: &Path, checks: &[CheckDefinition]) -> Result<CheckOutcomes> {
        if !project_path.is_dir() {
            bail!("project path is not a directory: {}", project_path.display());
        }
        Ok(checks
            .iter()
            .map(|check| self.run_one(project_path, check))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ShellCheckRunner {
        ShellCheckRunner::new(Duration::from_secs(10), 50)
    }

    #[test]
    fn maps_exit_status_to_outcomes_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcomes = runner()
            .run_checks(
                temp.path(),
                &[
                    CheckDefinition::new("test", "echo ok", true),
                    CheckDefinition::new("lint", "echo bad >&2; exit 2", false),
                ],
            )
            .expect("run checks");

        assert_eq!(outcomes.names(), vec!["test", "lint"]);
        let test = outcomes.get("test").expect("test outcome");
        assert_eq!(test.status, CheckStatus::Pass);
        assert_eq!(test.exit_code, Some(0));
        assert!(test.critical);
        let lint = outcomes.get("lint").expect("lint outcome");
        assert_eq!(lint.status, CheckStatus::Fail);
        assert_eq!(lint.exit_code, Some(2));
        assert_eq!(lint.output.trim(), "bad");
        assert!(!lint.critical);
    }

    #[test]
    fn runs_in_project_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "here").expect("write");
        let outcomes = runner()
            .run_checks(temp.path(), &[CheckDefinition::new("cat", "cat marker.txt", true)])
            .expect("run checks");
        assert_eq!(outcomes.get("cat").expect("cat").output, "here");
    }

    #[test]
    fn timeout_is_an_error_and_siblings_still_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut slow = CheckDefinition::new("slow", "exec sleep 5", true);
        slow.timeout_secs = Some(1);
        let outcomes = runner()
            .run_checks(temp.path(), &[slow, CheckDefinition::new("fast", "true", false)])
            .expect("run checks");

        let slow = outcomes.get("slow").expect("slow");
        assert_eq!(slow.status, CheckStatus::Error);
        assert_eq!(slow.exit_code, None);
        assert!(slow.output.starts_with("Command timed out after 1 seconds"));
        assert_eq!(outcomes.get("fast").expect("fast").status, CheckStatus::Pass);
    }

    #[test]
    fn timeout_stops_a_multi_command_script_promptly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut slow = CheckDefinition::new("slow", "sleep 6; true", true);
        slow.timeout_secs = Some(1);
        let started = std::time::Instant::now();
        let outcomes = runner().run_checks(temp.path(), &[slow]).expect("run checks");

        assert!(started.elapsed() < Duration::from_secs(4), "took {:?}", started.elapsed());
        assert_eq!(outcomes.get("slow").expect("slow").status, CheckStatus::Error);
    }

    #[test]
    fn output_is_bounded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let outcomes = runner()
            .run_checks(
                temp.path(),
                &[CheckDefinition::new("noisy", "yes x | head -c 1000; exit 1", false)],
            )
            .expect("run checks");
        assert_eq!(outcomes.get("noisy").expect("noisy").output.chars().count(), 50);
    }

    #[test]
    fn missing_project_dir_is_a_fault() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("missing");
        assert!(
            runner()
                .run_checks(&missing, &[CheckDefinition::new("test", "true", true)])
                .is_err()
        );
    }
}
