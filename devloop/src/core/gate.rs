//! Quality gate: folds one iteration's check outcomes into a verdict.
//!
//! Evaluation is pure. The same outcomes always produce the same verdict and the
//! same critique text, so re-evaluating an iteration is harmless.

use crate::core::text::truncate_with_notice;
use crate::core::types::{CheckOutcome, CheckOutcomes, Verdict};

/// Per-check output budget inside a critique.
pub const CRITIQUE_OUTPUT_LIMIT_CHARS: usize = 2_000;

const CRITIQUE_HEADER: &str = "Quality check failures:";
const CRITIQUE_FOOTER: &str = "Please fix these issues and regenerate the code.";

/// Verdict plus the critique that feeds the next generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateReport {
    pub verdict: Verdict,
    /// Present exactly when the verdict is not `pass`.
    pub critique: Option<String>,
}

/// Evaluate check outcomes.
///
/// - no checks → `pass`
/// - every check `pass`/`skip` → `pass`
/// - any critical check `fail`/`error` → `hard_fail`
/// - otherwise → `soft_fail`
pub fn evaluate(checks: &CheckOutcomes) -> GateReport {
    let verdict = classify(checks);
    let critique = if verdict.is_pass() {
        None
    } else {
        Some(render_critique(checks))
    };
    GateReport { verdict, critique }
}

fn classify(checks: &CheckOutcomes) -> Verdict {
    let mut failures = checks.iter().filter(|c| c.status.is_failure()).peekable();
    if failures.peek().is_none() {
        return Verdict::Pass;
    }
    if failures.any(|c| c.critical) {
        Verdict::HardFail
    } else {
        Verdict::SoftFail
    }
}

/// Render failing checks as plain text for the generation backend.
pub fn render_critique(checks: &CheckOutcomes) -> String {
    let mut parts = vec![CRITIQUE_HEADER.to_string()];
    for check in checks.iter().filter(|c| c.status.is_failure()) {
        parts.push(render_failure(check));
    }
    parts.push(CRITIQUE_FOOTER.to_string());
    parts.join("\n\n")
}

fn render_failure(check: &CheckOutcome) -> String {
    let mut buf = String::new();
    buf.push_str(&format!("## {}", check.name.to_uppercase()));
    if check.critical {
        buf.push_str(" (critical)");
    }
    buf.push('\n');
    buf.push_str(&format!("Status: {}\n", check.status));
    match check.exit_code {
        Some(code) => buf.push_str(&format!("Exit code: {code}\n")),
        None => buf.push_str("Exit code: none\n"),
    }
    let output = check.output.trim();
    if !output.is_empty() {
        buf.push_str("Output:\n```\n");
        buf.push_str(&truncate_with_notice(output, CRITIQUE_OUTPUT_LIMIT_CHARS));
        buf.push_str("\n```");
    }
    buf.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CheckStatus;

    fn outcome(name: &str, status: CheckStatus, critical: bool) -> CheckOutcome {
        CheckOutcome {
            name: name.to_string(),
            status,
            exit_code: match status {
                CheckStatus::Pass => Some(0),
                CheckStatus::Fail => Some(1),
                CheckStatus::Error | CheckStatus::Skip => None,
            },
            output: format!("{name} output"),
            duration_ms: 5,
            critical,
        }
    }

    fn checks(items: Vec<CheckOutcome>) -> CheckOutcomes {
        items.into_iter().collect()
    }

    #[test]
    fn empty_checks_pass() {
        let report = evaluate(&CheckOutcomes::new());
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.critique, None);
    }

    #[test]
    fn pass_and_skip_pass() {
        let report = evaluate(&checks(vec![
            outcome("test", CheckStatus::Pass, true),
            outcome("typecheck", CheckStatus::Skip, false),
        ]));
        assert_eq!(report.verdict, Verdict::Pass);
        assert!(report.critique.is_none());
    }

    #[test]
    fn lint_failure_alone_is_soft_fail() {
        let report = evaluate(&checks(vec![
            outcome("lint", CheckStatus::Fail, false),
            outcome("test", CheckStatus::Pass, true),
        ]));
        assert_eq!(report.verdict, Verdict::SoftFail);
    }

    #[test]
    fn test_failure_is_hard_fail() {
        let report = evaluate(&checks(vec![
            outcome("lint", CheckStatus::Pass, false),
            outcome("test", CheckStatus::Fail, true),
        ]));
        assert_eq!(report.verdict, Verdict::HardFail);
    }

    #[test]
    fn critical_error_is_hard_fail() {
        let report = evaluate(&checks(vec![outcome("test", CheckStatus::Error, true)]));
        assert_eq!(report.verdict, Verdict::HardFail);
    }

    #[test]
    fn criticality_comes_from_flag_not_name() {
        let report = evaluate(&checks(vec![
            outcome("test", CheckStatus::Fail, false),
            outcome("build", CheckStatus::Pass, true),
        ]));
        assert_eq!(report.verdict, Verdict::SoftFail);

        let report = evaluate(&checks(vec![outcome("build", CheckStatus::Error, true)]));
        assert_eq!(report.verdict, Verdict::HardFail);
    }

    #[test]
    fn critique_lists_only_failing_checks() {
        let report = evaluate(&checks(vec![
            outcome("lint", CheckStatus::Fail, false),
            outcome("test", CheckStatus::Pass, true),
            outcome("typecheck", CheckStatus::Error, false),
        ]));
        let critique = report.critique.expect("critique");
        assert!(critique.starts_with(CRITIQUE_HEADER));
        assert!(critique.ends_with(CRITIQUE_FOOTER));
        assert!(critique.contains("## LINT"));
        assert!(critique.contains("Status: fail"));
        assert!(critique.contains("Exit code: 1"));
        assert!(critique.contains("## TYPECHECK"));
        assert!(critique.contains("Status: error"));
        assert!(critique.contains("Exit code: none"));
        assert!(!critique.contains("## TEST"));
    }

    #[test]
    fn critique_truncates_long_output() {
        let mut failing = outcome("lint", CheckStatus::Fail, false);
        failing.output = "x".repeat(CRITIQUE_OUTPUT_LIMIT_CHARS + 10);
        let critique = render_critique(&checks(vec![failing]));
        assert!(critique.contains("[truncated 10 chars]"));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let input = checks(vec![
            outcome("lint", CheckStatus::Fail, false),
            outcome("test", CheckStatus::Fail, true),
        ]);
        let first = evaluate(&input);
        let second = evaluate(&input);
        assert_eq!(first, second);
    }
}
