//! `devloop run`: load config, build adapters, drive the controller, write the report.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{info, warn};

use crate::controller::{CancelFlag, Controller, LoopSettings, RunOutcome};
use crate::core::run_state::{RunPolicy, RunState, TaskIdentity};
use crate::events::EventBus;
use crate::io::checks::ShellCheckRunner;
use crate::io::config::{DEFAULT_CONFIG_PATH, LoopConfig, load_config};
use crate::io::generation::{CommandGenerator, GenerationParams};
use crate::io::project::{MAX_SUMMARY_FILES, detect_language, summarize_project};
use crate::io::publish::GitPublisher;
use crate::io::report::write_report;
use crate::io::workspace::FsWorkspace;
use crate::logging;

/// Inputs for one run, after CLI parsing.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub task_key: String,
    pub task_description: String,
    pub project_path: PathBuf,
    /// Defaults to the project directory name.
    pub project_name: Option<String>,
    /// Defaults to `<project>/.devloop/config.toml`.
    pub config_path: Option<PathBuf>,
    /// Skips marker-file detection.
    pub language: Option<String>,
    pub max_iterations: Option<u32>,
    pub dry_run: bool,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub outcome: RunOutcome,
    /// Set when the report was written.
    pub report_dir: Option<PathBuf>,
}

/// Resolve the config for `request`, applying CLI overrides.
pub fn resolve_config(request: &RunRequest, project_path: &Path) -> Result<LoopConfig> {
    let config_path = request
        .config_path
        .clone()
        .unwrap_or_else(|| project_path.join(DEFAULT_CONFIG_PATH));
    let mut config = load_config(&config_path)?;
    if let Some(max_iterations) = request.max_iterations {
        config.max_iterations = max_iterations;
    }
    if request.dry_run {
        config.dry_run = true;
    }
    if let Some(model) = &request.model {
        config.model = model.clone();
    }
    config.validate().context("invalid configuration after CLI overrides")?;
    Ok(config)
}

/// Execute one run end to end.
pub fn execute(request: &RunRequest, cancel: CancelFlag) -> Result<RunSummary> {
    if request.task_key.trim().is_empty() {
        bail!("task key must be non-empty");
    }
    if request.task_description.trim().is_empty() {
        bail!("task description must be non-empty");
    }
    let project_path = request
        .project_path
        .canonicalize()
        .with_context(|| format!("resolve project path {}", request.project_path.display()))?;
    if !project_path.is_dir() {
        bail!("project path is not a directory: {}", project_path.display());
    }

    let config = resolve_config(request, &project_path)?;
    let language = match &request.language {
        Some(language) => language.clone(),
        None => detect_language(&project_path)
            .map(str::to_string)
            .ok_or_else(|| {
                anyhow!("could not detect project language in {}", project_path.display())
            })?,
    };
    let project_name = match &request.project_name {
        Some(name) => name.clone(),
        None => project_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string()),
    };
    let checks = config.checks_for(&language);
    if checks.is_empty() {
        warn!(language = %language, "no checks configured; every iteration will pass");
    }

    let run_id = generate_run_id();
    let mut state = RunState::new(
        run_id.clone(),
        TaskIdentity {
            task_key: request.task_key.trim().to_string(),
            task_description: request.task_description.trim().to_string(),
            project_name: project_name.clone(),
            project_path: project_path.clone(),
            language: language.clone(),
        },
        RunPolicy {
            max_iterations: config.max_iterations,
            dry_run: config.dry_run,
            model: config.model.clone(),
        },
    )?;

    let path_policy = config.path_policy()?;
    let summary = summarize_project(
        &project_path,
        &project_name,
        &language,
        &state.task().task_key,
        &path_policy,
        MAX_SUMMARY_FILES,
    )?;

    let settings = LoopSettings {
        checks,
        path_policy,
        generation: GenerationParams {
            model: config.model.clone(),
            max_tokens: config.generator.max_tokens,
            temperature: config.generator.temperature,
        },
        project_summary: summary.to_json()?,
        publish_enabled: config.publish.enabled,
    };

    let generator = CommandGenerator::new(
        config.generator.command.clone(),
        &project_path,
        Duration::from_secs(config.generator.timeout_secs),
        config.generator.output_limit_bytes,
    );
    let check_runner =
        ShellCheckRunner::new(config.check_timeout(), config.check_output_limit_chars);
    let workspace = FsWorkspace::new();
    let publisher = GitPublisher::new(config.publish.branch_prefix.clone());
    let bus = EventBus::new();
    bus.subscribe_all(logging::trace_events)?;

    info!(
        run_id = %run_id,
        language = %language,
        project = %project_path.display(),
        "starting run"
    );
    let outcome =
        Controller::new(&generator, &check_runner, &workspace, &publisher, &bus, settings)
            .with_cancel_flag(cancel)
            .run(&mut state);

    let report_dir = if config.report.enabled {
        let dir = config.report_dir(&project_path);
        match write_report(&dir, &state, &outcome, &bus.history(None)) {
            Ok(dir) => Some(dir),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to write run report");
                None
            }
        }
    } else {
        None
    };

    Ok(RunSummary {
        run_id,
        outcome,
        report_dir,
    })
}

/// `run-<UTC timestamp>-<6 random lowercase alphanumerics>`.
pub fn generate_run_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("run-{}-{suffix}", Utc::now().format("%Y%m%dT%H%M%SZ"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn run_ids_are_prefixed_and_distinct() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("run-"));
        assert_eq!(a.len(), "run-20260101T000000Z-abcdef".len());
        assert_ne!(a, b);
    }

    #[test]
    fn cli_overrides_win_over_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join(DEFAULT_CONFIG_PATH);
        fs::create_dir_all(config_path.parent().expect("parent")).expect("mkdir");
        fs::write(&config_path, "max_iterations = 5\nmodel = \"file-model\"\n").expect("write");

        let request = RunRequest {
            max_iterations: Some(2),
            dry_run: true,
            ..RunRequest::default()
        };
        let config = resolve_config(&request, temp.path()).expect("config");
        assert_eq!(config.max_iterations, 2);
        assert!(config.dry_run);
        assert_eq!(config.model, "file-model");
    }

    #[test]
    fn zero_iteration_override_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = RunRequest {
            max_iterations: Some(0),
            ..RunRequest::default()
        };
        assert!(resolve_config(&request, temp.path()).is_err());
    }

    #[test]
    fn undetectable_language_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = RunRequest {
            task_key: "K-1".to_string(),
            task_description: "do it".to_string(),
            project_path: temp.path().to_path_buf(),
            ..RunRequest::default()
        };
        let err = execute(&request, CancelFlag::new()).unwrap_err();
        assert!(err.to_string().contains("could not detect project language"));
    }
}
