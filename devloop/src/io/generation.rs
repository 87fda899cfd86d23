//! Generation backend boundary.
//!
//! The controller only sees the [`Generator`] trait. [`CommandGenerator`] is the
//! production adapter: it pipes a rendered prompt into a configured command (an LLM
//! CLI, a script, ...) and parses the JSON payload out of its stdout.

use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::text::truncate_with_notice;
use crate::core::types::{FileChange, FileOperation};
use crate::io::process::run_bounded;
use crate::io::prompt::render_generation_prompt;

const RESPONSE_SCHEMA: &str = include_str!("../schemas/generation_response.schema.json");

/// How much backend stderr is quoted in a `Backend` error.
const STDERR_EXCERPT_CHARS: usize = 2000;

/// Backend tuning passed through with every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: "claude-sonnet".to_string(),
            max_tokens: 8000,
            temperature: 0.2,
        }
    }
}

/// Everything the backend is given for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub task_description: String,
    pub project_name: String,
    pub language: String,
    /// Serialized project summary (JSON).
    pub project_summary: String,
    /// Ordered, human-readable constraints.
    pub constraints: Vec<String>,
    /// 1-based iteration number.
    pub iteration: u32,
    /// Critique from the previous iteration; `None` on the first.
    pub critique: Option<String>,
    pub params: GenerationParams,
}

/// Proposed files (not yet filtered) and free-form notes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResponse {
    pub files: Vec<FileChange>,
    pub notes: String,
}

/// Why a generation attempt produced nothing usable. Always fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation backend unreachable: {0}")]
    Unreachable(String),
    #[error("generation timed out after {secs}s")]
    TimedOut { secs: u64 },
    #[error("generation backend failed (exit code {exit_code:?}): {detail}")]
    Backend { exit_code: Option<i32>, detail: String },
    #[error("malformed generation output: {0}")]
    Malformed(String),
    #[error("invalid generation request: {0}")]
    InvalidRequest(String),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Unreachable(_) => "unreachable",
            GenerationError::TimedOut { .. } => "timed_out",
            GenerationError::Backend { .. } => "backend",
            GenerationError::Malformed(_) => "malformed",
            GenerationError::InvalidRequest(_) => "invalid_request",
        }
    }
}

pub trait Generator {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError>;
}

/// Runs a backend command with the rendered prompt on stdin.
///
/// Arguments may contain `{model}`, `{max_tokens}` and `{temperature}` placeholders.
/// The same values are also exported as `DEVLOOP_MODEL`, `DEVLOOP_MAX_TOKENS` and
/// `DEVLOOP_TEMPERATURE`.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(
        command: Vec<String>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            command,
            workdir: workdir.into(),
            timeout,
            output_limit_bytes,
        }
    }

    fn build_command(&self, params: &GenerationParams) -> Result<Command, GenerationError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| {
                GenerationError::InvalidRequest("generator command is empty".to_string())
            })?;
        let max_tokens = params.max_tokens.to_string();
        let temperature = params.temperature.to_string();
        let mut cmd = Command::new(program);
        for arg in args {
            cmd.arg(
                arg.replace("{model}", &params.model)
                    .replace("{max_tokens}", &max_tokens)
                    .replace("{temperature}", &temperature),
            );
        }
        cmd.current_dir(&self.workdir)
            .env("DEVLOOP_MODEL", &params.model)
            .env("DEVLOOP_MAX_TOKENS", &max_tokens)
            .env("DEVLOOP_TEMPERATURE", &temperature);
        Ok(cmd)
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(iteration = request.iteration, model = %request.params.model))]
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, GenerationError> {
        let prompt = render_generation_prompt(request)
            .map_err(|err| GenerationError::InvalidRequest(format!("{err:#}")))?;
        let cmd = self.build_command(&request.params)?;

        info!(prompt_bytes = prompt.len(), "invoking generation backend");
        let output = run_bounded(
            cmd,
            Some(prompt.into_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| GenerationError::Unreachable(format!("{err:#}")))?;

        if output.timed_out {
            return Err(GenerationError::TimedOut {
                secs: self.timeout.as_secs(),
            });
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::Backend {
                exit_code: output.status.code(),
                detail: truncate_with_notice(stderr.trim(), STDERR_EXCERPT_CHARS),
            });
        }
        if output.stdout_dropped > 0 {
            warn!(dropped = output.stdout_dropped, "backend output exceeded capture limit");
        }
        parse_generation_output(&output.stdout_text())
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    files: Vec<RawFile>,
    #[serde(default)]
    notes: String,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    path: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    operation: FileOperation,
}

/// Parse backend stdout into a response.
///
/// The payload is taken from the first ```json fence, else the first bare fence,
/// else the span from the first `{` to the last `}`. It must validate against the
/// embedded response schema.
pub fn parse_generation_output(text: &str) -> Result<GenerationResponse, GenerationError> {
    let candidate = extract_json_candidate(text)
        .ok_or_else(|| GenerationError::Malformed("no JSON object found in output".to_string()))?;
    let value: Value = serde_json::from_str(candidate)
        .map_err(|err| GenerationError::Malformed(format!("invalid JSON: {err}")))?;
    validate_response(&value)?;
    let raw: RawResponse = serde_json::from_value(value)
        .map_err(|err| GenerationError::Malformed(format!("unexpected shape: {err}")))?;

    debug!(files = raw.files.len(), "parsed generation response");
    Ok(GenerationResponse {
        files: raw
            .files
            .into_iter()
            .map(|file| FileChange {
                path: file.path,
                content: file.content,
                operation: file.operation,
            })
            .collect(),
        notes: raw.notes,
    })
}

fn extract_json_candidate(text: &str) -> Option<&str> {
    static JSON_FENCE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```json[ \t]*\r?\n(.*?)```").expect("valid regex"));
    static ANY_FENCE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").expect("valid regex")
    });

    for re in [&*JSON_FENCE, &*ANY_FENCE] {
        if let Some(body) = re.captures(text).and_then(|caps| caps.get(1)) {
            let body = body.as_str().trim();
            if body.starts_with('{') {
                return Some(body);
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn validate_response(value: &Value) -> Result<(), GenerationError> {
    let schema: Value = serde_json::from_str(RESPONSE_SCHEMA)
        .map_err(|err| GenerationError::InvalidRequest(format!("embedded schema: {err}")))?;
    let compiled = jsonschema::validator_for(&schema)
        .map_err(|err| GenerationError::InvalidRequest(format!("embedded schema: {err}")))?;
    let messages: Vec<String> = compiled
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(GenerationError::Malformed(format!(
            "schema validation failed: {}",
            messages.join("; ")
        )));
    }
    Ok(())
}
