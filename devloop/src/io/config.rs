//! Loop configuration stored under `.devloop/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::path_filter::PathPolicy;
use crate::core::types::CheckDefinition;

/// Default location of the config file relative to the project root.
pub const DEFAULT_CONFIG_PATH: &str = ".devloop/config.toml";

/// Loop configuration (TOML).
///
/// Missing fields take the defaults below, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    /// Upper bound on generate/review iterations per run.
    pub max_iterations: u32,

    /// Per-check timeout unless the check overrides it.
    pub check_timeout_secs: u64,

    /// Generated files larger than this are rejected.
    pub max_file_bytes: usize,

    /// Captured check output is cut to this many characters.
    pub check_output_limit_chars: usize,

    pub allowed_paths: Vec<String>,
    pub excluded_paths: Vec<String>,

    /// Skip publishing side effects.
    pub dry_run: bool,

    /// Backend model identifier passed through to the generator.
    pub model: String,

    pub generator: GeneratorConfig,

    /// Check lists keyed by language tag.
    pub languages: BTreeMap<String, LanguageConfig>,

    pub publish: PublishConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Backend command; the rendered prompt is written to its stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Backend stdout beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
            timeout_secs: 10 * 60,
            max_tokens: 8000,
            temperature: 0.2,
            output_limit_bytes: 2_000_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LanguageConfig {
    /// Checks run in this order.
    pub checks: Vec<CheckDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    pub enabled: bool,
    /// Branch names are `<branch_prefix>/<task key slug>`.
    pub branch_prefix: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            branch_prefix: "feat".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    pub enabled: bool,
    /// Relative paths resolve against the project root.
    pub dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".devloop/runs"),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        let mut languages = BTreeMap::new();
        languages.insert(
            "python".to_string(),
            LanguageConfig {
                checks: vec![
                    CheckDefinition::new("test", "pytest -q", true),
                    CheckDefinition::new("lint", "ruff check .", false),
                ],
            },
        );
        languages.insert(
            "javascript".to_string(),
            LanguageConfig {
                checks: vec![
                    CheckDefinition::new("test", "npm test --silent", true),
                    CheckDefinition::new("lint", "npx eslint .", false),
                ],
            },
        );
        Self {
            max_iterations: 3,
            check_timeout_secs: 300,
            max_file_bytes: 200 * 1024,
            check_output_limit_chars: 5000,
            allowed_paths: vec!["**".to_string()],
            excluded_paths: [
                "**/.git/**",
                "**/node_modules/**",
                "**/__pycache__/**",
                "**/venv/**",
                "**/build/**",
                "**/dist/**",
                "**/.devloop/**",
            ]
            .iter()
            .map(|rule| rule.to_string())
            .collect(),
            dry_run: false,
            model: "claude-sonnet".to_string(),
            generator: GeneratorConfig::default(),
            languages,
            publish: PublishConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be >= 1"));
        }
        if self.check_timeout_secs == 0 {
            return Err(anyhow!("check_timeout_secs must be > 0"));
        }
        if self.max_file_bytes == 0 {
            return Err(anyhow!("max_file_bytes must be > 0"));
        }
        if self.check_output_limit_chars == 0 {
            return Err(anyhow!("check_output_limit_chars must be > 0"));
        }
        if self.generator.command.is_empty() || self.generator.command[0].trim().is_empty() {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.generator.temperature) {
            return Err(anyhow!("generator.temperature must be within 0.0..=2.0"));
        }
        for (language, lang) in &self.languages {
            let mut seen = Vec::new();
            for check in &lang.checks {
                if check.name.trim().is_empty() {
                    return Err(anyhow!("languages.{language}: check name must be non-empty"));
                }
                if check.command.trim().is_empty() {
                    return Err(anyhow!(
                        "languages.{language}.{}: command must be non-empty",
                        check.name
                    ));
                }
                if check.timeout_secs == Some(0) {
                    return Err(anyhow!(
                        "languages.{language}.{}: timeout_secs must be > 0",
                        check.name
                    ));
                }
                if seen.contains(&check.name) {
                    return Err(anyhow!(
                        "languages.{language}: duplicate check name '{}'",
                        check.name
                    ));
                }
                seen.push(check.name.clone());
            }
        }
        if self.publish.branch_prefix.trim().is_empty() {
            return Err(anyhow!("publish.branch_prefix must be non-empty"));
        }
        self.path_policy()?;
        Ok(())
    }

    /// Compiled allow/exclude rules and size cap for generated files.
    pub fn path_policy(&self) -> Result<PathPolicy> {
        PathPolicy::new(&self.allowed_paths, &self.excluded_paths, self.max_file_bytes)
            .context("compile allowed_paths/excluded_paths")
    }

    /// Checks configured for `language`, in execution order. Unknown languages have none.
    pub fn checks_for(&self, language: &str) -> Vec<CheckDefinition> {
        self.languages
            .get(language)
            .map(|lang| lang.checks.clone())
            .unwrap_or_default()
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    /// Report directory resolved against `project_path`.
    pub fn report_dir(&self, project_path: &Path) -> PathBuf {
        if self.report.dir.is_absolute() {
            self.report.dir.clone()
        } else {
            project_path.join(&self.report.dir)
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::write_atomic(path, buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, LoopConfig::default());
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.check_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.max_file_bytes, 204_800);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("config.toml");
        let cfg = LoopConfig::default();
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
max_iterations = 5

[languages.go]
checks = [
  { name = "test", command = "go test ./...", critical = true, timeout_secs = 60 },
  { name = "vet", command = "go vet ./...", critical = false },
]
"#,
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 5);
        assert_eq!(cfg.check_timeout_secs, 300);
        let checks = cfg.checks_for("go");
        assert_eq!(checks.len(), 2);
        assert!(checks[0].critical);
        assert_eq!(checks[0].timeout_secs, Some(60));
        assert!(!checks[1].critical);
        assert!(cfg.checks_for("cobol").is_empty());
    }

    #[test]
    fn python_defaults_mark_only_tests_critical() {
        let checks = LoopConfig::default().checks_for("python");
        let critical: Vec<_> = checks
            .iter()
            .map(|c| (c.name.as_str(), c.critical))
            .collect();
        assert_eq!(critical, vec![("test", true), ("lint", false)]);
    }

    #[test]
    fn rejects_zero_iterations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_iterations"));
    }

    #[test]
    fn rejects_duplicate_check_names() {
        let mut cfg = LoopConfig::default();
        cfg.languages.insert(
            "rust".to_string(),
            LanguageConfig {
                checks: vec![
                    CheckDefinition::new("test", "cargo test", true),
                    CheckDefinition::new("test", "cargo nextest run", true),
                ],
            },
        );
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate check name"));
    }

    #[test]
    fn rejects_malformed_path_rules() {
        let mut cfg = LoopConfig::default();
        cfg.excluded_paths.push("**/[abc".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("**/[abc"));
    }

    #[test]
    fn report_dir_resolves_against_project() {
        let cfg = LoopConfig::default();
        assert_eq!(
            cfg.report_dir(Path::new("/work/app")),
            PathBuf::from("/work/app/.devloop/runs")
        );
    }
}
