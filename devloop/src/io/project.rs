//! Project inspection: primary language and a bounded file listing.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::core::path_filter::PathPolicy;

/// Cap on files listed in a project summary.
pub const MAX_SUMMARY_FILES: usize = 200;

/// Marker files per language, checked in this order.
const LANGUAGE_MARKERS: &[(&str, &[&str])] = &[
    ("python", &["pyproject.toml", "setup.py", "requirements.txt"]),
    ("javascript", &["package.json"]),
    ("typescript", &["tsconfig.json"]),
    ("go", &["go.mod"]),
    ("java", &["pom.xml", "build.gradle"]),
];

/// First language whose marker file exists at the project root.
pub fn detect_language(project_path: &Path) -> Option<&'static str> {
    LANGUAGE_MARKERS
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| project_path.join(m).is_file()))
        .map(|(language, _)| *language)
}

/// What the generator is told about the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub project_name: String,
    pub language: String,
    pub task_key: String,
    /// Relative paths, sorted, excluded paths omitted.
    pub files: Vec<String>,
    /// More files existed than were listed.
    pub truncated: bool,
}

impl ProjectSummary {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serialize project summary")
    }
}

/// Walk `project_path` and list up to `max_files` files not excluded by `policy`.
pub fn summarize_project(
    project_path: &Path,
    project_name: &str,
    language: &str,
    task_key: &str,
    policy: &PathPolicy,
    max_files: usize,
) -> Result<ProjectSummary> {
    let mut files = Vec::new();
    let mut truncated = false;
    let walker = WalkDir::new(project_path)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            relative(project_path, entry.path())
                .is_none_or(|rel| !policy.is_excluded(&rel, entry.file_type().is_dir()))
        });

    for entry in walker {
        let entry = entry.with_context(|| format!("walk {}", project_path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative(project_path, entry.path()) else {
            continue;
        };
        if files.len() == max_files {
            truncated = true;
            break;
        }
        files.push(rel);
    }

    debug!(files = files.len(), truncated, "summarized project");
    Ok(ProjectSummary {
        project_name: project_name.to_string(),
        language: language.to_string(),
        task_key: task_key.to_string(),
        files,
        truncated,
    })
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, "").expect("write");
    }

    #[test]
    fn detects_by_marker_precedence() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(detect_language(temp.path()), None);
        touch(temp.path(), "package.json");
        assert_eq!(detect_language(temp.path()), Some("javascript"));
        touch(temp.path(), "requirements.txt");
        assert_eq!(detect_language(temp.path()), Some("python"));
    }

    #[test]
    fn summary_skips_excluded_and_caps_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        touch(temp.path(), "src/app.py");
        touch(temp.path(), "src/util.py");
        touch(temp.path(), "tests/test_app.py");
        touch(temp.path(), ".git/HEAD");
        touch(temp.path(), "web/node_modules/x/index.js");
        let policy = PathPolicy::new(
            &["**".to_string()],
            &["**/.git/**".to_string(), "**/node_modules/**".to_string()],
            1024,
        )
        .expect("policy");

        let summary = summarize_project(temp.path(), "demo", "python", "PROJ-1", &policy, 10)
            .expect("summary");
        assert_eq!(
            summary.files,
            vec!["src/app.py", "src/util.py", "tests/test_app.py"]
        );
        assert!(!summary.truncated);

        let capped = summarize_project(temp.path(), "demo", "python", "PROJ-1", &policy, 2)
            .expect("summary");
        assert_eq!(capped.files.len(), 2);
        assert!(capped.truncated);
        assert!(capped.to_json().expect("json").contains("\"truncated\": true"));
    }
}
