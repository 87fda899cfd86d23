//! Path containment and size filtering for generated files.
//!
//! Every proposal from the generation backend passes through [`filter_changes`]
//! before it can enter an iteration. Rejections are per-file and never fail the
//! iteration by themselves.

use std::path::{Component, Path};

use ignore::Match;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::Serialize;
use thiserror::Error;

use crate::core::types::{FileChange, FileOperation};

/// Why a proposed file was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterRejection {
    #[error("empty path")]
    EmptyPath,
    #[error("absolute path")]
    AbsolutePath,
    #[error("path escapes the project root")]
    ParentTraversal,
    #[error("path matches exclusion rule '{rule}'")]
    Excluded { rule: String },
    #[error("path is outside the allowed paths")]
    NotAllowed,
    #[error("content is {bytes} bytes (limit {limit})")]
    TooLarge { bytes: usize, limit: usize },
}

impl FilterRejection {
    pub fn kind(&self) -> &'static str {
        match self {
            FilterRejection::EmptyPath => "empty_path",
            FilterRejection::AbsolutePath => "absolute_path",
            FilterRejection::ParentTraversal => "parent_traversal",
            FilterRejection::Excluded { .. } => "excluded",
            FilterRejection::NotAllowed => "not_allowed",
            FilterRejection::TooLarge { .. } => "too_large",
        }
    }
}

/// A path rule that could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path rule '{rule}': {message}")]
pub struct PathRuleError {
    pub rule: String,
    pub message: String,
}

/// Allow/deny rules and size limit applied to generated files.
///
/// Rules use gitignore syntax: `*.pem` matches at any depth, `src/**` is anchored
/// to the project root, `**/name/**` matches a directory anywhere. An excluded
/// rule without glob characters also matches as a plain substring of the path,
/// so `secrets` rejects `app/secrets_dev.txt`. An empty allow list, or one
/// containing `**`, allows every path.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    allowed_rules: Vec<String>,
    excluded_rules: Vec<String>,
    allowed: Option<Gitignore>,
    excluded: Gitignore,
    excluded_literals: Vec<String>,
    max_file_bytes: usize,
}

impl PathPolicy {
    pub fn new(
        allowed: &[String],
        excluded: &[String],
        max_file_bytes: usize,
    ) -> Result<Self, PathRuleError> {
        let allow_all = allowed.is_empty() || allowed.iter().any(|rule| rule.trim() == "**");
        let allowed_matcher = if allow_all {
            None
        } else {
            Some(build_matcher(allowed.iter())?)
        };
        let (globs, literals): (Vec<&String>, Vec<&String>) =
            excluded.iter().partition(|rule| is_glob(rule));

        Ok(Self {
            allowed_rules: allowed.to_vec(),
            excluded_rules: excluded.to_vec(),
            allowed: allowed_matcher,
            excluded: build_matcher(globs.into_iter())?,
            excluded_literals: literals
                .into_iter()
                .map(|rule| rule.trim().to_string())
                .filter(|rule| !rule.is_empty())
                .collect(),
            max_file_bytes,
        })
    }

    pub fn allowed_rules(&self) -> &[String] {
        &self.allowed_rules
    }

    pub fn excluded_rules(&self) -> &[String] {
        &self.excluded_rules
    }

    /// Whether `path` (already relative) falls under an exclusion rule.
    pub fn is_excluded(&self, path: &str, is_dir: bool) -> bool {
        self.excluded_by(path, is_dir).is_some()
    }

    /// Validate one proposal, returning the normalized relative path.
    pub fn check(&self, change: &FileChange) -> Result<String, FilterRejection> {
        let normalized = normalize_relative(&change.path)?;
        if let Some(rule) = self.excluded_by(&normalized, false) {
            return Err(FilterRejection::Excluded { rule });
        }
        if !self.is_allowed(&normalized) {
            return Err(FilterRejection::NotAllowed);
        }
        if change.operation == FileOperation::CreateOrUpdate
            && change.content.len() > self.max_file_bytes
        {
            return Err(FilterRejection::TooLarge {
                bytes: change.content.len(),
                limit: self.max_file_bytes,
            });
        }
        Ok(normalized)
    }

    fn is_allowed(&self, path: &str) -> bool {
        self.allowed.as_ref().is_none_or(|allowed| {
            allowed
                .matched_path_or_any_parents(path, false)
                .is_ignore()
        })
    }

    fn excluded_by(&self, path: &str, is_dir: bool) -> Option<String> {
        if let Some(literal) = self
            .excluded_literals
            .iter()
            .find(|literal| path.contains(literal.as_str()))
        {
            return Some(literal.clone());
        }
        match self.excluded.matched_path_or_any_parents(path, is_dir) {
            Match::Ignore(glob) => Some(glob.original().to_string()),
            Match::None | Match::Whitelist(_) => None,
        }
    }
}

/// Rules that go to the gitignore matcher instead of substring matching.
fn is_glob(rule: &str) -> bool {
    rule.trim_start().starts_with('!') || rule.contains(['*', '?', '['])
}

/// Compile rules into one matcher rooted at the project directory.
fn build_matcher<'r>(
    rules: impl Iterator<Item = &'r String>,
) -> Result<Gitignore, PathRuleError> {
    let mut builder = GitignoreBuilder::new(".");
    for raw in rules {
        let rule = raw.trim();
        let rule = rule.strip_prefix("./").unwrap_or(rule);
        if rule.is_empty() {
            continue;
        }
        if rule.starts_with('!') {
            return Err(PathRuleError {
                rule: raw.clone(),
                message: "negated rules are not supported".to_string(),
            });
        }
        builder.add_line(None, rule).map_err(|err| PathRuleError {
            rule: raw.clone(),
            message: err.to_string(),
        })?;
    }
    builder.build().map_err(|err| PathRuleError {
        rule: String::new(),
        message: err.to_string(),
    })
}

/// Reduce a proposed path to `a/b/c` form, refusing anything that could leave the
/// project root.
pub fn normalize_relative(raw: &str) -> Result<String, FilterRejection> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FilterRejection::EmptyPath);
    }
    if trimmed.starts_with('/') || trimmed.starts_with('\\') || has_drive_prefix(trimmed) {
        return Err(FilterRejection::AbsolutePath);
    }
    if trimmed.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(FilterRejection::ParentTraversal);
    }

    let mut parts = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir => return Err(FilterRejection::ParentTraversal),
            Component::RootDir | Component::Prefix(_) => return Err(FilterRejection::AbsolutePath),
        }
    }
    if parts.is_empty() {
        return Err(FilterRejection::EmptyPath);
    }
    Ok(parts.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// A dropped proposal and the reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedFile {
    pub path: String,
    pub reason: FilterRejection,
}

/// Outcome of filtering one generation response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub accepted: Vec<FileChange>,
    pub rejected: Vec<RejectedFile>,
}

/// Split proposals into accepted (with normalized paths) and rejected.
///
/// A later proposal for the same path replaces an earlier one so the accepted set
/// never contains duplicate paths.
pub fn filter_changes(policy: &PathPolicy, proposals: Vec<FileChange>) -> FilterReport {
    let mut report = FilterReport::default();
    for proposal in proposals {
        match policy.check(&proposal) {
            Ok(path) => {
                let change = FileChange { path, ..proposal };
                match report.accepted.iter_mut().find(|c| c.path == change.path) {
                    Some(existing) => *existing = change,
                    None => report.accepted.push(change),
                }
            }
            Err(reason) => report.rejected.push(RejectedFile {
                path: proposal.path,
                reason,
            }),
        }
    }
    report
}
