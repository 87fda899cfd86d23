//! Publish boundary: hand the final iteration to version control.

use anyhow::{Result, bail};
use tracing::{info, instrument};

use crate::core::run_state::{PublishRecord, RunState};
use crate::io::git::Git;

/// Longest task summary used in a commit subject.
const SUBJECT_SUMMARY_CHARS: usize = 72;

/// Publishes the final state of a run. A failure here never changes the verdict.
pub trait Publisher {
    /// Returns an empty record when there is nothing to publish.
    fn publish(&self, state: &RunState) -> Result<PublishRecord>;
}

/// `<prefix>/<task key, lowercased, '-' replaced with '_'>`.
pub fn branch_name(prefix: &str, task_key: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        task_key.trim().to_lowercase().replace('-', "_")
    )
}

/// `<prefix>(<task key>): <first line of the task>`.
pub fn commit_subject(prefix: &str, task_key: &str, task_description: &str) -> String {
    let first_line = task_description.lines().next().unwrap_or_default().trim();
    let summary: String = first_line.chars().take(SUBJECT_SUMMARY_CHARS).collect();
    if summary.is_empty() {
        format!("{prefix}({task_key}): automated change")
    } else {
        format!("{prefix}({task_key}): {summary}")
    }
}

/// Creates a branch in the project repository and commits the final iteration's files.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    branch_prefix: String,
}

impl GitPublisher {
    pub fn new(branch_prefix: impl Into<String>) -> Self {
        Self {
            branch_prefix: branch_prefix.into(),
        }
    }
}

impl Publisher for GitPublisher {
    #[instrument(skip_all, fields(run_id = state.run_id()))]
    fn publish(&self, state: &RunState) -> Result<PublishRecord> {
        let Some(last) = state.last() else {
            return Ok(PublishRecord::default());
        };
        if last.files.is_empty() {
            return Ok(PublishRecord::default());
        }
        let task = state.task();
        let git = Git::new(&task.project_path);
        if !git.is_work_tree()? {
            bail!("{} is not a git work tree", task.project_path.display());
        }

        let base = branch_name(&self.branch_prefix, &task.task_key);
        let branch = if git.branch_exists(&base)? {
            let versioned = format!("{base}_v{}", last.iteration);
            if git.branch_exists(&versioned)? {
                bail!("branches {base} and {versioned} already exist");
            }
            versioned
        } else {
            base
        };
        git.checkout_new_branch(&branch)?;

        // The workspace has reverted earlier iterations' files, so these are all that differ.
        let paths: Vec<String> = last.files.iter().map(|f| f.path.clone()).collect();
        git.add_paths(&paths)?;

        let mut message =
            commit_subject(&self.branch_prefix, &task.task_key, &task.task_description);
        message.push_str(&format!(
            "\n\nIterations: {}\nVerdict: {}\nRun: {}\n",
            last.iteration,
            last.verdict,
            state.run_id()
        ));
        if !last.notes.trim().is_empty() {
            message.push('\n');
            message.push_str(last.notes.trim());
            message.push('\n');
        }

        let revision = if git.commit_staged(&message)? {
            Some(git.head_sha()?)
        } else {
            None
        };
        info!(branch = %branch, revision = ?revision, "published");
        Ok(PublishRecord {
            branch: Some(branch),
            revision,
            reference_url: None,
            reference_number: None,
        })
    }
}
