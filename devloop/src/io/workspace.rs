//! Applying accepted file changes to the project directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::path_filter::normalize_relative;
use crate::core::types::{FileChange, FileOperation};

/// Materializes an iteration's files so checks can run against them.
pub trait Workspace {
    /// Apply `changes` under `root`, returning the relative paths touched.
    fn apply(&self, root: &Path, changes: &[FileChange]) -> Result<Vec<String>>;
}

/// Writes changes straight into the project directory.
///
/// The content each path had before the run first touched it is remembered. A
/// later `apply` puts back every remembered path its changes no longer mention,
/// so the tree always equals the original project plus the latest iteration.
#[derive(Debug, Default)]
pub struct FsWorkspace {
    /// Pre-run content per touched file; `None` when the file did not exist.
    originals: Mutex<BTreeMap<PathBuf, Option<Vec<u8>>>>,
}

impl FsWorkspace {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Workspace for FsWorkspace {
    #[instrument(skip_all, fields(root = %root.display(), changes = changes.len()))]
    fn apply(&self, root: &Path, changes: &[FileChange]) -> Result<Vec<String>> {
        if !root.is_dir() {
            return Err(anyhow!("project path is not a directory: {}", root.display()));
        }
        let mut planned = Vec::with_capacity(changes.len());
        for change in changes {
            let rel = normalize_relative(&change.path)
                .map_err(|reason| anyhow!("refusing to write {}: {reason}", change.path))?;
            planned.push((root.join(&rel), rel, change));
        }

        let mut originals = self.originals.lock().unwrap_or_else(PoisonError::into_inner);
        let current: BTreeSet<&PathBuf> = planned.iter().map(|(target, _, _)| target).collect();
        let dropped: Vec<PathBuf> = originals
            .keys()
            .filter(|target| target.starts_with(root) && !current.contains(target))
            .cloned()
            .collect();
        for target in dropped {
            if let Some(original) = originals.remove(&target) {
                restore(&target, original)?;
            }
        }

        let mut touched = Vec::with_capacity(planned.len());
        for (target, rel, change) in planned {
            if !originals.contains_key(&target) {
                originals.insert(target.clone(), read_original(&target)?);
            }
            match change.operation {
                FileOperation::CreateOrUpdate => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent)
                            .with_context(|| format!("create directory {}", parent.display()))?;
                    }
                    fs::write(&target, &change.content)
                        .with_context(|| format!("write {}", target.display()))?;
                    debug!(path = %rel, bytes = change.content.len(), "wrote file");
                }
                FileOperation::Delete => {
                    if target.is_file() {
                        fs::remove_file(&target)
                            .with_context(|| format!("remove {}", target.display()))?;
                        debug!(path = %rel, "removed file");
                    }
                }
            }
            touched.push(rel);
        }
        Ok(touched)
    }
}

fn read_original(target: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(target) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", target.display())),
    }
}

fn restore(target: &Path, original: Option<Vec<u8>>) -> Result<()> {
    match original {
        Some(bytes) => {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create directory {}", parent.display()))?;
            }
            fs::write(target, bytes).with_context(|| format!("restore {}", target.display()))?;
        }
        None => {
            if target.is_file() {
                fs::remove_file(target)
                    .with_context(|| format!("remove {}", target.display()))?;
            }
        }
    }
    debug!(path = %target.display(), "restored file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_nested_files_and_deletes() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("old.py"), "gone").expect("seed");

        let touched = FsWorkspace::new()
            .apply(
                temp.path(),
                &[
                    FileChange::upsert("src/pkg/app.py", "print('hi')\n"),
                    FileChange::delete("old.py"),
                    FileChange::delete("never_existed.py"),
                ],
            )
            .expect("apply");

        assert_eq!(touched, vec!["src/pkg/app.py", "old.py", "never_existed.py"]);
        assert_eq!(
            fs::read_to_string(temp.path().join("src/pkg/app.py")).expect("read"),
            "print('hi')\n"
        );
        assert!(!temp.path().join("old.py").exists());
    }

    #[test]
    fn refuses_escaping_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("project");
        fs::create_dir_all(&root).expect("mkdir");
        let err = FsWorkspace::new()
            .apply(&root, &[FileChange::upsert("../escape.txt", "x")])
            .unwrap_err();
        assert!(err.to_string().contains("refusing to write"));
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[test]
    fn files_dropped_by_a_later_apply_are_restored() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("config.py"), "DEBUG = False\n").expect("seed");
        fs::write(temp.path().join("legacy.py"), "old\n").expect("seed");
        let workspace = FsWorkspace::new();

        workspace
            .apply(
                temp.path(),
                &[
                    FileChange::upsert("app.py", "v1"),
                    FileChange::upsert("extra/helper.py", "helper"),
                    FileChange::upsert("config.py", "DEBUG = True\n"),
                    FileChange::delete("legacy.py"),
                ],
            )
            .expect("first apply");
        let touched = workspace
            .apply(temp.path(), &[FileChange::upsert("app.py", "v2")])
            .expect("second apply");

        assert_eq!(touched, vec!["app.py"]);
        let read = |rel: &str| fs::read_to_string(temp.path().join(rel)).expect("read");
        assert_eq!(read("app.py"), "v2");
        assert!(!temp.path().join("extra/helper.py").exists());
        assert_eq!(read("config.py"), "DEBUG = False\n");
        assert_eq!(read("legacy.py"), "old\n");
    }
}
