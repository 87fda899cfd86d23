//! Post-run report: `run.json` and `events.jsonl` under `<report_dir>/<run_id>/`.
//!
//! The report is for humans and tooling. Nothing in devloop reads it back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::core::run_state::RunState;
use crate::events::Event;
use crate::io::write_atomic;

pub const RUN_FILE: &str = "run.json";
pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Serialize)]
struct RunReport<'a, O> {
    run: &'a RunState,
    outcome: &'a O,
}

/// Write the report for one run and return its directory.
pub fn write_report<O: Serialize>(
    report_dir: &Path,
    state: &RunState,
    outcome: &O,
    events: &[Event],
) -> Result<PathBuf> {
    let dir = report_dir.join(state.run_id());

    let mut run = serde_json::to_string_pretty(&RunReport {
        run: state,
        outcome,
    })
    .context("serialize run report")?;
    run.push('\n');
    write_atomic(&dir.join(RUN_FILE), run.as_bytes())?;

    let mut lines = String::new();
    for event in events {
        lines.push_str(&serde_json::to_string(event).context("serialize event")?);
        lines.push('\n');
    }
    write_atomic(&dir.join(EVENTS_FILE), lines.as_bytes())?;

    info!(dir = %dir.display(), events = events.len(), "wrote run report");
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run_state::{RunPolicy, TaskIdentity};
    use crate::events::EventType;
    use serde_json::{Value, json};
    use std::fs;

    #[test]
    fn writes_run_and_event_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = RunState::new(
            "run-abc",
            TaskIdentity {
                task_key: "K-1".to_string(),
                task_description: "t".to_string(),
                project_name: "p".to_string(),
                project_path: temp.path().to_path_buf(),
                language: "python".to_string(),
            },
            RunPolicy {
                max_iterations: 1,
                dry_run: true,
                model: "m".to_string(),
            },
        )
        .expect("state");
        let events = vec![
            Event::new(EventType::Started, "run-abc", json!({"iteration": 1})),
            Event::new(EventType::GenerationFailed, "run-abc", json!({"error": "x"})),
        ];

        let dir = write_report(temp.path(), &state, &json!({"success": false}), &events)
            .expect("report");
        assert_eq!(dir, temp.path().join("run-abc"));

        let raw = fs::read_to_string(dir.join(RUN_FILE)).expect("read");
        let run: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(run["run"]["run_id"], "run-abc");
        assert_eq!(run["run"]["task"]["task_key"], "K-1");
        assert_eq!(run["outcome"]["success"], false);

        let lines = fs::read_to_string(dir.join(EVENTS_FILE)).expect("read");
        let types: Vec<String> = lines
            .lines()
            .map(|line| {
                let event: Value = serde_json::from_str(line).expect("event json");
                event["type"].as_str().expect("type").to_string()
            })
            .collect();
        assert_eq!(types, vec!["started", "generation_failed"]);
    }
}
