//! Prompt rendering for the command-backed generator.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use tracing::debug;

use crate::io::generation::GenerationRequest;

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("generate", GENERATE_TEMPLATE)
        .expect("generate template should be valid");
    env
});

/// Render the backend prompt for one generation request.
pub fn render_generation_prompt(request: &GenerationRequest) -> Result<String> {
    let template = ENGINE.get_template("generate")?;
    let rendered = template.render(context! {
        project_name => request.project_name.as_str(),
        language => request.language.as_str(),
        iteration => request.iteration,
        task => request.task_description.trim(),
        project_summary => request.project_summary.trim(),
        critique => request.critique.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        constraints => &request.constraints,
    })?;
    debug!(bytes = rendered.len(), iteration = request.iteration, "rendered generation prompt");
    Ok(rendered)
}
