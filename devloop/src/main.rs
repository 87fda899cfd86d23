//! devloop CLI.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};

use devloop::controller::{CancelFlag, RunOutcome, Termination};
use devloop::exit_codes;
use devloop::io::config::{DEFAULT_CONFIG_PATH, LoopConfig, load_config, write_config};
use devloop::io::project::detect_language;
use devloop::logging;
use devloop::run::{RunRequest, execute};

#[derive(Parser)]
#[command(
    name = "devloop",
    version,
    about = "Generate, review and fix code changes until quality checks pass"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the generate/review loop for one task.
    Run(RunArgs),
    /// Write a default config file.
    Init {
        #[arg(long, default_value = ".")]
        project_path: PathBuf,
        /// Config path (default: <project>/.devloop/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the detected language and the checks that would run.
    Checks {
        #[arg(long, default_value = ".")]
        project_path: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override language detection.
        #[arg(long)]
        language: Option<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Task identifier, e.g. an issue key.
    #[arg(long)]
    task_key: String,
    /// Task description.
    #[arg(long, required_unless_present = "task_file", conflicts_with = "task_file")]
    task: Option<String>,
    /// Read the task description from a file.
    #[arg(long)]
    task_file: Option<PathBuf>,
    #[arg(long, default_value = ".")]
    project_path: PathBuf,
    /// Defaults to the project directory name.
    #[arg(long)]
    project_name: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override language detection.
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Skip publishing.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    model: Option<String>,
    /// Print the run outcome as JSON.
    #[arg(long)]
    json: bool,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::Init {
            project_path,
            config,
            force,
        } => cmd_init(&project_path, config, force),
        Command::Checks {
            project_path,
            config,
            language,
        } => cmd_checks(&project_path, config, language),
    }
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let task_description = match (args.task, &args.task_file) {
        (Some(task), _) => task,
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("read task file {}", path.display()))?
        }
        (None, None) => bail!("either --task or --task-file is required"),
    };
    let request = RunRequest {
        task_key: args.task_key,
        task_description,
        project_path: args.project_path,
        project_name: args.project_name,
        config_path: args.config,
        language: args.language,
        max_iterations: args.max_iterations,
        dry_run: args.dry_run,
        model: args.model,
    };

    let summary = execute(&request, CancelFlag::new())?;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary.outcome).context("serialize outcome")?
        );
    } else {
        println!("run: {}", summary.run_id);
        println!("verdict: {}", summary.outcome.final_verdict);
        println!("iterations: {}", summary.outcome.iterations);
        println!("{}", summary.outcome.message);
        if let Some(dir) = &summary.report_dir {
            println!("report: {}", dir.display());
        }
    }
    Ok(exit_code(&summary.outcome))
}

fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome.termination {
        Termination::Completed if outcome.success => exit_codes::OK,
        Termination::BudgetExhausted => exit_codes::BUDGET_EXHAUSTED,
        Termination::GenerationFailed { .. } => exit_codes::GENERATION_FAILED,
        _ => exit_codes::INVALID,
    }
}

fn config_path(project_path: &Path, config: Option<PathBuf>) -> PathBuf {
    config.unwrap_or_else(|| project_path.join(DEFAULT_CONFIG_PATH))
}

fn cmd_init(project_path: &Path, config: Option<PathBuf>, force: bool) -> Result<i32> {
    let path = config_path(project_path, config);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&path, &LoopConfig::default())?;
    println!("{}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_checks(
    project_path: &Path,
    config: Option<PathBuf>,
    language: Option<String>,
) -> Result<i32> {
    let cfg = load_config(&config_path(project_path, config))?;
    let language = match language {
        Some(language) => language,
        None => detect_language(project_path)
            .map(str::to_string)
            .ok_or_else(|| {
                anyhow!("could not detect project language in {}", project_path.display())
            })?,
    };
    println!("language: {language}");
    let checks = cfg.checks_for(&language);
    if checks.is_empty() {
        println!("(no checks configured)");
    }
    for check in checks {
        let kind = if check.critical { "critical" } else { "advisory" };
        println!("{}\t{}\t{}", check.name, kind, check.command);
    }
    Ok(exit_codes::OK)
}
