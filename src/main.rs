//! Luma pipeline CLI
//!
//! Runs one task through generate, verify, approve and commit.

use std::path::PathBuf;

use luma_pipeline::{
    CommandGenerator, Orchestrator, PipelineConfig, Validate, WorkflowRequest,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <task>", args[0]);
        eprintln!("\nGenerates, verifies and (after approval) commits changes for a task.");
        eprintln!("\nEnvironment variables:");
        eprintln!("  LUMA_GENERATOR=<program>     Generator program (required)");
        eprintln!("  LUMA_GENERATOR_ARGS=<args>   Space-separated generator arguments");
        eprintln!("  LUMA_WORKDIR=<dir>           Working directory (default: current)");
        eprintln!("  LUMA_CONFIG=<file>           TOML or YAML configuration file");
        eprintln!("  LUMA_SOURCE_FILES=<a,b>      Source files shown to the generator");
        eprintln!("  LUMA_MAX_ATTEMPTS=<n>        Retry budget (default: 3)");
        eprintln!("  LUMA_VERBOSE_LOGS=1          Do not truncate verification output");
        eprintln!("  LUMA_AUTO_APPROVE=1          Commit without asking");
        std::process::exit(2);
    }

    let task = args[1..].join(" ");

    let root = match std::env::var("LUMA_WORKDIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                eprintln!("failed to get current directory: {}", e);
                std::process::exit(2);
            }
        },
    };

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let Ok(program) = std::env::var("LUMA_GENERATOR") else {
        eprintln!("LUMA_GENERATOR is not set");
        std::process::exit(2);
    };
    let generator_args: Vec<String> = std::env::var("LUMA_GENERATOR_ARGS")
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    let generator = CommandGenerator::new(program, root.clone()).with_args(generator_args);

    let source_files: Vec<PathBuf> = std::env::var("LUMA_SOURCE_FILES")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default();

    let mut orchestrator = Orchestrator::new(root, config, Box::new(generator));

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, restoring working tree");
            cancel.cancel();
        }
    });

    tracing::info!(task = %task, "starting workflow");

    let request = WorkflowRequest::new(&task).with_source_files(source_files);
    match orchestrator.run(request).await {
        Ok(outcome) => {
            println!("\n{}", "=".repeat(60));
            println!("Workflow Complete: {}", outcome.run_id);
            println!("{}", "=".repeat(60));
            println!();
            println!("State: {:?}", outcome.final_state);
            println!("Attempts: {}", outcome.attempts.len());
            println!("Duration: {:?}", outcome.duration);
            println!();
            println!("Summary:");
            println!("  {}", outcome.summary());
            for path in &outcome.committed {
                println!("  wrote {}", path.display());
            }

            if !outcome.is_done() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Workflow failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_config() -> luma_pipeline::Result<PipelineConfig> {
    let config = match std::env::var("LUMA_CONFIG") {
        Ok(path) => PipelineConfig::load(&PathBuf::from(path))?,
        Err(_) => PipelineConfig::default(),
    }
    .with_env_overrides()?;

    for warning in config.validate().into_result()? {
        tracing::warn!(warning = %warning, "configuration warning");
    }
    Ok(config)
}
