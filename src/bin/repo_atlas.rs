//! Thin CLI entry point. Argument parsing beyond the few flags the pipeline
//! genuinely needs is out of scope; this wires `clap` straight into
//! [`repo_atlas::pipeline::run_pipeline`].

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use repo_atlas::config::Config;
use repo_atlas::pipeline::{run_pipeline, write_report_json};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "repo-atlas", about = "Turns a Git repository into a multi-file knowledge document")]
struct Cli {
    /// Local path or clone URL of the repository to document.
    repo_source: String,

    /// Directory the documentation tree is written under.
    #[arg(long, default_value = "./docs-out")]
    output_dir: PathBuf,

    /// Natural language the generated prose is written in.
    #[arg(long, default_value = "en")]
    target_language: String,

    /// Optional YAML configuration overlay.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = Config::defaults().global.log_level;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    let config = match cli.config.as_deref().map(std::fs::read_to_string).transpose() {
        Ok(yaml) => match Config::load(yaml.as_deref()) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load configuration: {e}");
                return ExitCode::FAILURE;
            }
        },
        Err(e) => {
            eprintln!("failed to read config file: {e}");
            return ExitCode::FAILURE;
        }
    };

    let api_key = match Config::llm_api_key() {
        Ok(key) => key,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match run_pipeline(&config, &cli.repo_source, &cli.target_language, &cli.output_dir, api_key).await {
        Ok(report) => {
            if let Err(e) = write_report_json(&cli.output_dir, &report) {
                tracing::warn!("failed to write report.json: {e}");
            }
            ExitCode::from(report.exit_code() as u8)
        }
        Err(e) => {
            eprintln!("repo-atlas run failed: {e}");
            ExitCode::FAILURE
        }
    }
}
