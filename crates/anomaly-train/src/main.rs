use std::path::PathBuf;

use clap::Parser;

use anomaly_train::config::load_config;
use anomaly_train::logging::init_logging;
use anomaly_train::pipeline;
use machine_data::RunMode;

/// anomaly-train: fits a normalizing flow per machine type and machine id.
///
/// Exactly one of `--dev` or `--eval` must be given.
#[derive(Parser, Debug)]
#[command(name = "anomaly-train", about, disable_version_flag = true)]
struct Cli {
    /// Show the application version.
    #[arg(short = 'v', long)]
    version: bool,
    /// Run in development mode (reads `dev_directory`).
    #[arg(short = 'd', long)]
    dev: bool,
    /// Run in evaluation mode (reads `eval_directory`).
    #[arg(short = 'e', long)]
    eval: bool,
    /// Path to the baseline config TOML file.
    #[arg(short = 'c', long, default_value = "baseline.toml")]
    config: PathBuf,
}

fn banner() -> String {
    format!(
        "===============================\n\
         anomaly-train: machine sound anomaly baseline\n\
         version {}\n\
         ===============================",
        env!("CARGO_PKG_VERSION")
    )
}

/// Map the mode flags to a run mode; exactly one must be set.
fn mode_from_flags(dev: bool, eval: bool) -> anyhow::Result<RunMode> {
    match (dev, eval) {
        (true, false) => Ok(RunMode::Development),
        (false, true) => Ok(RunMode::Evaluation),
        _ => anyhow::bail!("incorrect argument: please set option argument '--dev' or '--eval'"),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("{}\n", banner());
    }
    let mode = mode_from_flags(cli.dev, cli.eval)?;

    let config = load_config(&cli.config)?;
    let _logging = init_logging(config.log_file.as_deref())?;
    tracing::info!(
        path = %cli.config.display(),
        model_directory = %config.model_directory.display(),
        log_file = ?config.log_file,
        "Loaded baseline config"
    );
    tracing::info!(%mode, "Starting training run");

    let summary = pipeline::run(mode, &config)?;

    println!("\n--- Training Summary ---");
    println!("Mode: {mode}");
    println!("Trained: {}", summary.trained);
    println!("Skipped (artifacts exist): {}", summary.skipped);
    println!("Failed: {}", summary.failed);
    println!("Models: {}", config.model_directory.display());

    Ok(())
}
