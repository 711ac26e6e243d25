use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod exporter;
mod frame;
mod recorder;
mod repair;
mod schema;
mod storage;
mod validator;

use config::AppConfig;
use repair::{FixedWidthSplit, RepairEngine};

#[derive(Debug, Parser)]
#[command(
    name = "glove-recorder",
    version,
    about = "Capture glove telemetry over serial and repair recorded sessions"
)]
struct Cli {
    /// TOML config file. The built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record lines from the glove into a new session file until Ctrl-C.
    Capture {
        #[arg(long)]
        port: Option<String>,
        /// Session name. Prompted for on stdin when omitted.
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Split the merged timestamp column of recorded sessions back apart.
    /// Run it once per session file; repaired output does not survive a
    /// second pass.
    Repair {
        /// A session file, or a capture tree of per-device directories.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Output directory. For a single session file this may also name
        /// the cleaned file itself.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        field_width: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load_default()?,
    };

    match cli.command {
        Command::Capture { port, name, output_dir } => {
            if let Some(port) = port {
                config.serial.port = port;
            }
            if let Some(dir) = output_dir {
                config.session.output_dir = dir;
            }
            let name = match name {
                Some(name) => name,
                None => prompt_session_name()?,
            };
            run_capture(config, name).await
        }
        Command::Repair { input, output, field_width } => {
            if let Some(input) = input {
                config.repair.input_dir = input;
            }
            let explicit_output = output.is_some();
            if let Some(output) = output {
                config.repair.output_dir = output;
            }
            if let Some(width) = field_width {
                config.repair.field_width = width;
            }
            run_repair(config, explicit_output).await
        }
    }
}

async fn run_capture(config: AppConfig, name: String) -> Result<()> {
    info!("starting capture session {:?} on {}", name, config.serial.port);

    let shutdown = CancellationToken::new();
    let interrupt = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received interrupt, finishing current read");
                shutdown.cancel();
            }
        })
    };

    let result = recorder::start_capture(config, name, shutdown).await;
    interrupt.abort();

    let summary = result.context("capture worker panicked")??;
    info!("capture summary: {}", serde_json::to_string(&summary)?);
    Ok(())
}

async fn run_repair(config: AppConfig, explicit_output: bool) -> Result<()> {
    let engine = RepairEngine::new(FixedWidthSplit::new(config.repair.field_width));
    let input = &config.repair.input_dir;
    let output = &config.repair.output_dir;
    info!("repair field width: {} characters", engine.policy().width());

    let meta = tokio::fs::metadata(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    if meta.is_file() {
        let output = exporter::single_file_output(input, output, explicit_output).await?;
        let report = engine.repair_file(input, &output).await?;
        info!("repair report: {}", serde_json::to_string(&report)?);
    } else {
        let manifest = exporter::repair_tree(&engine, input, output).await?;
        if !manifest.failed.is_empty() {
            bail!("{} session files could not be repaired", manifest.failed.len());
        }
    }
    Ok(())
}

fn prompt_session_name() -> Result<String> {
    eprint!("Session name: ");
    std::io::stderr().flush()?;
    let mut name = String::new();
    std::io::stdin().read_line(&mut name).context("reading session name")?;
    let name = name.trim().to_string();
    if name.is_empty() {
        bail!("a session name is required");
    }
    Ok(name)
}
