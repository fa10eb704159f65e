//! FastPitch command-line interface.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tts_core::LoggingConfig;

mod commands;

/// FastPitch acoustic model CLI
#[derive(Debug, Parser)]
#[command(name = "fastpitch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (json or text)
    #[arg(long, default_value = "text", global = true)]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Json,
    Text,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Predict prosody and mel frames for a token sequence
    Infer {
        /// Comma-separated symbol ids, e.g. 12,7,33
        #[arg(short, long, value_delimiter = ',', required = true)]
        tokens: Vec<u32>,

        /// Runtime configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Model weights (safetensors); overrides the config
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Architecture file (JSON); overrides the config
        #[arg(long)]
        architecture: Option<PathBuf>,

        /// Seed for random weights when no checkpoint is given
        #[arg(long)]
        seed: Option<u64>,

        /// Device (auto, cpu, cuda, metal)
        #[arg(long)]
        device: Option<runtime::DevicePreference>,

        /// Speaking rate divisor
        #[arg(long)]
        pace: Option<f32>,

        /// Speaker id for multi-speaker models
        #[arg(long)]
        speaker: Option<u32>,

        /// Previously produced prosody to reuse (JSON)
        #[arg(long)]
        prosody: Option<PathBuf>,

        /// Tokens the supplied prosody was produced for, when they differ
        #[arg(long, value_delimiter = ',', requires = "prosody")]
        old_tokens: Option<Vec<u32>>,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract token durations from a soft attention matrix
    Align {
        /// JSON file holding a frames x tokens matrix of probabilities
        #[arg(short, long)]
        attention: PathBuf,

        /// Search band width
        #[arg(short, long, default_value = "1")]
        width: usize,
    },

    /// Show version and configuration info
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: cli.log_level.clone(),
        format: match cli.log_format {
            LogFormatArg::Json => "json",
            LogFormatArg::Text => "text",
        }
        .to_string(),
    };
    runtime::logging::init_logging(&logging).context("failed to initialise logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting FastPitch CLI");

    match cli.command {
        Commands::Infer {
            tokens,
            config,
            weights,
            architecture,
            seed,
            device,
            pace,
            speaker,
            prosody,
            old_tokens,
            output,
        } => {
            let options = commands::infer::InferOptions {
                tokens,
                config,
                weights,
                architecture,
                seed,
                device,
                pace,
                speaker,
                prosody,
                old_tokens,
                output,
            };
            commands::infer::run(options).context("inference failed")?;
        }
        Commands::Align { attention, width } => {
            commands::align::run(&attention, width).context("alignment failed")?;
        }
        Commands::Info => {
            commands::info::run().context("info failed")?;
        }
    }

    Ok(())
}
