//! tensorctl - command-line interface for tensorbridge

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tensor_core::{LoggingConfig, SizeCategory, Settings};
use tracing::debug;

mod commands;
mod output;

use output::{OutputFormat, OutputFormatter};

/// Hardware-aware layer placement and tensor engine control
#[derive(Debug, Parser)]
#[command(name = "tensorctl")]
#[command(about = "Hardware-aware layer placement and tensor engine control")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (overrides the configured level)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Enable JSON output (overrides --output)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Detect GPUs, CPU, RAM and the NVMe cache
    Detect,

    /// Compute a layer allocation plan without starting anything
    Plan {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// List model files in the models directory
    Models,

    /// Start the engine, wait for Ctrl-C, then stop it
    Run {
        #[command(flatten)]
        model: ModelArgs,

        /// Model file handed to the front end
        #[arg(long, value_name = "PATH")]
        model_path: Option<PathBuf>,

        /// Also start the model-serving front end
        #[arg(long)]
        integrated: bool,
    },

    /// Print or write the default configuration
    Config {
        /// Output file path
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        #[arg(long = "config", value_name = "FILE")]
        file: PathBuf,
    },
}

/// Model selection shared by `plan` and `run`
#[derive(Debug, Clone, clap::Args)]
pub struct ModelArgs {
    /// Model name, e.g. llama-7b
    #[arg(short, long)]
    model: String,

    /// Number of layers (defaults to the size category's typical depth)
    #[arg(long)]
    layers: Option<u32>,

    /// Parameter count in billions
    #[arg(long)]
    params: Option<f64>,

    /// Size category (tiny, small, medium, large)
    #[arg(long)]
    category: Option<SizeCategory>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = if cli.json { OutputFormat::Json } else { cli.output };
    let formatter = OutputFormatter::new(format);

    match cli.command {
        Commands::Config { ref output } => {
            init_logging(&logging_config(&LoggingConfig::default(), &cli))?;
            commands::config::generate(output.as_deref(), &formatter)
        }
        Commands::Validate { ref file } => {
            init_logging(&logging_config(&LoggingConfig::default(), &cli))?;
            commands::config::validate(file, &formatter)
        }
        ref command => {
            let settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
            init_logging(&logging_config(&settings.logging, &cli))?;
            debug!("Loaded configuration: {:?}", settings);

            match command {
                Commands::Detect => commands::detect::run(&settings, &formatter).await,
                Commands::Models => commands::models::run(&settings, &formatter),
                Commands::Plan { model } => commands::plan::run(settings, model, &formatter).await,
                Commands::Run {
                    model,
                    model_path,
                    integrated,
                } => commands::run::run(settings, model, model_path.clone(), *integrated, &formatter).await,
                Commands::Config { .. } | Commands::Validate { .. } => Ok(()),
            }
        }
    }
}

fn logging_config(base: &LoggingConfig, cli: &Cli) -> LoggingConfig {
    let mut logging = base.clone();
    if let Some(level) = &cli.log_level {
        logging.level = level.clone();
    }
    logging
}

/// Initialize logging on stderr so structured output on stdout stays clean
fn init_logging(logging_config: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging_config.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(logging_config.show_target)
        .with_thread_ids(logging_config.show_thread_ids)
        .with_line_number(logging_config.show_line_numbers);

    let result = match logging_config.format.as_str() {
        "json" => subscriber.json().try_init(),
        _ => subscriber.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
