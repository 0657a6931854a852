//! FocusMochi CLI: run the focus pipeline from a terminal.
//!
//! Usage:
//!   mochi run [OPTIONS]       Start the pipeline and print states as JSON lines
//!   mochi check               Check camera and model availability
//!   mochi config [OPTIONS]    Print or write the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mochi_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "mochi",
    about = "A desktop pet that watches how focused you are",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the standard location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the vision pipeline and report pet state
    Run {
        /// Use generated frames instead of the camera
        #[arg(long)]
        synthetic: bool,

        /// Synthetic scene: attentive|sway|look-away|intermittent|empty
        #[arg(long)]
        scene: Option<String>,

        /// Use the colour-marker detector instead of the ONNX model
        #[arg(long)]
        marker: bool,

        /// Stop after this many seconds (runs until Ctrl-C otherwise)
        #[arg(short, long)]
        duration: Option<f64>,

        /// Seconds between pet state reports
        #[arg(long, default_value = "1.0")]
        report_every: f64,

        /// Scripted gesture as NAME@SECONDS, e.g. wave@2.5 (repeatable)
        #[arg(short, long = "gesture")]
        gestures: Vec<String>,
    },

    /// Check camera devices and model files
    Check,

    /// Print the effective configuration
    Config {
        /// Print built-in defaults instead of the loaded config
        #[arg(long)]
        defaults: bool,

        /// Write the configuration to the config path instead of printing it
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let writing_config = matches!(cli.command, Commands::Config { write: true, .. });
    let mut config = match &cli.config {
        Some(path) if writing_config && !path.exists() => AppConfig::default(),
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    mochi_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Run {
            synthetic,
            scene,
            marker,
            duration,
            report_every,
            gestures,
        } => {
            let options = commands::run::RunOptions::from_args(
                synthetic,
                scene.as_deref(),
                marker,
                duration,
                report_every,
                &gestures,
            )?;
            commands::run::run(config, options).await
        }
        Commands::Check => commands::check::run(&config),
        Commands::Config { defaults, write } => {
            commands::config::run(config, cli.config, defaults, write)
        }
    }
}
