//! RetinoNet CLI
//!
//! Command-line client for a running RetinoNet daemon.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// retinonet - client for the RetinoNet screening service
#[derive(Parser, Debug)]
#[command(name = "retinonet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:8000", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show model lifecycle status
    Status,

    /// Wait until the model is loaded
    Wait {
        /// Give up after this many seconds
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,

        /// Seconds between readiness checks
        #[arg(long, default_value_t = 2)]
        interval_secs: u64,
    },

    /// Screen an image stored as raw RGB8 pixels
    Predict {
        /// File with packed RGB8 pixels, row-major
        file: PathBuf,

        /// Image width in pixels
        #[arg(long)]
        width: usize,

        /// Image height in pixels
        #[arg(long)]
        height: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Status => {
            commands::status(&client).await?;
        }
        Commands::Wait {
            timeout_secs,
            interval_secs,
        } => {
            commands::wait(&client, timeout_secs, interval_secs).await?;
        }
        Commands::Predict {
            file,
            width,
            height,
        } => {
            commands::predict(&client, file, width, height).await?;
        }
    }

    Ok(())
}
