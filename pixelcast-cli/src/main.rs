//! Pixelcast CLI
//!
//! Headless front end for the capture-card viewer core.
//!
//! # Usage
//!
//! ```bash
//! # Show which render tiers this machine offers
//! pixelcast probe
//!
//! # Compute the integer-scaled surface for a window size
//! pixelcast scale --width 1280 --height 720
//!
//! # Run a session against the synthetic device
//! pixelcast demo --seconds 5 --preset lcd-grid
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Pixelcast - live capture-card viewer
#[derive(Parser)]
#[command(name = "pixelcast")]
#[command(version)]
#[command(about = "Live capture-card viewer with pixel-perfect scaling", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe graphics capabilities
    #[command(alias = "info")]
    Probe(commands::ProbeArgs),

    /// Compute viewport dimensions for a container
    Scale(commands::ScaleArgs),

    /// Run a session against the synthetic capture device
    Demo(commands::DemoArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("pixelcast={}", level).parse()?),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Probe(args) => commands::probe(args).await?,
        Commands::Scale(args) => commands::scale(args)?,
        Commands::Demo(args) => commands::demo(args).await?,
        Commands::Config(args) => commands::config(args).await?,
    }

    Ok(())
}
