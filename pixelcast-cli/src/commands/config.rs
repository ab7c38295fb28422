//! Config command - manage configuration files

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use pixelcast_core::config::{Settings, sample_config};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the path to the config file
    Path,

    /// Show the effective configuration
    Show,

    /// Check the config file for problems
    Check,

    /// Generate a default config file
    Init {
        /// Force overwrite if file exists
        #[arg(short, long)]
        force: bool,
    },

    /// Print a sample configuration to stdout
    Sample,
}

/// Run config subcommand
pub async fn config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Path => {
            let path = Settings::default_path();
            println!("{}", path.display());
            if path.exists() {
                println!("(file exists)");
            } else {
                println!("(file does not exist)");
            }
        }
        ConfigCommand::Show => {
            let path = Settings::default_path();
            if !path.exists() {
                println!("No configuration file found at: {}", path.display());
                println!();
                println!("Using default settings. Create a config file with:");
                println!("  pixelcast config init");
                println!();
            } else {
                println!("Configuration file: {}\n", path.display());
            }

            let settings = Settings::load_from(&path).context("Failed to load config file")?;
            print!(
                "{}",
                toml::to_string_pretty(&settings).context("Failed to format settings")?
            );
        }
        ConfigCommand::Check => {
            let path = Settings::default_path();
            let settings = Settings::load_from(&path).context("Failed to load config file")?;

            if let Err(e) = settings.validate_strict() {
                anyhow::bail!("Invalid configuration: {}", e);
            }

            let warnings = settings.validate();
            if warnings.is_empty() {
                println!("Configuration OK");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        ConfigCommand::Init { force } => {
            let path = Settings::default_path();

            if path.exists() && !force {
                println!("Configuration file already exists: {}", path.display());
                println!();
                println!("Use --force to overwrite, or edit the existing file.");
                return Ok(());
            }

            if path.exists() {
                std::fs::remove_file(&path).context("Failed to remove old config file")?;
            }
            Settings::create_default_if_missing(&path).context("Failed to write config file")?;

            println!("Created configuration file: {}", path.display());
            println!();
            println!("Edit this file to customize Pixelcast settings.");
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
    }

    Ok(())
}
