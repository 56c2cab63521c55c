//! CLI commands.

mod clean;
mod inspect;
mod resolve;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

/// imgroot - turn container images into merged root filesystems.
#[derive(Debug, Parser)]
#[command(name = "imgroot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Default log level when RUST_LOG is unset.
    #[arg(long, global = true, env = "IMGROOT_LOG", default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch an image and merge its layers into a directory.
    Resolve(resolve::ResolveCommand),

    /// Apply and remove whiteout markers in an existing tree.
    CleanWhiteouts(clean::CleanCommand),

    /// Print a summary of a staged image's manifest.
    Inspect(inspect::InspectCommand),
}

impl Cli {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Run the selected command.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Resolve(cmd) => cmd.run(),
            Commands::CleanWhiteouts(cmd) => cmd.run(),
            Commands::Inspect(cmd) => cmd.run(),
        }
    }
}
