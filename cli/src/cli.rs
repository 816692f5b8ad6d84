//! CLI argument parsing with clap derive

use anyhow::Result;
use clap::{Parser, Subcommand};
use codepass_common::ServiceConfig;

use crate::commands;

/// On-demand multipass workspaces behind one TLS endpoint
#[derive(Parser)]
#[command(
    name = "codepass",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the workspace gateway
    Service(ServiceConfig),

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<()> {
        let Cli { json, command } = self;
        match command {
            Command::Service(config) => commands::service::run(config).await,
            Command::Version => {
                commands::version::run(json);
                Ok(())
            }
        }
    }
}
