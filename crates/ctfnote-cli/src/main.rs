mod bootstrap_helpers;
mod cli_args;

use anyhow::{Context, Result};
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.gateway_config()?;

    match &cli.command {
        Command::Serve { .. } => ctfnote_gateway::run_gateway(config).await,
        Command::RegisterCommands => {
            let settings = config
                .discord
                .as_ref()
                .context("register-commands needs --discord-bot-token and the discord ids")?;
            ctfnote_gateway::register_commands(settings, &config).await
        }
    }
}
