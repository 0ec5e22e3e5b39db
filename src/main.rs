use anyhow::Context;
use clap::Parser;
use power_conductor::cli::{Cli, CliHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let handler = CliHandler::new();

    handler
        .handle(cli.command)
        .await
        .context("power-conductor failed")?;
    Ok(())
}
