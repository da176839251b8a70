// Traceforge: Superblock Formation Engine
//
// Forms hot traces over serialized control-flow graphs and tail-duplicates
// them into superblocks; also reports static branch predictions and
// extracts branch-feature datasets.

use anyhow::Result;
use clap::Parser;

use traceforge::cli::{self, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    run_command(cli)?;

    Ok(())
}

fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Traces(ref args) => cli::cmds::traces(args, &cli),
        Commands::Form(ref args) => cli::cmds::form(args, &cli),
        Commands::Predict(ref args) => cli::cmds::predict(args, &cli),
        Commands::Features(ref args) => cli::cmds::features(args, &cli),
        Commands::Cfg(ref args) => cli::cmds::cfg(args, &cli),
    }
}
