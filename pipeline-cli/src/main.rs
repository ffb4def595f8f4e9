mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::prelude::*;

use commands::run::RunArgs;
use commands::validate::ValidateArgs;

/// Run CI workflows locally
#[derive(Parser, Debug)]
#[command(name = "pipectl", version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a workflow for an event
    Run(RunArgs),
    /// Check a workflow file without running it
    Validate(ValidateArgs),
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn,pipeline_engine=info",
        1 => "pipeline_engine=debug,pipectl=debug",
        _ => "trace",
    };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default.to_string());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match cli.command {
        Commands::Run(args) => commands::run::execute(args).await?,
        Commands::Validate(args) => commands::validate::execute(args)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
