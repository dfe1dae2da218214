use anyhow::Result;
use clap::Parser;
use docsift_cli::args::{Cli, Commands};
use docsift_cli::{commands, completions};
use docsift_common::init_tracing;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        completions::generate(shell);
        return Ok(());
    }

    let config = commands::load_config(&cli).map_err(|e| {
        eprintln!("docsift: {:#}", e);
        e
    })?;
    init_tracing(&config.logging.level)?;
    info!("docsift v{} starting", env!("CARGO_PKG_VERSION"));
    for warning in config.warnings() {
        warn!("{}", warning);
    }

    match cli.command {
        Commands::Run => {
            let report = commands::run(&config).await.map_err(|e| {
                error!("Run aborted: {:#}", e);
                e
            })?;
            println!(
                "completed {}, skipped {}, failed {}",
                report.completed(),
                report.skipped(),
                report.failed()
            );
        }
        Commands::Poll { interval_secs } => {
            let runs = commands::poll(&config, interval_secs).await?;
            println!("{} runs", runs);
        }
        Commands::Status { path } => {
            println!("{}", commands::status(&config, path.as_deref()).await?);
        }
        Commands::ValidateConfig => {
            println!("Configuration is valid");
            println!("{}", commands::describe(&config));
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
