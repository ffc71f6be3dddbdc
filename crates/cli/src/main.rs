use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use server::App;

#[derive(Parser)]
#[command(name = "stex")]
#[command(about = "Bootstrap and serve a stex application", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML config file (defaults to ./stex.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the startup phase and serve HTTP until ctrl-c
    Serve,
    /// Print the resolved initializer order of every phase
    Plan,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cli.config).await,
        Commands::Plan => plan(cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: Option<PathBuf>) -> Result<()> {
    let mut app = App::new(config).context("registering initializers")?;

    if let Err(e) = app.init().await {
        if let Some(failure) = e.failure() {
            tracing::error!(
                phase = %failure.phase,
                initializer = %failure.name,
                error = %failure.report(),
                "Bootstrap failed"
            );
        }
        app.shutdown().await;
        return Err(e).context("bootstrap failed");
    }

    app.serve().await
}

fn plan(config: Option<PathBuf>) -> Result<()> {
    let app = App::new(config).context("registering initializers")?;

    for (phase, order) in app.plan()? {
        println!("{phase}:");
        for (i, name) in order.iter().enumerate() {
            println!("  {:>2}. {name}", i + 1);
        }
    }
    Ok(())
}
