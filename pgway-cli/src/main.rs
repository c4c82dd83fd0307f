use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pgway_server::{build, GatewayConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pgway", version, about = "Serve a PostgreSQL database as HTTP endpoints")]
struct Cli {
    /// Configuration file.
    #[arg(long, short, default_value = "pgway.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Introspect the database and serve the endpoint table (default).
    Serve,
    /// Print the endpoint table without serving.
    Routes,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match GatewayConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("pgway: {err}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.clone())),
        )
        .init();

    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => pgway_server::serve(config, Vec::new())
            .await
            .map_err(|e| e.to_string()),
        Commands::Routes => routes(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Build the table against the configured database and list it.
async fn routes(config: GatewayConfig) -> Result<(), String> {
    let sources =
        pgway_pg::DataSources::from_options(&config.connection).map_err(|e| e.to_string())?;
    let table = build(&config, &sources, &[])
        .await
        .map_err(|e| e.to_string())?;

    let mut entries: Vec<_> = table.routable().collect();
    entries.sort_by(|a, b| a.endpoint.path.cmp(&b.endpoint.path));
    for entry in entries {
        println!(
            "{:6} {:40} {}",
            entry.endpoint.method.as_str(),
            entry.endpoint.path,
            entry.routine.simple_definition
        );
    }
    Ok(())
}
