use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod duplicates;
mod error;
mod importer;
mod models;
mod normalize;
mod parser;
mod payload;
mod store;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Default log filter when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info", env = "EMPLOYEE_IMPORT_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        #[command(flatten)]
        config: config::ConfigArgs,
    },
    /// Import a .csv or .json file straight into the configured store
    Import {
        /// Path to the input file
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        config: config::ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve { config } => {
            let config = config::build_config(&config)?;
            let store = store::open_store(&config)?;
            info!("Starting API server on {}:{}", config.host, config.port);
            api::start_api_server(&config, store).await?;
        }
        Commands::Import { input, config } => {
            let config = config::build_config(&config)?;
            import_file(&config, input).await?;
        }
    }

    Ok(())
}

async fn import_file(config: &config::Config, input: PathBuf) -> Result<()> {
    let content =
        std::fs::read(&input).with_context(|| format!("Failed to read {}", input.display()))?;
    let file_name = input.to_string_lossy();

    let source = payload::resolve_file(&file_name, &content)?;
    let store = store::open_store(config)?;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = importer::import_employees(store.as_ref(), source.into(), &cancel).await;
    ctrl_c.abort();

    let inserted = result?;
    info!("Imported {} employees from {}", inserted, input.display());
    println!("{}", inserted);

    Ok(())
}
