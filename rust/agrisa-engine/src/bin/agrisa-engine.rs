//! Agrisa engine service binary

use agrisa_engine::{Engine, EngineOptions, Stores};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agrisa-engine", about = "Parametric crop-insurance engine")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = agrisa_config::load_config(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(data_dir) = args.data_dir {
        config.engine.data_dir = data_dir.display().to_string();
    }

    tracing::info!(data_dir = %config.engine.data_dir, "starting agrisa engine");

    let db = sled::open(&config.engine.data_dir).context("failed to open store")?;
    let stores = Stores::sled(db);

    let engine = Engine::build(stores, EngineOptions::from_config(&config))
        .context("failed to assemble engine")?;
    let bus_handle = engine.start().await.context("failed to start engine")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    bus_handle.abort();

    Ok(())
}
