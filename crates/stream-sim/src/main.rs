//! ADC Stream Simulator - Main Entry Point

use anyhow::Context;
use std::path::PathBuf;
use stream_sim::settings::SimConfig;
use stream_sim::{init_logging, run};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SimConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    init_logging(&config.logging)?;

    info!("=== ADC Stream Simulator v{} ===", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Using configuration from {}", path.display());
    }

    let report = run(config).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
