//! Hoverfly Runner Binary Entry Point

use clap::Parser;
use hoverfly_core::init_logging;
use hoverfly_runner::{load_settings, run_runner, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args)?;
    init_logging(&settings.logging_config(&args))?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    };

    if let Err(e) = run_runner(settings, shutdown).await {
        tracing::error!("Runner failed: {}", e);
        return Err(e);
    }
    Ok(())
}
