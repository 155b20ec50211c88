//! Real Button
//!
//! Finds the button panel, binds its buttons to the configured modules and
//! keeps serving it until interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use real_button::{Panel, PanelConfig, Registry};

#[derive(Parser)]
#[command(name = "real-button")]
#[command(about = "Bind the buttons of a serial LED panel to control modules")]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate the config file and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Loading config from {:?}", cli.config);
    let config = PanelConfig::load(&cli.config)?;
    let registry = Registry::with_builtins();
    config
        .validate(&registry)
        .with_context(|| format!("Invalid config {}", cli.config.display()))?;

    if cli.check {
        println!(
            "{}: {} modules, {} buttons",
            cli.config.display(),
            config.modules.len(),
            config.buttons.len()
        );
        return Ok(());
    }

    let panel = Panel::from_config(&config, &registry).await?;
    let handle = panel.start();

    tokio::select! {
        _ = handle.run(&config.device) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Waiting for Ctrl-C")?;
            info!("Shutting down");
        }
    }

    handle.close().await;
    Ok(())
}
