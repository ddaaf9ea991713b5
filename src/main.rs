mod app;
mod cache;
mod classifier;
mod config;
mod detector;
mod domain;
mod infrastructure;
mod orchestrator;
mod tasks;

use anyhow::Result;
use infrastructure::{directories, logging, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    let paths = directories::ensure_directories(&config.directories)?;
    logging::init_tracing(&config.logging, &paths)?;

    let shutdown = shutdown::Shutdown::new();
    shutdown::install_signal_handlers(shutdown.clone());

    let app = app::ClassifierApp::initialize(config, paths, shutdown).await?;
    app.run().await
}
