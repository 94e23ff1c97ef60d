use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod compose;
mod config;
mod schema;
mod service;

use config::{BusKind, Config};
use service::{MienService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("miend starting");

    let config = Config::load()?;
    let pipeline = Arc::new(compose::build_pipeline(&config)?);
    let service = MienService::new(pipeline, tokio::runtime::Handle::current(), config.top_k);

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "miend ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("miend shutting down");

    Ok(())
}
