use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
mod bootstrap;
mod cli;
use tracing::info;

use brook_common::GlobalConfigPatch;
use brook_core::{GenerationSettings, MessageStore, OpenAiSettings, OpenAiSource, RelaySettings};
use brook_server::{RelayState, relay_router};
use brook_store::MessageStorage;

use crate::bootstrap::{resolve_data_dir, resolve_dsn};
use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("brook failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let data_dir = resolve_data_dir(&cli.data_dir);
    let dsn = resolve_dsn(&cli.dsn, &data_dir)?;

    let mut patch = GlobalConfigPatch::default();
    patch.overlay(cli.as_patch(dsn));
    let config = patch.into_config()?;
    info!(
        host = %config.host,
        port = config.port,
        dsn = %config.dsn,
        engine = %config.engine_base_url,
        model = %config.engine_model,
        "config loaded"
    );

    let storage = MessageStorage::connect(&config.dsn).await?;
    info!(dsn = %config.dsn, "db connected");
    storage.sync().await?;

    let mut engine = OpenAiSettings::new(&config.engine_base_url, &config.engine_model);
    engine.api_key = config.engine_api_key.clone();
    let source = Arc::new(OpenAiSource::new(engine)?);

    let settings = GenerationSettings {
        flush_interval: Duration::from_millis(config.flush_interval_ms),
        relay: RelaySettings {
            keepalive_interval: Duration::from_secs(config.keepalive_secs),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            ..RelaySettings::default()
        },
        ..GenerationSettings::default()
    };

    let store: Arc<dyn MessageStore> = Arc::new(storage);
    let state = RelayState::new(store, source, settings);
    let app = relay_router(state);

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("brook=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
