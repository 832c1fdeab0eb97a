//! Front-desk sync service.
//!
//! Runs the poller, listener and nightly scheduler until interrupted.

use anyhow::Context;
use frontdesk_sync::config::{BusBackend, Config};
use frontdesk_sync::runtime::shutdown_signal;
use frontdesk_sync::{HttpReservationSource, SyncEngine};
use frontdesk_sync_core::event_bus::EventBus;
use frontdesk_sync_sqlite::SqliteStore;
use frontdesk_sync_testing::InMemoryEventBus;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frontdesk_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting front-desk sync");

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        database_url = %config.database.url,
        reservation_api = %config.reservation_api.base_url,
        bus = ?config.bus.backend,
        "Configuration loaded"
    );

    let store = SqliteStore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to open database")?;
    store.migrate().await.context("failed to migrate database")?;
    info!("Database ready");

    let bus = build_event_bus(&config)?;

    let source = HttpReservationSource::new(
        config.reservation_api.base_url.clone(),
        config.reservation_api.api_key.clone(),
        config.sync.system_name.clone(),
        config.reservation_api_timeout(),
    )
    .context("failed to build reservation API client")?;

    let engine = SyncEngine::from_sqlite(store, Arc::new(source), bus, config.sync_settings())
        .await
        .context("failed to build sync engine")?;
    engine.start()?;

    shutdown_signal().await;
    engine.shutdown().await;

    info!("Front-desk sync stopped");
    Ok(())
}

fn build_event_bus(config: &Config) -> anyhow::Result<Arc<dyn EventBus>> {
    match config.bus.backend {
        BusBackend::Memory => {
            info!("Using in-process event bus");
            Ok(Arc::new(InMemoryEventBus::new()))
        }
        #[cfg(feature = "redpanda")]
        BusBackend::Redpanda => {
            info!(brokers = %config.bus.brokers, "Connecting to Redpanda event bus");
            let bus = frontdesk_sync_redpanda::RedpandaEventBus::builder()
                .brokers(&config.bus.brokers)
                .consumer_group(&config.bus.consumer_group)
                .build()
                .context("failed to connect to Redpanda")?;
            Ok(Arc::new(bus))
        }
        #[cfg(not(feature = "redpanda"))]
        BusBackend::Redpanda => {
            anyhow::bail!("BUS_BACKEND=redpanda requires the `redpanda` feature")
        }
    }
}
