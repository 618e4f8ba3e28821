//! Ingest service
//!
//! Consumes device notifications as commands, persists them and fans the
//! resulting events out to the in-process handlers and the broker. The
//! in-process broker and memory stores serve single-node runs; real
//! deployments plug external implementations in behind the same traits.

use std::sync::Arc;

use anyhow::Result;
use beacon_bus::{BrokerConsumer, ConsumerConfig, LocalBroker};
use beacon_ingest::config::IngestConfig;
use beacon_ingest::context::{bootstrap, Stores};
use beacon_store::memory::{
    MemoryDeviceDirectory, MemoryLastValueStore, MemoryNotificationStore, MemoryTimeSeriesStore,
};
use beacon_store::TimeSeriesStore;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "beacon-ingest")]
#[command(about = "Notification and sample ingest service", long_about = None)]
#[command(version)]
struct Args {
    /// JSON file with the device directory seed
    #[arg(long)]
    devices: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug)?;

    let mut config = IngestConfig::default();
    if args.devices.is_some() {
        config.devices_path = args.devices;
    }

    info!(topic = %config.events_topic, "starting beacon ingest");

    let broker = Arc::new(LocalBroker::new());

    let devices = match &config.devices_path {
        Some(path) => {
            let directory = MemoryDeviceDirectory::load(path)?;
            info!(path = %path, "seeded device directory");
            directory
        }
        None => MemoryDeviceDirectory::new(),
    };

    let stores = Stores {
        devices: Arc::new(devices),
        notifications: Arc::new(MemoryNotificationStore::new()),
        last_values: Arc::new(MemoryLastValueStore::new()),
        series: build_series_store().await?,
    };

    let app = bootstrap(config.clone(), broker.clone(), stores);

    // Events published by other processes, if configured. Never the mirror
    // topic: this service's own events already ran in-process.
    if let Some(topic) = config.inbound_topic.clone() {
        let consumer = BrokerConsumer::new(
            broker,
            app.events.clone(),
            ConsumerConfig {
                topic,
                channel: config.listen_name.clone(),
                workers: config.consumer_workers,
            },
        );
        let ctx = app.clone();
        tokio::spawn(async move {
            if let Err(err) = consumer.run(ctx).await {
                error!(error = %format!("{err:#}"), "broker consumer stopped");
            }
        });
    }

    // The command loop runs for process lifetime; the first fatal error
    // brings the service down so the supervisor notices.
    let commands = app.commands.clone();
    if let Err(fatal) = commands.run(app.clone()).await {
        error!(error = %fatal, "fatal invariant violation, shutting down");
        return Err(fatal.into());
    }
    Ok(())
}

async fn build_series_store() -> Result<Arc<dyn TimeSeriesStore>> {
    #[cfg(feature = "clickhouse-storage")]
    if let (Ok(endpoint), Ok(database)) = (
        std::env::var("BEACON_CLICKHOUSE_ENDPOINT"),
        std::env::var("BEACON_CLICKHOUSE_DATABASE"),
    ) {
        let catalog = beacon_shared::types::window::WindowCatalog::default();
        let store =
            beacon_store::clickhouse::ClickHouseStore::new(&endpoint, &database, &catalog).await?;
        info!("ClickHouse storage enabled: {} / {}", endpoint, database);
        return Ok(Arc::new(store));
    }

    Ok(Arc::new(MemoryTimeSeriesStore::new()))
}

/// Initialize tracing/logging
fn init_tracing(debug: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    Ok(())
}
