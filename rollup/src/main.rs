//! Rollup service
//!
//! Subscribes to the event stream, schedules a rollup job for every
//! persisted sample and drains due jobs into minute/hour/day aggregates.
//! The in-process broker and memory stores serve single-node runs; real
//! deployments plug external implementations in behind the same traits.

use std::sync::Arc;

use anyhow::Result;
use beacon_bus::{BrokerConsumer, ConsumerConfig, LocalBroker};
use beacon_rollup::config::RollupConfig;
use beacon_rollup::context::bootstrap;
use beacon_rollup::queue::MemoryDelayQueue;
use beacon_rollup::worker::{RollupWorker, WorkerConfig};
use beacon_store::memory::MemoryTimeSeriesStore;
use beacon_store::TimeSeriesStore;
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "beacon-rollup")]
#[command(about = "Aggregation scheduler and rollup worker", long_about = None)]
#[command(version)]
struct Args {
    /// Maximum number of due jobs to claim per poll
    #[arg(long)]
    max_pop: Option<usize>,

    /// Number of rollup workers draining the shared queue
    #[arg(long)]
    workers: Option<usize>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug)?;

    let mut config = RollupConfig::default();
    if let Some(max_pop) = args.max_pop {
        config.max_pop = max_pop;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    info!(
        topic = %config.events_topic,
        workers = config.workers,
        max_pop = config.max_pop,
        "starting beacon rollup"
    );

    let broker = Arc::new(LocalBroker::new());
    let queue = Arc::new(MemoryDelayQueue::new());
    let series = build_series_store(&config).await?;

    let app = bootstrap(config.clone(), queue.clone(), series);

    let consumer = BrokerConsumer::new(
        broker,
        app.events.clone(),
        ConsumerConfig {
            topic: config.events_topic.clone(),
            channel: config.listen_name.clone(),
            workers: config.consumer_workers,
        },
    );

    let mut tasks = JoinSet::new();
    {
        let ctx = app.clone();
        tasks.spawn(async move { consumer.run(ctx).await });
    }
    for _ in 0..config.workers.max(1) {
        let worker = RollupWorker::new(
            queue.clone(),
            app.series.clone(),
            config.catalog.clone(),
            WorkerConfig {
                max_pop: config.max_pop,
                poll_interval: config.poll_interval,
            },
        );
        tasks.spawn(async move { worker.run().await.map_err(Into::into) });
    }

    // The dispatch loops run for process lifetime; the first fatal error
    // brings the service down so the supervisor notices.
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined? {
            error!(error = %format!("{err:#}"), "fatal invariant violation, shutting down");
            return Err(err);
        }
    }
    Ok(())
}

async fn build_series_store(config: &RollupConfig) -> Result<Arc<dyn TimeSeriesStore>> {
    #[cfg(feature = "clickhouse-storage")]
    if let (Ok(endpoint), Ok(database)) = (
        std::env::var("BEACON_CLICKHOUSE_ENDPOINT"),
        std::env::var("BEACON_CLICKHOUSE_DATABASE"),
    ) {
        let store =
            beacon_store::clickhouse::ClickHouseStore::new(&endpoint, &database, &config.catalog)
                .await?;
        info!("ClickHouse storage enabled: {} / {}", endpoint, database);
        return Ok(Arc::new(store));
    }

    let _ = config;
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
