//! Prometheus metrics for the ClickHouse backend

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Gauge,
};

pub static CH_FLUSH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "beacon_clickhouse_flush_total",
        "ClickHouse flush attempts",
        &["status"]
    )
    .unwrap()
});

pub static CH_FLUSH_ROWS: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_clickhouse_flush_rows_total",
        "Rows flushed to ClickHouse"
    )
    .unwrap()
});

pub static CH_PENDING_ROWS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "beacon_clickhouse_pending_rows",
        "Rows currently pending flush to ClickHouse"
    )
    .unwrap()
});

pub static CH_AGGREGATE_WRITES: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "beacon_clickhouse_aggregate_writes_total",
        "Aggregate rows written to ClickHouse"
    )
    .unwrap()
});
