//! Metrics module
//!
//! Renders per-group counters and cache gauges in Prometheus text format.
//!
//! Counters live in each group's [`GroupStats`](crate::cache::GroupStats) as
//! plain atomics; a fresh `prometheus::Registry` is filled from snapshots on
//! every scrape, so groups never depend on a global registry.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::StatsSnapshot;
use crate::error::{Error, Result};
use crate::group::GroupRegistry;

type CounterDef = (&'static str, &'static str, fn(&StatsSnapshot) -> u64);

const COUNTERS: &[CounterDef] = &[
    ("peercache_gets_total", "Get requests received", |s| s.gets),
    ("peercache_cache_hits_total", "Gets served from the local cache", |s| s.cache_hits),
    ("peercache_loads_total", "Cache misses entering the load path", |s| s.loads),
    (
        "peercache_loads_executed_total",
        "Loads executed after request coalescing",
        |s| s.loads_executed,
    ),
    ("peercache_peer_loads_total", "Values fetched from a peer", |s| s.peer_loads),
    ("peercache_peer_errors_total", "Failed peer fetches", |s| s.peer_errors),
    ("peercache_local_loads_total", "Values produced by the local loader", |s| s.local_loads),
    (
        "peercache_local_load_errors_total",
        "Local loader failures",
        |s| s.local_load_errors,
    ),
    ("peercache_evictions_total", "Entries evicted from the local cache", |s| s.evictions),
];

/// Encode all groups of `groups` in Prometheus text format.
///
/// Returns the content type and the encoded body.
pub fn encode_text(groups: &GroupRegistry) -> Result<(String, Vec<u8>)> {
    let registry = Registry::new();

    let counters = COUNTERS
        .iter()
        .map(|(name, help, read)| -> Result<(IntCounterVec, fn(&StatsSnapshot) -> u64)> {
            let vec = IntCounterVec::new(Opts::new(*name, *help), &["group"])
                .map_err(metrics_error)?;
            registry
                .register(Box::new(vec.clone()))
                .map_err(metrics_error)?;
            Ok((vec, *read))
        })
        .collect::<Result<Vec<_>>>()?;

    let items = gauge(&registry, "peercache_cache_items", "Entries held by the local cache")?;
    let bytes = gauge(&registry, "peercache_cache_bytes", "Bytes held by the local cache")?;
    let capacity = gauge(
        &registry,
        "peercache_cache_capacity_bytes",
        "Configured local cache budget (0 = unbounded)",
    )?;

    for group in groups.groups() {
        let name = group.name();
        let snapshot = group.stats();
        for (vec, read) in &counters {
            vec.with_label_values(&[name]).inc_by(read(&snapshot));
        }
        items
            .with_label_values(&[name])
            .set(saturating_i64(group.cache_len() as u64));
        bytes
            .with_label_values(&[name])
            .set(saturating_i64(group.cache_size_bytes()));
        capacity
            .with_label_values(&[name])
            .set(saturating_i64(group.cache_bytes()));
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(metrics_error)?;

    Ok((encoder.format_type().to_string(), buffer))
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGaugeVec> {
    let vec = IntGaugeVec::new(Opts::new(name, help), &["group"]).map_err(metrics_error)?;
    registry
        .register(Box::new(vec.clone()))
        .map_err(metrics_error)?;
    Ok(vec)
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("Failed to encode metrics: {}", e))
}
