//! peercache node
//!
//! Runs one cache node: the peer server other nodes fetch from, an optional
//! front API for clients, and a metrics/health endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         peercache node                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  Front API   │───▶│    Group     │◀───│ Peer Server  │◀── peers
//! │  │  (/api)      │    │  (scores)    │    │ (/_peercache)│       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             │ HttpPool                          │
//! │                             └──────────────────────────────────▶ peers
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use peercache::adapters::{serve, HttpPool, PeerServer};
use peercache::cache::StatsSnapshot;
use peercache::domain::{getter_fn, Getter};
use peercache::error::{Error, Result};
use peercache::group::{Group, GroupRegistry};

/// Simulated lookup latency of the demo loader
const DEMO_LATENCY: Duration = Duration::from_millis(100);

// =============================================================================
// CLI Arguments
// =============================================================================

/// peercache - distributed read-through cache node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Peer server bind address
    #[arg(long, env = "PEERCACHE_ADDR", default_value = "0.0.0.0:8001")]
    addr: String,

    /// URL other peers use to reach this node (must match its entry in --peers)
    #[arg(long, env = "PEERCACHE_SELF_URL", default_value = "http://127.0.0.1:8001")]
    self_url: String,

    /// Comma separated peer URLs, including this node
    #[arg(long, env = "PEERCACHE_PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Name of the demo group
    #[arg(long, env = "PEERCACHE_GROUP", default_value = "scores")]
    group: String,

    /// Local cache budget in bytes (0 = unbounded)
    #[arg(long, env = "PEERCACHE_CACHE_BYTES", default_value_t = 2 << 10)]
    cache_bytes: u64,

    /// Front API bind address (disabled when unset)
    #[arg(long, env = "PEERCACHE_API_ADDR")]
    api_addr: Option<String>,

    /// Metrics and health server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9100")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting peercache node");
    info!("  Self URL: {}", args.self_url);
    info!("  Group: {} ({} bytes)", args.group, args.cache_bytes);

    let registry = Arc::new(GroupRegistry::new());
    let group = registry.create_group(args.group.clone(), args.cache_bytes, demo_loader())?;

    let pool = Arc::new(HttpPool::new(args.self_url.clone())?);
    if args.peers.is_empty() {
        pool.set_peers([args.self_url.as_str()]);
    } else {
        pool.set_peers(&args.peers);
    }
    group.register_peers(pool.clone())?;

    // Start metrics and health server
    let metrics_registry = Arc::clone(&registry);
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Start front API
    if let Some(api_addr) = args.api_addr.clone() {
        let api_group = Arc::clone(&group);
        let api_registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = run_api_server(&api_addr, api_group, api_registry).await {
                error!("API server error: {}", e);
            }
        });
    }

    // Run the peer server
    let listener = TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("Failed to bind peer server on {}", args.addr))?;
    let server = Arc::new(PeerServer::new(
        pool.self_url(),
        pool.base_path(),
        Arc::clone(&registry),
    ));

    tokio::select! {
        result = serve(listener, server) => result?,
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
    }

    info!("peercache node stopped");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}

// =============================================================================
// Demo Loader
// =============================================================================

/// Slow in-memory score table standing in for a database.
fn demo_loader() -> Arc<dyn Getter> {
    let scores: HashMap<&'static str, &'static str> =
        [("Tom", "630"), ("Jack", "589"), ("Sam", "567")]
            .into_iter()
            .collect();
    let scores = Arc::new(scores);

    getter_fn(move |key: String| {
        let scores = Arc::clone(&scores);
        async move {
            info!(key = %key, "[SlowDB] search key");
            tokio::time::sleep(DEMO_LATENCY).await;
            scores
                .get(key.as_str())
                .map(|score| score.as_bytes().to_vec())
                .ok_or_else(|| anyhow::anyhow!("{} not exist", key))
        }
    })
}

// =============================================================================
// HTTP Plumbing
// =============================================================================

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

fn not_found() -> Response<Full<Bytes>> {
    respond(StatusCode::NOT_FOUND, "text/plain", "not found")
}

/// Accept loop shared by the API and metrics servers
async fn run_http<H, Fut>(name: &'static str, addr: &str, handler: H) -> Result<()>
where
    H: Fn(Method, Uri) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Internal(format!("Invalid {} server address: {}", name, e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind {} server: {}", name, e)))?;

    info!("{} server listening on {}", name, addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("{} server accept error: {}", name, e)))?;

        let io = TokioIo::new(stream);
        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = handler(req.method().clone(), req.uri().clone());
                async move { Ok::<_, Infallible>(response.await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("{} server connection error: {}", name, e);
            }
        });
    }
}

// =============================================================================
// Front API
// =============================================================================

#[derive(Serialize)]
struct GroupReport {
    name: String,
    cache_bytes: u64,
    cache_items: usize,
    cache_size_bytes: u64,
    hit_ratio: f64,
    stats: StatsSnapshot,
}

async fn run_api_server(addr: &str, group: Arc<Group>, registry: Arc<GroupRegistry>) -> Result<()> {
    run_http("API", addr, move |method: Method, uri: Uri| {
        let group = Arc::clone(&group);
        let registry = Arc::clone(&registry);
        async move {
            if method != Method::GET {
                return respond(StatusCode::METHOD_NOT_ALLOWED, "text/plain", "method not allowed");
            }
            match uri.path() {
                "/api" => api_get(&group, uri.query()).await,
                "/api/stats" => api_stats(&registry),
                _ => not_found(),
            }
        }
    })
    .await
}

async fn api_get(group: &Group, query: Option<&str>) -> Response<Full<Bytes>> {
    let Some(key) = query.and_then(|q| query_param(q, "key")) else {
        return respond(StatusCode::BAD_REQUEST, "text/plain", "missing key");
    };

    match group.get(&key).await {
        Ok(value) => respond(StatusCode::OK, "application/octet-stream", value.to_bytes()),
        Err(Error::InvalidArgument(msg)) => respond(StatusCode::BAD_REQUEST, "text/plain", msg),
        Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
    }
}

fn api_stats(registry: &GroupRegistry) -> Response<Full<Bytes>> {
    let reports: Vec<GroupReport> = registry
        .groups()
        .iter()
        .map(|group| GroupReport {
            name: group.name().to_string(),
            cache_bytes: group.cache_bytes(),
            cache_items: group.cache_len(),
            cache_size_bytes: group.cache_size_bytes(),
            hit_ratio: group.hit_ratio(),
            stats: group.stats(),
        })
        .collect();

    match serde_json::to_vec(&reports) {
        Ok(body) => respond(StatusCode::OK, "application/json", body),
        Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
    }
}

/// First value of `name` in a query string, form-unescaped (`+` is a space)
fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .and_then(|(_, v)| {
            urlencoding::decode(&v.replace('+', " "))
                .ok()
                .map(|v| v.into_owned())
        })
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: Arc<GroupRegistry>) -> Result<()> {
    run_http("Metrics", addr, move |_method: Method, uri: Uri| {
        let registry = Arc::clone(&registry);
        async move {
            match uri.path() {
                "/metrics" => match peercache::metrics::encode_text(&registry) {
                    Ok((content_type, body)) => respond(StatusCode::OK, &content_type, body),
                    Err(e) => {
                        error!("Failed to encode metrics: {}", e);
                        respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string())
                    }
                },
                "/healthz" | "/livez" | "/readyz" => respond(StatusCode::OK, "text/plain", "ok"),
                _ => not_found(),
            }
        }
    })
    .await
}
