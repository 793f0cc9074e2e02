//! peercache Integration Tests
//!
//! Real multi-node clusters on localhost:
//! - Feature 1: Owner routing over HTTP
//! - Feature 2: Peer server error responses
//! - Feature 3: Local fallback when an owner is down

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use peercache::adapters::{serve, HttpPool, PeerServer};
use peercache::domain::getter_fn;
use peercache::group::{Group, GroupRegistry};
use peercache::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct Node {
    url: String,
    group: Arc<Group>,
    pool: Arc<HttpPool>,
    loads: Arc<AtomicUsize>,
    server: JoinHandle<peercache::Result<()>>,
}

/// Start `n` nodes that all know each other. Each loader tags values with
/// the node that produced them.
async fn spawn_cluster(n: usize) -> Vec<Node> {
    let mut listeners = Vec::with_capacity(n);
    let mut urls = Vec::with_capacity(n);
    for _ in 0..n {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        urls.push(format!("http://{}", listener.local_addr().unwrap()));
        listeners.push(listener);
    }

    let mut nodes = Vec::with_capacity(n);
    for (listener, url) in listeners.into_iter().zip(&urls) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let tag = url.clone();
        let loader = getter_fn(move |key: String| {
            let counter = Arc::clone(&counter);
            let tag = tag.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                if key.starts_with("missing") {
                    return Err(anyhow::anyhow!("{} not exist", key));
                }
                Ok(format!("{}@{}", key, tag).into_bytes())
            }
        });

        let registry = Arc::new(GroupRegistry::new());
        let group = registry.create_group("scores", 1 << 20, loader).unwrap();

        let pool = Arc::new(HttpPool::new(url.clone()).unwrap());
        pool.set_peers(&urls);
        group.register_peers(pool.clone()).unwrap();

        let server = Arc::new(PeerServer::new(url.clone(), pool.base_path(), registry));
        let server = tokio::spawn(serve(listener, server));

        nodes.push(Node {
            url: url.clone(),
            group,
            pool,
            loads,
            server,
        });
    }
    nodes
}

/// First generated key that `pool` routes to `owner`.
fn key_owned_by(pool: &HttpPool, owner: &str, prefix: &str) -> String {
    (0..10_000)
        .map(|i| format!("{}-{}", prefix, i))
        .find(|key| pool.owner_of(key).unwrap() == owner)
        .expect("some key maps to every peer")
}

// =============================================================================
// Feature 1: Owner Routing
// =============================================================================

mod routing_tests {
    use super::*;

    #[tokio::test]
    async fn test_remote_key_is_loaded_by_its_owner() {
        let nodes = spawn_cluster(2).await;
        let (a, b) = (&nodes[0], &nodes[1]);
        let key = key_owned_by(&a.pool, &b.url, "user");

        let value = a.group.get(&key).await.unwrap();
        assert_eq!(value.as_string(), format!("{}@{}", key, b.url));
        assert_eq!(a.loads.load(Ordering::SeqCst), 0);
        assert_eq!(b.loads.load(Ordering::SeqCst), 1);

        // Only the owner keeps a copy.
        assert_eq!(a.group.cache_len(), 0);
        assert_eq!(b.group.cache_len(), 1);

        // Served from the owner's cache the second time.
        a.group.get(&key).await.unwrap();
        assert_eq!(b.loads.load(Ordering::SeqCst), 1);
        assert_eq!(a.group.stats().peer_loads, 2);
    }

    #[tokio::test]
    async fn test_every_node_agrees_on_the_owner() {
        let nodes = spawn_cluster(3).await;

        for i in 0..20 {
            let key = format!("item-{}", i);
            let owner = nodes[0].pool.owner_of(&key).unwrap();
            for node in &nodes {
                let value = node.group.get(&key).await.unwrap();
                assert_eq!(value.as_string(), format!("{}@{}", key, owner));
            }
        }

        let total: usize = nodes.iter().map(|n| n.loads.load(Ordering::SeqCst)).sum();
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn test_concurrent_cluster_gets_load_once() {
        let nodes = spawn_cluster(2).await;
        let (a, b) = (&nodes[0], &nodes[1]);
        let key = key_owned_by(&a.pool, &b.url, "hot");

        let gets = (0..8)
            .map(|_| a.group.get(&key))
            .chain((0..8).map(|_| b.group.get(&key)));
        let results = futures::future::join_all(gets).await;

        for result in results {
            assert_eq!(result.unwrap().as_string(), format!("{}@{}", key, b.url));
        }
        assert_eq!(b.loads.load(Ordering::SeqCst), 1);
        assert_eq!(a.loads.load(Ordering::SeqCst), 0);
    }
}

// =============================================================================
// Feature 2: Peer Server Responses
// =============================================================================

mod server_tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_group_is_404() {
        let nodes = spawn_cluster(1).await;
        let url = format!("{}/_peercache/missing/alice", nodes[0].url);

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(response.text().await.unwrap(), "no such group: missing");
    }

    #[tokio::test]
    async fn test_value_is_octet_stream() {
        let nodes = spawn_cluster(1).await;
        let url = format!("{}/_peercache/scores/alice", nodes[0].url);

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::CONTENT_TYPE],
            "application/octet-stream"
        );
        let body = response.bytes().await.unwrap();
        assert_eq!(&body[..], format!("alice@{}", nodes[0].url).as_bytes());
    }

    #[tokio::test]
    async fn test_owner_loader_error_reaches_caller() {
        let nodes = spawn_cluster(2).await;
        let (a, b) = (&nodes[0], &nodes[1]);
        let key = key_owned_by(&a.pool, &b.url, "missing");

        // The owner answers 500; the caller then tries its own loader.
        let err = a.group.get(&key).await.unwrap_err();
        assert_eq!(err.to_string(), format!("{} not exist", key));
        assert_eq!(a.group.stats().peer_errors, 1);
        assert_eq!(a.loads.load(Ordering::SeqCst), 1);
        assert_eq!(b.loads.load(Ordering::SeqCst), 1);
    }
}

// =============================================================================
// Feature 3: Owner Down
// =============================================================================

mod fallback_tests {
    use super::*;

    #[tokio::test]
    async fn test_down_owner_falls_back_to_local_loader() {
        let nodes = spawn_cluster(2).await;
        let (a, b) = (&nodes[0], &nodes[1]);
        let key = key_owned_by(&a.pool, &b.url, "user");

        b.server.abort();
        // Wait until the listener has been dropped.
        while !b.server.is_finished() {
            tokio::task::yield_now().await;
        }

        let value = a.group.get(&key).await.unwrap();
        assert_eq!(value.as_string(), format!("{}@{}", key, a.url));
        assert_eq!(a.loads.load(Ordering::SeqCst), 1);
        assert_eq!(a.group.stats().peer_errors, 1);

        // The fallback value is cached locally.
        a.group.get(&key).await.unwrap();
        assert_eq!(a.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_peer_url_is_a_fetch_error() {
        let pool = HttpPool::new("http://127.0.0.1:1").unwrap();
        pool.set_peers(["http://127.0.0.1:1", "http://127.0.0.1:2"]);
        let key = key_owned_by(&pool, "http://127.0.0.1:2", "k");

        let peer = peercache::PeerPicker::pick_peer(&pool, &key).unwrap();
        let err = peer.get("scores", &key).await.unwrap_err();
        assert!(matches!(err, Error::PeerFetch { .. }));
    }
}
