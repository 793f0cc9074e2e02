//! HTTP Peer Server
//!
//! Answers `GET <base-path><group>/<key>` for other nodes.
//!
//! | Outcome                            | Status |
//! |------------------------------------|--------|
//! | value found or loaded              | 200 (`application/octet-stream`) |
//! | path outside the base path         | 404    |
//! | missing group or key, bad escaping | 400    |
//! | unknown group                      | 404    |
//! | group returned an error            | 500    |

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info, instrument};

use crate::error::{Error, Result};
use crate::group::GroupRegistry;

/// Serves this node's groups to its peers
pub struct PeerServer {
    self_url: String,
    base_path: String,
    registry: Arc<GroupRegistry>,
}

impl PeerServer {
    pub fn new(
        self_url: impl Into<String>,
        base_path: impl Into<String>,
        registry: Arc<GroupRegistry>,
    ) -> Self {
        Self {
            self_url: self_url.into(),
            base_path: base_path.into(),
            registry,
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Route one request. `path` is the raw (still escaped) request path.
    #[instrument(skip(self), fields(server = %self.self_url))]
    pub async fn handle(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        let Some(rest) = path.strip_prefix(self.base_path.as_str()) else {
            return text(StatusCode::NOT_FOUND, format!("unexpected path: {}", path));
        };
        if *method != Method::GET {
            return text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }

        let (group_name, key) = match parse_parts(rest) {
            Some(parts) => parts,
            None => return text(StatusCode::BAD_REQUEST, "bad request"),
        };

        let group = match self.registry.lookup(&group_name) {
            Ok(group) => group,
            Err(_) => {
                return text(
                    StatusCode::NOT_FOUND,
                    format!("no such group: {}", group_name),
                )
            }
        };

        debug!(group = %group_name, key = %key, "serving peer request");
        match group.get(&key).await {
            Ok(value) => respond(StatusCode::OK, "application/octet-stream", value.to_bytes()),
            Err(Error::InvalidArgument(msg)) => text(StatusCode::BAD_REQUEST, msg),
            Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

impl std::fmt::Debug for PeerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerServer")
            .field("self_url", &self.self_url)
            .field("base_path", &self.base_path)
            .finish()
    }
}

/// Split `<group>/<key>` and unescape both halves.
fn parse_parts(rest: &str) -> Option<(String, String)> {
    let (group, key) = rest.split_once('/')?;
    if group.is_empty() || key.is_empty() {
        return None;
    }
    let group = urlencoding::decode(group).ok()?.into_owned();
    let key = urlencoding::decode(key).ok()?.into_owned();
    Some((group, key))
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn text(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    respond(status, "text/plain; charset=utf-8", body.into())
}

/// Accept loop for the peer server. Runs until the listener fails.
pub async fn serve(listener: TcpListener, server: Arc<PeerServer>) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Internal(format!("Peer server has no local address: {}", e)))?;

    info!(%addr, base_path = %server.base_path, "Peer server listening");

    loop {
        let (stream, remote) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Peer server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let server = Arc::clone(&server);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let server = Arc::clone(&server);
                let method = req.method().clone();
                let path = req.uri().path().to_owned();
                async move { Ok::<_, Infallible>(server.handle(&method, &path).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(%remote, "Peer server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::getter_fn;
    use http_body_util::BodyExt;

    fn make_server() -> PeerServer {
        let registry = Arc::new(GroupRegistry::new());
        let loader = getter_fn(|key: String| async move {
            match key.as_str() {
                "alice" => Ok(b"42".to_vec()),
                "a/b" => Ok(b"slash".to_vec()),
                _ => Err(anyhow::anyhow!("{} not exist", key)),
            }
        });
        registry.create_group("scores", 1024, loader).unwrap();
        PeerServer::new("http://127.0.0.1:8001", "/_peercache/", registry)
    }

    async fn body_of(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_serves_value() {
        let server = make_server();
        let response = server.handle(&Method::GET, "/_peercache/scores/alice").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(body_of(response).await, "42");
    }

    #[tokio::test]
    async fn test_unescapes_key() {
        let server = make_server();
        let response = server.handle(&Method::GET, "/_peercache/scores/a%2Fb").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, "slash");
    }

    #[tokio::test]
    async fn test_unknown_group_is_not_found() {
        let server = make_server();
        let response = server.handle(&Method::GET, "/_peercache/missing/alice").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_of(response).await, "no such group: missing");
    }

    #[tokio::test]
    async fn test_loader_error_is_internal() {
        let server = make_server();
        let response = server.handle(&Method::GET, "/_peercache/scores/bob").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_of(response).await, "bob not exist");
    }

    #[tokio::test]
    async fn test_malformed_paths() {
        let server = make_server();
        let cases = [
            ("/other/scores/alice", StatusCode::NOT_FOUND),
            ("/_peercache/scores", StatusCode::BAD_REQUEST),
            ("/_peercache/scores/", StatusCode::BAD_REQUEST),
            ("/_peercache//alice", StatusCode::BAD_REQUEST),
            ("/_peercache/scores/%FF", StatusCode::BAD_REQUEST),
        ];
        for (path, status) in cases {
            let response = server.handle(&Method::GET, path).await;
            assert_eq!(response.status(), status, "path {}", path);
        }
    }

    #[tokio::test]
    async fn test_only_get_is_allowed() {
        let server = make_server();
        let response = server.handle(&Method::POST, "/_peercache/scores/alice").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_parse_parts() {
        assert_eq!(
            parse_parts("scores/user%3A1"),
            Some(("scores".to_string(), "user:1".to_string()))
        );
        assert_eq!(parse_parts("scores"), None);
    }
}
