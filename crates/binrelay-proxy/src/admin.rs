//! Admin and metrics HTTP surfaces.
//!
//! The admin server mutates and lists backend sets at runtime:
//!
//! - `POST /backends/add` / `POST /backends/remove` take a YAML body
//!   `{ proxies: [ { name, backends: [BackendInfo] } ] }` and answer 200 on
//!   success or 400 when the body does not parse.
//! - `GET /backends/list` answers `{proxyName: [{"Addr", "Connected"}]}`.
//!
//! The metrics server (enabled by `metrics.addr`) serves the counter
//! snapshot at `GET /metrics`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use binrelay_common::{BackendInfo, RelayError, Result};
use binrelay_metrics::{MetricsRegistry, MetricsSnapshot};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::proxy::{BackendStatus, ProxyRegistry};

/// Body of an add/remove request.
#[derive(Debug, Deserialize)]
pub struct BackendUpdate {
    pub proxies: Vec<ProxyBackends>,
}

#[derive(Debug, Deserialize)]
pub struct ProxyBackends {
    pub name: String,
    pub backends: Vec<BackendInfo>,
}

/// The runtime backend-management surface.
pub struct AdminServer {
    registry: Arc<ProxyRegistry>,
}

impl AdminServer {
    pub fn new(registry: Arc<ProxyRegistry>) -> Self {
        Self { registry }
    }

    pub async fn run(self, addr: &str) -> Result<()> {
        let app = Router::new()
            .route("/backends/add", post(handle_add))
            .route("/backends/remove", post(handle_remove))
            .route("/backends/list", get(handle_list))
            .with_state(self.registry);

        let listener = TcpListener::bind(addr).await?;
        info!("admin server listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await.map_err(RelayError::Io)?;
        Ok(())
    }
}

fn parse_update(body: &[u8]) -> std::result::Result<BackendUpdate, (StatusCode, String)> {
    serde_yaml::from_slice(body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid request body: {}", e)))
}

async fn handle_add(
    State(registry): State<Arc<ProxyRegistry>>,
    body: Bytes,
) -> std::result::Result<StatusCode, (StatusCode, String)> {
    let update = parse_update(&body)?;
    apply_add(&registry, update).await;
    Ok(StatusCode::OK)
}

async fn handle_remove(
    State(registry): State<Arc<ProxyRegistry>>,
    body: Bytes,
) -> std::result::Result<StatusCode, (StatusCode, String)> {
    let update = parse_update(&body)?;
    apply_remove(&registry, update);
    Ok(StatusCode::OK)
}

async fn handle_list(
    State(registry): State<Arc<ProxyRegistry>>,
) -> Json<HashMap<String, Vec<BackendStatus>>> {
    Json(list_backends(&registry))
}

async fn apply_add(registry: &ProxyRegistry, update: BackendUpdate) {
    for proxy_update in update.proxies {
        match registry.get(&proxy_update.name) {
            Some(proxy) => {
                for info in proxy_update.backends {
                    proxy.add_backend(info).await;
                }
            }
            None => warn!("no proxy named '{}', skipping", proxy_update.name),
        }
    }
}

fn apply_remove(registry: &ProxyRegistry, update: BackendUpdate) {
    for proxy_update in update.proxies {
        match registry.get(&proxy_update.name) {
            Some(proxy) => {
                for info in proxy_update.backends {
                    if let Err(e) = proxy.remove_backend(&info.addr) {
                        warn!(
                            "failed to remove backend {} from proxy '{}': {}",
                            info.addr, proxy_update.name, e
                        );
                    }
                }
            }
            None => warn!("no proxy named '{}', skipping", proxy_update.name),
        }
    }
}

fn list_backends(registry: &ProxyRegistry) -> HashMap<String, Vec<BackendStatus>> {
    registry
        .all()
        .iter()
        .map(|proxy| (proxy.name().to_string(), proxy.backends()))
        .collect()
}

/// Serves the metrics snapshot when a metrics address is configured.
pub struct MetricsServer {
    metrics: Arc<MetricsRegistry>,
}

impl MetricsServer {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }

    pub async fn run(self, addr: &str) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(handle_metrics))
            .with_state(self.metrics);

        let listener = TcpListener::bind(addr).await?;
        info!("metrics server listening on {}", listener.local_addr()?);
        axum::serve(listener, app).await.map_err(RelayError::Io)?;
        Ok(())
    }
}

async fn handle_metrics(State(metrics): State<Arc<MetricsRegistry>>) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::RoundRobin;
    use crate::proxy::{Proxy, DEFAULT_REQUEST_TIMEOUT};
    use crate::resolver::Resolver;

    #[test]
    fn test_update_parses_from_yaml() {
        let body = r#"
proxies:
  - name: search
    backends:
      - addr: 10.0.0.1:9000
        readiness: { protocol: tcp, port: 9000 }
      - addr: search.internal:9000
        circuitBreaker: { successiveFailures: 3, pauseTime: 5s }
"#;
        let update = parse_update(body.as_bytes()).unwrap();
        assert_eq!(update.proxies.len(), 1);
        assert_eq!(update.proxies[0].name, "search");
        assert_eq!(update.proxies[0].backends.len(), 2);
        assert_eq!(update.proxies[0].backends[0].addr, "10.0.0.1:9000");
        assert!(update.proxies[0].backends[1].circuit_breaker.is_some());
    }

    #[test]
    fn test_garbage_body_is_bad_request() {
        let error = parse_update(b"{ not yaml: [").unwrap_err();
        assert_eq!(error.0, StatusCode::BAD_REQUEST);
    }

    fn registry_with(names: &[&str]) -> Arc<ProxyRegistry> {
        let metrics = MetricsRegistry::new();
        let proxies = names
            .iter()
            .map(|name| {
                let balancer = RoundRobin::new(Resolver::spawn(Resolver::DEFAULT_INTERVAL));
                Proxy::new(
                    *name,
                    "127.0.0.1:0",
                    DEFAULT_REQUEST_TIMEOUT,
                    balancer,
                    metrics.for_proxy(name),
                )
            })
            .collect();
        Arc::new(ProxyRegistry::new(proxies))
    }

    #[tokio::test]
    async fn test_add_then_remove_through_update() {
        let registry = registry_with(&["search"]);
        let update = parse_update(
            b"proxies:\n  - name: search\n    backends:\n      - addr: 127.0.0.1:19901\n",
        )
        .unwrap();
        apply_add(&registry, update).await;
        assert_eq!(registry.get("search").unwrap().backends().len(), 1);

        let update = parse_update(
            b"proxies:\n  - name: search\n    backends:\n      - addr: 127.0.0.1:19901\n",
        )
        .unwrap();
        apply_remove(&registry, update);
        assert!(registry.get("search").unwrap().backends().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_proxy_is_skipped() {
        let registry = registry_with(&["search"]);
        let update = parse_update(
            b"proxies:\n  - name: nonexistent\n    backends:\n      - addr: 127.0.0.1:19902\n",
        )
        .unwrap();
        // Logged and skipped, no panic, no mutation.
        apply_add(&registry, update).await;
        assert!(registry.get("search").unwrap().backends().is_empty());
    }

    #[tokio::test]
    async fn test_list_shape() {
        let registry = registry_with(&["search", "feed"]);
        registry
            .get("search")
            .unwrap()
            .add_backend(BackendInfo::plain("127.0.0.1:19903"))
            .await;

        let listing = list_backends(&registry);
        assert_eq!(listing.len(), 2);
        assert_eq!(listing["search"].len(), 1);
        assert_eq!(listing["search"][0].addr, "127.0.0.1:19903");
        assert!(listing["feed"].is_empty());
    }
}
