//! Proxy listeners and the process-wide registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use binrelay_common::{BackendInfo, Result};
use binrelay_metrics::ProxyMetrics;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::balancer::RoundRobin;
use crate::client::ClientConn;
use crate::seq_id::SeqIdAllocator;

/// Fallback when a proxy has no `requestTimeout` configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One pooled backend as reported by the admin list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackendStatus {
    pub addr: String,
    pub connected: bool,
}

/// One listening proxy: an accept loop feeding client connections that all
/// share this proxy's sequence allocator and load balancer.
pub struct Proxy {
    name: String,
    listen: String,
    request_timeout: Duration,
    allocator: Arc<SeqIdAllocator>,
    balancer: Arc<RoundRobin>,
    metrics: Arc<ProxyMetrics>,
    clients: Mutex<HashMap<u64, SocketAddr>>,
    next_client_id: AtomicU64,
}

impl Proxy {
    pub fn new(
        name: impl Into<String>,
        listen: impl Into<String>,
        request_timeout: Duration,
        balancer: Arc<RoundRobin>,
        metrics: Arc<ProxyMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            listen: listen.into(),
            request_timeout,
            allocator: Arc::new(SeqIdAllocator::new()),
            balancer,
            metrics,
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn add_backend(&self, info: BackendInfo) {
        self.balancer.add_backend(info).await;
    }

    pub fn remove_backend(&self, addr: &str) -> Result<()> {
        self.balancer.remove_backend(addr)
    }

    /// Pooled backends with their connectivity, for the admin surface.
    pub fn backends(&self) -> Vec<BackendStatus> {
        self.balancer
            .backends()
            .iter()
            .map(|endpoint| BackendStatus {
                addr: endpoint.addr().to_string(),
                connected: endpoint.is_connected(),
            })
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Binds the listener. Failing to bind is the one startup error that
    /// takes the process down.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.listen).await?;
        info!(
            "proxy {} listening on {}",
            self.name,
            listener.local_addr()?
        );
        Ok(listener)
    }

    /// Accept loop. Each accepted socket becomes a tracked client
    /// connection which deregisters itself on disconnect.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("proxy {} failed to accept a connection: {}", self.name, e);
                    continue;
                }
            };
            info!("proxy {} accepted connection from {}", self.name, peer);

            let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
            self.clients.lock().unwrap().insert(id, peer);

            let proxy = Arc::downgrade(&self);
            let on_close = Box::new(move || {
                if let Some(proxy) = proxy.upgrade() {
                    proxy.clients.lock().unwrap().remove(&id);
                }
            });

            ClientConn::spawn(
                stream,
                peer,
                Arc::clone(&self.allocator),
                Arc::clone(&self.balancer),
                self.request_timeout,
                Arc::clone(&self.metrics),
                on_close,
            );
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }
}

/// All configured proxies, addressable by name for the admin surface.
pub struct ProxyRegistry {
    proxies: Vec<Arc<Proxy>>,
}

impl ProxyRegistry {
    pub fn new(proxies: Vec<Arc<Proxy>>) -> Self {
        Self { proxies }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Proxy>> {
        self.proxies
            .iter()
            .find(|proxy| proxy.name() == name)
            .cloned()
    }

    pub fn all(&self) -> &[Arc<Proxy>] {
        &self.proxies
    }

    /// Runs every proxy's accept loop; the first bind failure aborts.
    pub async fn run_all(&self) -> Result<()> {
        let runs = self
            .proxies
            .iter()
            .map(|proxy| Arc::clone(proxy).run())
            .collect::<Vec<_>>();
        futures::future::try_join_all(runs).await?;
        Ok(())
    }
}
