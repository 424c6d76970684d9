//! Round-robin load balancing with retry across the pool.
//!
//! A shared atomic cursor picks the starting backend; on attempt-scoped
//! failures the balancer walks the pool, bounded by the size observed at
//! entry. The bound is a cap, not a guarantee that every live backend is
//! tried: removals shift indices while a request is in flight, and a
//! shrunken pool simply costs a failed attempt.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use binrelay_common::addr::{is_ip_literal, split_addr};
use binrelay_common::wire::Message;
use binrelay_common::{BackendInfo, RelayError, Result};
use tracing::{debug, info, warn};

use crate::backend::{Backend, Endpoint};
use crate::breaker::CircuitBreaker;
use crate::pool::BackendPool;
use crate::readiness::Readiness;
use crate::resolver::{ResolveCallback, Resolver};

pub struct RoundRobin {
    resolver: Arc<Resolver>,
    pool: BackendPool,
    cursor: AtomicU32,
    // Handed to resolver callbacks so a dropped balancer stops receiving
    // membership updates.
    weak_self: Weak<RoundRobin>,
}

impl RoundRobin {
    pub fn new(resolver: Arc<Resolver>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            resolver,
            pool: BackendPool::new(),
            cursor: AtomicU32::new(0),
            weak_self: weak_self.clone(),
        })
    }

    /// Adds a backend. IP-literal hosts go straight into the pool; DNS
    /// names register with the resolver, whose diff callback expands them
    /// into literal-address backends inheriting the readiness and circuit
    /// breaker settings.
    pub async fn add_backend(&self, info: BackendInfo) {
        let host = match split_addr(&info.addr) {
            Ok((host, _)) => host,
            Err(e) => {
                warn!("rejecting backend: {}", e);
                return;
            }
        };

        if is_ip_literal(host) {
            self.insert_literal(&info);
            return;
        }

        let balancer = self.weak_self.clone();
        let template = info.clone();
        let callback: ResolveCallback = Arc::new(move |_host, added, removed| {
            let Some(balancer) = balancer.upgrade() else {
                return;
            };
            for addr in added {
                let mut expanded = template.clone();
                expanded.addr = addr;
                balancer.insert_literal(&expanded);
            }
            for addr in removed {
                if let Err(e) = balancer.remove_backend(&addr) {
                    warn!("failed to remove resolved backend {}: {}", addr, e);
                }
            }
        });
        self.resolver.watch(info.addr, callback).await;
    }

    fn insert_literal(&self, info: &BackendInfo) {
        if self.pool.contains(&info.addr) {
            return;
        }
        let readiness = Readiness::from_conf(&info.addr, info.readiness.as_ref());
        let backend = Backend::spawn(info.addr.clone(), readiness);
        let endpoint: Arc<dyn Endpoint> = match &info.circuit_breaker {
            Some(conf) => Arc::new(CircuitBreaker::new(backend, conf)),
            None => backend,
        };
        self.pool.add(endpoint);
        info!("added backend {}", info.addr);
    }

    /// Removes a backend. DNS names unregister from the resolver and all
    /// their known literal addresses are removed in turn; literals are
    /// pulled from the pool and stopped.
    pub fn remove_backend(&self, addr: &str) -> Result<()> {
        let (host, _) = split_addr(addr)?;
        if is_ip_literal(host) {
            let endpoint = self.pool.remove(addr)?;
            endpoint.stop();
            info!("removed backend {}", addr);
            Ok(())
        } else {
            for resolved in self.resolver.unwatch(addr) {
                if let Err(e) = self.remove_backend(&resolved) {
                    warn!("failed to remove resolved backend {}: {}", resolved, e);
                }
            }
            Ok(())
        }
    }

    /// Dispatches one request, retrying across up to `pool.len()` backends.
    /// The deadline is a wall-clock instant and rides along unchanged
    /// through every retry.
    pub async fn send(&self, request: Message, deadline: Instant) -> Result<Message> {
        let total = self.pool.len();
        if total == 0 {
            return Err(RelayError::NoBackendAvailable);
        }

        let start = self
            .cursor
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1) as usize;

        for attempt in 0..total {
            let index = (start + attempt) % total;
            let outcome = match self.pool.get_index(index) {
                Ok(endpoint) => endpoint.send(request.clone(), deadline).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    debug!(
                        "attempt {}/{} failed, trying next backend: {}",
                        attempt + 1,
                        total,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(RelayError::AllBackendsFailed)
    }

    /// Snapshot of the pooled endpoints, for the admin surface.
    pub fn backends(&self) -> Vec<Arc<dyn Endpoint>> {
        self.pool.snapshot()
    }

    pub fn backend_count(&self) -> usize {
        self.pool.len()
    }

    #[cfg(test)]
    pub(crate) fn add_endpoint(&self, endpoint: Arc<dyn Endpoint>) {
        self.pool.add(endpoint);
    }
}
