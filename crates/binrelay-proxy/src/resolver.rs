//! Periodic DNS resolution with add/remove diffing.
//!
//! One resolver serves every load balancer in the process. Each registered
//! `host:port` is re-resolved on a fixed interval; the differences against
//! the last known set are reported to the registrant's callback, which runs
//! on its own task so resolver progress is never blocked by pool mutation.
//!
//! Lookup failures feed a per-host counter: once more than
//! [`MAX_RESOLVE_FAILURES`] consecutive lookups fail and addresses are still
//! known, the whole set is reported as removed so the pool prunes backends
//! that can no longer be confirmed. (An earlier iteration of this proxy
//! instead attached a TTL to every resolved address, tuned by an
//! ADDRESS_EXPIRE environment variable; the failure counter needs no extra
//! configuration surface, so that policy was retired.)

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

/// Invoked with `(host, added, removed)` after each lookup that changed the
/// known address set.
pub type ResolveCallback = Arc<dyn Fn(&str, Vec<String>, Vec<String>) + Send + Sync>;

/// Consecutive failures tolerated before the known set is flushed.
const MAX_RESOLVE_FAILURES: u32 = 3;

struct HostEntry {
    addrs: HashSet<String>,
    failures: u32,
    callback: ResolveCallback,
}

/// Periodically expands registered hostnames to literal addresses.
pub struct Resolver {
    interval: Duration,
    stopped: AtomicBool,
    hosts: Mutex<HashMap<String, HostEntry>>,
}

impl Resolver {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

    fn new(interval: Duration) -> Self {
        Self {
            interval,
            stopped: AtomicBool::new(false),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the resolver and starts its periodic loop.
    pub fn spawn(interval: Duration) -> Arc<Self> {
        let resolver = Arc::new(Self::new(interval));
        tokio::spawn(Arc::clone(&resolver).run());
        resolver
    }

    /// Registers `addr` (`host:port`) for periodic resolution and performs
    /// the initial lookup. Re-registering an already-watched address is a
    /// no-op. The callback fires on a separate task.
    pub async fn watch(&self, addr: String, callback: ResolveCallback) {
        {
            let mut hosts = self.hosts.lock().unwrap();
            if hosts.contains_key(&addr) {
                return;
            }
            hosts.insert(
                addr.clone(),
                HostEntry {
                    addrs: HashSet::new(),
                    failures: 0,
                    callback,
                },
            );
        }
        let result = Self::lookup(&addr).await;
        self.apply_lookup(&addr, result);
    }

    /// Stops watching `addr` and returns the addresses last known for it.
    pub fn unwatch(&self, addr: &str) -> Vec<String> {
        let mut hosts = self.hosts.lock().unwrap();
        match hosts.remove(addr) {
            Some(entry) => entry.addrs.into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Addresses currently known for a watched `host:port`.
    pub fn known_addrs(&self, addr: &str) -> Vec<String> {
        let hosts = self.hosts.lock().unwrap();
        hosts
            .get(addr)
            .map(|entry| entry.addrs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!("stopping hostname resolution");
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick of an interval fires immediately; registration
        // already did an initial lookup, so consume it.
        ticker.tick().await;

        while !self.is_stopped() {
            ticker.tick().await;
            let watched: Vec<String> = {
                let hosts = self.hosts.lock().unwrap();
                hosts.keys().cloned().collect()
            };
            for addr in watched {
                let result = Self::lookup(&addr).await;
                self.apply_lookup(&addr, result);
            }
        }
    }

    /// Folds one lookup result into the host's entry and dispatches the
    /// diff callback. Runs the diff under the lock; the callback runs on a
    /// spawned task.
    fn apply_lookup(&self, addr: &str, result: std::io::Result<Vec<String>>) {
        let mut hosts = self.hosts.lock().unwrap();
        let Some(entry) = hosts.get_mut(addr) else {
            // Unwatched while the lookup was in flight.
            return;
        };

        match result {
            Ok(resolved) => {
                entry.failures = 0;
                let current: HashSet<String> = resolved.into_iter().collect();
                let added: Vec<String> = current.difference(&entry.addrs).cloned().collect();
                let removed: Vec<String> = entry.addrs.difference(&current).cloned().collect();
                if added.is_empty() && removed.is_empty() {
                    return;
                }
                info!(
                    "addresses of {} changed: added [{}], removed [{}]",
                    addr,
                    added.join(", "),
                    removed.join(", ")
                );
                entry.addrs = current;
                Self::dispatch(&entry.callback, addr, added, removed);
            }
            Err(e) => {
                entry.failures += 1;
                warn!(
                    "failed to resolve {} ({} consecutive failures): {}",
                    addr, entry.failures, e
                );
                if entry.failures > MAX_RESOLVE_FAILURES && !entry.addrs.is_empty() {
                    let removed: Vec<String> = entry.addrs.drain().collect();
                    entry.failures = 0;
                    warn!(
                        "dropping unconfirmed addresses of {}: [{}]",
                        addr,
                        removed.join(", ")
                    );
                    Self::dispatch(&entry.callback, addr, Vec::new(), removed);
                }
            }
        }
    }

    fn dispatch(callback: &ResolveCallback, addr: &str, added: Vec<String>, removed: Vec<String>) {
        let callback = Arc::clone(callback);
        let addr = addr.to_string();
        tokio::spawn(async move {
            callback(&addr, added, removed);
        });
    }

    /// Resolves `host:port` to literal `addr:port` strings. IPv6 addresses
    /// come back bracketed via `SocketAddr` formatting.
    async fn lookup(addr: &str) -> std::io::Result<Vec<String>> {
        let resolved: Vec<String> = tokio::net::lookup_host(addr)
            .await?
            .map(|socket_addr| socket_addr.to_string())
            .collect();
        debug!("resolved {} to [{}]", addr, resolved.join(", "));
        Ok(resolved)
    }
}
