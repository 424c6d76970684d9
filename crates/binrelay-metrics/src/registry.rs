// Copyright 2025 binrelay Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::snapshot::{MetricsSnapshot, ProxyStats};

/// Per-proxy request counters.
///
/// All counters are monotone; `Relaxed` ordering is sufficient because the
/// values are only ever read for reporting.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    requests: AtomicU64,
    replies: AtomicU64,
    exceptions: AtomicU64,
    timeouts: AtomicU64,
}

impl ProxyMetrics {
    /// A request was admitted at the client reader.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// A backend response was relayed to the client.
    pub fn record_reply(&self) {
        self.replies.fetch_add(1, Ordering::Relaxed);
    }

    /// An exception was synthesised on behalf of a failed request.
    pub fn record_exception(&self) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
    }

    /// A request expired before any backend answered.
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ProxyStats {
        ProxyStats {
            requests: self.requests.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Hands out per-proxy counter handles and aggregates snapshots.
pub struct MetricsRegistry {
    proxies: Mutex<HashMap<String, Arc<ProxyMetrics>>>,
    started: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            proxies: Mutex::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    /// The counter handle for a proxy, created on first use.
    pub fn for_proxy(&self, name: &str) -> Arc<ProxyMetrics> {
        let mut proxies = self.proxies.lock().unwrap();
        proxies
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ProxyMetrics::default()))
            .clone()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let proxies = self.proxies.lock().unwrap();
        MetricsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            proxies: proxies
                .iter()
                .map(|(name, metrics)| (name.clone(), metrics.stats()))
                .collect(),
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
