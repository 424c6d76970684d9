//! The ordered backend pool.
//!
//! A plain `Vec` under one mutex: mutations are linearizable and no
//! operation ever awaits while holding the lock. Index positions are
//! ephemeral — a removal shifts everything after it — which is why
//! `get_index` can legitimately fail during a race with removal; the
//! balancer counts that as a failed attempt.

use std::sync::{Arc, Mutex};

use binrelay_common::{RelayError, Result};

use crate::backend::Endpoint;

#[derive(Default)]
pub struct BackendPool {
    backends: Mutex<Vec<Arc<dyn Endpoint>>>,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, addr: &str) -> bool {
        let backends = self.backends.lock().unwrap();
        backends.iter().any(|b| b.addr() == addr)
    }

    pub fn len(&self) -> usize {
        self.backends.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends; the caller is responsible for duplicate checks.
    pub fn add(&self, backend: Arc<dyn Endpoint>) {
        self.backends.lock().unwrap().push(backend);
    }

    pub fn get(&self, addr: &str) -> Result<Arc<dyn Endpoint>> {
        let backends = self.backends.lock().unwrap();
        backends
            .iter()
            .find(|b| b.addr() == addr)
            .cloned()
            .ok_or_else(|| RelayError::UnknownBackend(addr.to_string()))
    }

    pub fn get_index(&self, index: usize) -> Result<Arc<dyn Endpoint>> {
        let backends = self.backends.lock().unwrap();
        backends.get(index).cloned().ok_or(RelayError::OutOfBounds)
    }

    /// Removes and returns the backend so the caller can `stop()` it.
    pub fn remove(&self, addr: &str) -> Result<Arc<dyn Endpoint>> {
        let mut backends = self.backends.lock().unwrap();
        match backends.iter().position(|b| b.addr() == addr) {
            Some(index) => Ok(backends.remove(index)),
            None => Err(RelayError::UnknownBackend(addr.to_string())),
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn Endpoint>> {
        self.backends.lock().unwrap().clone()
    }
}
