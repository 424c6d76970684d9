//! Circuit breaker wrapper.
//!
//! Composes around any [`Endpoint`]. After `successive_failures` failed
//! sends the circuit opens for `pause_time`: sends short-circuit with a
//! circuit-open error and never touch the wrapped backend. The failure
//! counter is intentionally left as-is when the pause begins — only a
//! successful response resets it, so a single failure right after the pause
//! re-opens the circuit.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use binrelay_common::wire::Message;
use binrelay_common::{BreakerConf, RelayError, Result};
use tracing::{info, warn};

use crate::backend::Endpoint;

pub struct CircuitBreaker {
    inner: Arc<dyn Endpoint>,
    successive_failures: u32,
    pause_time: Duration,
    failures: AtomicU32,
    resume_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(inner: Arc<dyn Endpoint>, conf: &BreakerConf) -> Self {
        Self {
            inner,
            successive_failures: conf.successive_failures,
            pause_time: conf.pause_time,
            failures: AtomicU32::new(0),
            resume_at: Mutex::new(None),
        }
    }

    /// Whether sends are currently short-circuited.
    pub fn is_open(&self) -> bool {
        match *self.resume_at.lock().unwrap() {
            Some(resume_at) => Instant::now() < resume_at,
            None => false,
        }
    }

    fn check_pause(&self) -> Result<()> {
        let mut resume_at = self.resume_at.lock().unwrap();
        match *resume_at {
            Some(t) if Instant::now() < t => {
                Err(RelayError::CircuitOpen(self.inner.addr().to_string()))
            }
            Some(_) => {
                // Pause elapsed; the failure counter keeps its value.
                *resume_at = None;
                info!("circuit for backend {} resumed", self.inner.addr());
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.successive_failures {
            let mut resume_at = self.resume_at.lock().unwrap();
            *resume_at = Some(Instant::now() + self.pause_time);
            warn!(
                "circuit for backend {} opened after {} successive failures, pausing {:?}",
                self.inner.addr(),
                failures,
                self.pause_time
            );
        }
    }
}

#[async_trait]
impl Endpoint for CircuitBreaker {
    fn addr(&self) -> &str {
        self.inner.addr()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn send(&self, request: Message, deadline: Instant) -> Result<Message> {
        self.check_pause()?;
        match self.inner.send(request, deadline).await {
            Ok(response) => {
                self.failures.store(0, Ordering::SeqCst);
                Ok(response)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    fn stop(&self) {
        self.inner.stop()
    }
}
