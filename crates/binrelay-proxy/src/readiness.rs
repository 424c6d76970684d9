//! Backend readiness probes.
//!
//! A probe is a cheap liveness check distinct from the RPC channel itself;
//! the backend's connect loop polls it until ready before the first dial.
//! Probe failures never count toward the circuit breaker.

use binrelay_common::addr::{bracket_host, split_addr};
use binrelay_common::config::{ProbeProtocol, ReadinessConf};
use tokio::net::TcpStream;
use tracing::debug;

/// Readiness probe variants, selected by configuration.
#[derive(Debug, Clone)]
pub enum Readiness {
    /// No probe configured: always ready.
    Always,
    /// Ready when a TCP dial to the target succeeds.
    Tcp { target: String },
    /// Ready when a GET returns a status in `[200, 400)`.
    Http { url: String },
}

impl Readiness {
    /// Builds the probe for a backend address. The probe shares the
    /// backend's host (IPv6 literals bracketed) but uses the configured
    /// port, and for HTTP the configured path (default `/`).
    pub fn from_conf(backend_addr: &str, conf: Option<&ReadinessConf>) -> Self {
        let Some(conf) = conf else {
            return Readiness::Always;
        };
        let host = match split_addr(backend_addr) {
            Ok((host, _)) => host,
            Err(_) => backend_addr,
        };
        let host = bracket_host(host);
        match conf.protocol {
            ProbeProtocol::Tcp => Readiness::Tcp {
                target: format!("{}:{}", host, conf.port),
            },
            ProbeProtocol::Http => {
                let path = conf.path.as_deref().unwrap_or("/");
                Readiness::Http {
                    url: format!("http://{}:{}{}", host, conf.port, path),
                }
            }
        }
    }

    pub async fn is_ready(&self) -> bool {
        match self {
            Readiness::Always => true,
            Readiness::Tcp { target } => match TcpStream::connect(target).await {
                Ok(_) => true,
                Err(e) => {
                    debug!("tcp readiness probe of {} failed: {}", target, e);
                    false
                }
            },
            Readiness::Http { url } => match reqwest::get(url).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    (200..400).contains(&status)
                }
                Err(e) => {
                    debug!("http readiness probe of {} failed: {}", url, e);
                    false
                }
            },
        }
    }
}
