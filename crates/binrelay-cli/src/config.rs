//! Startup configuration file.
//!
//! ```yaml
//! admin:
//!   addr: 127.0.0.1:9099
//! metrics:
//!   addr: 127.0.0.1:9100
//! proxies:
//!   - name: search
//!     listen: 0.0.0.0:9090
//!     requestTimeout: 30s
//!     backends:
//!       - addr: 10.1.0.12:9000
//!         readiness: { protocol: http, port: 8080, path: /healthz }
//!         circuitBreaker: { successiveFailures: 3, pauseTime: 5s }
//!       - addr: search.internal:9000
//! ```

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use binrelay_common::BackendInfo;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub admin: AdminConf,
    #[serde(default)]
    pub metrics: Option<MetricsConf>,
    pub proxies: Vec<ProxyConf>,
}

#[derive(Debug, Deserialize)]
pub struct AdminConf {
    pub addr: String,
}

#[derive(Debug, Deserialize)]
pub struct MetricsConf {
    pub addr: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConf {
    pub name: String,
    pub listen: String,
    /// Per-request deadline; 60 s when omitted.
    #[serde(default, with = "binrelay_common::config::opt_duration_str")]
    pub request_timeout: Option<Duration>,
    pub backends: Vec<BackendInfo>,
}

pub fn load(path: &Path) -> anyhow::Result<Config> {
    let file = File::open(path)
        .with_context(|| format!("cannot open config file {}", path.display()))?;
    let config: Config = serde_yaml::from_reader(file)
        .with_context(|| format!("cannot parse config file {}", path.display()))?;
    Ok(config)
}
