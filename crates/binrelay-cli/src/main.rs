//! # binrelay Entry Point
//!
//! Starts every configured proxy listener, the admin server and, when
//! configured, the metrics server.
//!
//! ```bash
//! binrelay --config binrelay.yaml
//! binrelay --config binrelay.yaml --log-file /var/log/binrelay.log --log-level debug
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use argh::FromArgs;
use binrelay_cli::config;
use binrelay_cli::rolling::RollingWriter;
use binrelay_metrics::MetricsRegistry;
use binrelay_proxy::proxy::DEFAULT_REQUEST_TIMEOUT;
use binrelay_proxy::{AdminServer, MetricsServer, Proxy, ProxyRegistry, Resolver, RoundRobin};
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// a transparent proxy between binary RPC clients and pooled backend servers
struct Cli {
    /// load configuration from FILE
    #[argh(option, short = 'c')]
    config: String,

    /// log file name; logs go to stdout when omitted
    #[argh(option)]
    log_file: Option<String>,

    /// one of: trace, debug, info, warn, error
    #[argh(option, default = "\"info\".to_string()")]
    log_level: String,

    /// size of one log file in megabytes
    #[argh(option, default = "50")]
    log_size: u64,

    /// number of rotated log files kept
    #[argh(option, default = "10")]
    log_backups: usize,
}

fn init_logging(cli: &Cli) -> Result<()> {
    // RUST_LOG wins over --log-level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));

    match &cli.log_file {
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        Some(path) => {
            let writer = RollingWriter::open(path, cli.log_size, cli.log_backups)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(writer))
                .with_ansi(false)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();
    init_logging(&cli)?;

    let config = config::load(Path::new(&cli.config))?;

    let resolver = Resolver::spawn(Resolver::DEFAULT_INTERVAL);
    let metrics = Arc::new(MetricsRegistry::new());

    let mut proxies = Vec::new();
    for proxy_conf in &config.proxies {
        let balancer = RoundRobin::new(Arc::clone(&resolver));
        for backend in &proxy_conf.backends {
            balancer.add_backend(backend.clone()).await;
        }
        let request_timeout = proxy_conf.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        proxies.push(Proxy::new(
            proxy_conf.name.clone(),
            proxy_conf.listen.clone(),
            request_timeout,
            balancer,
            metrics.for_proxy(&proxy_conf.name),
        ));
        tracing::info!(
            "configured proxy {} on {} with {} backends",
            proxy_conf.name,
            proxy_conf.listen,
            proxy_conf.backends.len()
        );
    }
    let registry = Arc::new(ProxyRegistry::new(proxies));

    let admin = AdminServer::new(Arc::clone(&registry));
    let admin_addr = config.admin.addr.clone();
    tokio::spawn(async move {
        if let Err(e) = admin.run(&admin_addr).await {
            tracing::error!("admin server failed: {}", e);
        }
    });

    if let Some(metrics_conf) = &config.metrics {
        let server = MetricsServer::new(Arc::clone(&metrics));
        let metrics_addr = metrics_conf.addr.clone();
        tokio::spawn(async move {
            if let Err(e) = server.run(&metrics_addr).await {
                tracing::error!("metrics server failed: {}", e);
            }
        });
    }

    registry.run_all().await?;
    Ok(())
}
