//! Log Cache node entry point.
//!
//! A Log Cache node keeps a volatile, time-ordered cache of telemetry
//! envelopes, owns a slice of the source-id hash space, and forwards the
//! rest of the traffic to its peers.
//!
//! ## Configuration
//!
//! All configuration is read from the environment; see [`config`] for the
//! variables and their defaults. Restarting a node loses its cached data by
//! design.
//!
//! ## Logging
//!
//! Controlled via `RUST_LOG` (default `info`):
//! ```bash
//! RUST_LOG=debug cargo run -p logcache-server
//! ```

use std::sync::Arc;

use logcache_server::{config, health, Config, LogCache, PromMetrics};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("starting log cache");

    let config = Config::from_env()?;
    tracing::info!("configuration:");
    tracing::info!("  addr: {}", config.addr);
    tracing::info!("  health port: {}", config.health_port);
    tracing::info!(
        "  cluster: {} nodes, this is node {}",
        config.node_addrs.len().max(1),
        config.node_index
    );
    tracing::info!("  max per source: {}", config.max_per_source);
    tracing::info!("  min size: {}", config.min_size);
    tracing::info!("  memory limit: {}%", config.memory_limit_percent);
    tracing::info!("  query timeout: {:?}", config.query_timeout);

    let registry = Arc::new(prometheus::Registry::new());
    let metrics = Arc::new(PromMetrics::new(Arc::clone(&registry)));

    let mut builder = LogCache::builder()
        .addr(config.addr.as_str())
        .max_per_source(config.max_per_source)
        .min_size(config.min_size)
        .memory_limit_percent(config.memory_limit_percent)
        .metrics(metrics);

    if !config.node_addrs.is_empty() {
        builder = builder.clustered(config.node_index, config.node_addrs.clone());
    }
    if let Some(external_addr) = &config.external_addr {
        builder = builder.external_addr(external_addr.as_str());
    }
    if let Some(tls) = &config.tls {
        builder = builder
            .server_tls(load_server_tls(tls)?)
            .client_tls(load_client_tls(tls)?);
    }

    let mut cache = builder.build();
    cache.start().await?;

    let health_registry = Arc::clone(&registry);
    let health_port = config.health_port;
    let health_server = tokio::spawn(async move {
        if let Err(e) = health::serve(health_port, health_registry).await {
            tracing::error!(error = %e, "health server exited");
        }
    });

    // Run until SIGINT or SIGTERM, then drain.
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        },
    }

    cache.close().await;
    health_server.abort();

    tracing::info!("closing log cache");
    Ok(())
}

fn load_server_tls(tls: &config::TlsConfig) -> Result<ServerTlsConfig, std::io::Error> {
    let cert = std::fs::read(&tls.cert_path)?;
    let key = std::fs::read(&tls.key_path)?;
    let ca = std::fs::read(&tls.ca_path)?;

    Ok(ServerTlsConfig::new()
        .identity(Identity::from_pem(cert, key))
        .client_ca_root(Certificate::from_pem(ca)))
}

fn load_client_tls(tls: &config::TlsConfig) -> Result<ClientTlsConfig, std::io::Error> {
    let cert = std::fs::read(&tls.cert_path)?;
    let key = std::fs::read(&tls.key_path)?;
    let ca = std::fs::read(&tls.ca_path)?;

    Ok(ClientTlsConfig::new()
        .identity(Identity::from_pem(cert, key))
        .ca_certificate(Certificate::from_pem(ca)))
}
