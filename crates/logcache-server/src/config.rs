//! Node configuration from environment variables.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `ADDR` | `0.0.0.0:8080` | gRPC listen address |
//! | `HEALTH_PORT` | `6060` | HTTP health/metrics port |
//! | `NODE_INDEX` | `0` | This node's position in `NODE_ADDRS` |
//! | `NODE_ADDRS` | empty | Comma-separated cluster addresses, ordered by node index |
//! | `EXTERNAL_ADDR` | unset | Address the scheduler refers to this node as |
//! | `MAX_PER_SOURCE` | `100000` | Envelope cap per source id |
//! | `MIN_SIZE` | `500000` | Pruning floor for the whole store |
//! | `MEMORY_LIMIT_PERCENT` | `50` | Memory watermark that triggers pruning |
//! | `QUERY_TIMEOUT_SECS` | `10` | Time limit for a single PromQL query |
//! | `CA_PATH` / `CERT_PATH` / `KEY_PATH` | unset | TLS material (all or none) |

use std::time::Duration;

use crate::error::NodeError;

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub health_port: u16,
    pub node_index: usize,
    pub node_addrs: Vec<String>,
    pub external_addr: Option<String>,
    pub max_per_source: usize,
    pub min_size: usize,
    pub memory_limit_percent: f64,
    pub query_timeout: Duration,
    pub tls: Option<TlsConfig>,
}

/// Paths to PEM-encoded TLS material shared by the server and peer clients.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub ca_path: String,
    pub cert_path: String,
    pub key_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self, NodeError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, NodeError> {
        let addr = lookup("ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let health_port = parse_or(&lookup, "HEALTH_PORT", 6060)?;
        let node_index = parse_or(&lookup, "NODE_INDEX", 0)?;
        let max_per_source = parse_or(&lookup, "MAX_PER_SOURCE", 100_000)?;
        let min_size = parse_or(&lookup, "MIN_SIZE", 500_000)?;
        let memory_limit_percent = parse_or(&lookup, "MEMORY_LIMIT_PERCENT", 50.0)?;
        let query_timeout = Duration::from_secs(parse_or(&lookup, "QUERY_TIMEOUT_SECS", 10)?);

        let node_addrs = lookup("NODE_ADDRS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if !node_addrs.is_empty() && node_index >= node_addrs.len() {
            return Err(NodeError::Config(format!(
                "NODE_INDEX {node_index} is out of range for {} node addresses",
                node_addrs.len()
            )));
        }

        let tls = match (lookup("CA_PATH"), lookup("CERT_PATH"), lookup("KEY_PATH")) {
            (Some(ca_path), Some(cert_path), Some(key_path)) => Some(TlsConfig {
                ca_path,
                cert_path,
                key_path,
            }),
            (None, None, None) => None,
            _ => {
                return Err(NodeError::Config(
                    "CA_PATH, CERT_PATH and KEY_PATH must be set together".to_string(),
                ))
            }
        };

        Ok(Self {
            addr,
            health_port,
            node_index,
            node_addrs,
            external_addr: lookup("EXTERNAL_ADDR"),
            max_per_source,
            min_size,
            memory_limit_percent,
            query_timeout,
            tls,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, NodeError> {
    match lookup(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| NodeError::Config(format!("{name} is not a valid value: {raw}"))),
        None => Ok(default),
    }
}
