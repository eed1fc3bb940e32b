use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Duration;

use crate::state::DEFAULT_BATCH_RETENTION;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_LOG_FILTER: &str = "rns_bulk_api=info,rns_bulk=info,tower_http=info";

/// Settings for the HTTP surface; chain settings come from `rns_bulk::config`
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// Emit logs as JSON lines instead of the human format
    pub json_logs: bool,
    /// How long finished batches stay queryable
    pub batch_retention: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .context("BIND_ADDR must be a socket address like 0.0.0.0:8080")?;
        let json_logs = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let batch_retention = match std::env::var("BATCH_RETENTION_SECS") {
            Ok(v) => Duration::from_secs(
                v.parse()
                    .context("BATCH_RETENTION_SECS must be a number of seconds")?,
            ),
            Err(_) => DEFAULT_BATCH_RETENTION,
        };

        Ok(Self {
            bind_addr,
            json_logs,
            batch_retention,
        })
    }
}

/// Install the global subscriber, honouring `RUST_LOG`
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
