//! Process configuration.
//!
//! Mirrors how `proxmox-backup-proxy` is configured: a required CLI
//! argument for the listening port, an environment variable for the
//! external service endpoint, and a set of tunables that ship with sane
//! defaults and are not expected to change at runtime.

use std::time::Duration;

use anyhow::{bail, Context, Error};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Timing and sizing knobs for the coordinator. All have recommended
/// defaults; nothing here is reloaded after startup.
#[derive(Debug, Clone)]
pub struct Tunables {
    pub chunk_size: usize,
    pub heartbeat_dead: Duration,
    pub lease_tick: Duration,
    pub lease_ttl: Duration,
    pub rebalance_period: Duration,
    pub predict_period: Duration,
    pub predict_threshold: Duration,
    pub cache_count: usize,
    pub cache_bytes: usize,
    pub request_limit: usize,
    pub chunk_fetch_timeout: Duration,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            heartbeat_dead: Duration::from_millis(6000),
            lease_tick: Duration::from_secs(2),
            lease_ttl: Duration::from_secs(5),
            rebalance_period: Duration::from_secs(10),
            predict_period: Duration::from_secs(3),
            predict_threshold: Duration::from_millis(4000),
            cache_count: 5,
            cache_bytes: 200 * 1024 * 1024,
            request_limit: 200 * 1024 * 1024,
            chunk_fetch_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub nodes: Vec<String>,
    pub tunables: Tunables,
}

impl Config {
    /// Build configuration from CLI args and the environment.
    ///
    /// `PORT` is the first positional argument; there is no default, and
    /// the process is expected to exit non-zero when it is missing (the
    /// binary entrypoint does this by propagating our `Err`).
    pub fn from_env(args: impl Iterator<Item = String>, nodes: Vec<String>) -> Result<Self, Error> {
        let mut args = args.skip(1); // skip argv[0]
        let port = args
            .next()
            .context("missing required PORT argument")?
            .parse::<u16>()
            .context("PORT must be a valid port number")?;

        if nodes.len() < 2 {
            bail!("at least two storage nodes must be configured");
        }

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());

        Ok(Self {
            port,
            redis_url,
            nodes,
            tunables: Tunables::default(),
        })
    }
}
