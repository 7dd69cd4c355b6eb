//! Coordinator process entrypoint.
//!
//! `PORT` is a required positional argument, `NODES` a required
//! comma-separated environment variable, `REDIS_URL` optional. Logging
//! follows `RUST_LOG` via `env_logger`, the same as the rest of the backup
//! stack's daemons.

use std::sync::Arc;

use anyhow::{bail, Context};
use log::info;

use orbitfs::config::Config;
use orbitfs::coordinator::Coordinator;
use orbitfs::kv::RedisKv;
use orbitfs::{precache, rebalancer, server};

fn master_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| format!("master-{}", std::process::id()))
}

fn nodes_from_env() -> anyhow::Result<Vec<String>> {
    let raw = std::env::var("NODES").context("NODES environment variable is required")?;
    let nodes: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if nodes.len() < 2 {
        bail!("NODES must list at least two storage node URLs");
    }
    Ok(nodes)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let nodes = nodes_from_env()?;
    let config = Config::from_env(std::env::args(), nodes)?;
    let tunables = config.tunables.clone();

    let kv = RedisKv::connect(&config.redis_url)
        .await
        .with_context(|| format!("connecting to KV at {}", config.redis_url))?;

    let coordinator = Coordinator::new(config, Arc::new(kv), master_id());

    coordinator
        .lease
        .clone()
        .spawn(coordinator.kv.clone(), tunables.lease_tick, tunables.lease_ttl);
    tokio::spawn(rebalancer::run(coordinator.clone()));
    tokio::spawn(precache::run(coordinator.clone()));

    info!(
        "orbitfs-coordinator starting as {}, {} configured nodes",
        coordinator.lease.master_id(),
        coordinator.registry.configured_nodes().len()
    );

    server::serve(coordinator).await?;
    Ok(())
}
