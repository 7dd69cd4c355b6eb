//! Derives the live-set of storage nodes from heartbeat timestamps in the KV.

use std::hash::Hasher;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::debug;
use siphasher::sip::SipHasher13;

use crate::error::Error;
use crate::kv::KvStore;

/// Stable id for a node URL, used as the KV key suffix `node:{nodeId}`.
/// Deterministic across processes since it is a pure function of the URL.
pub fn node_id_for(url: &str) -> String {
    let mut hasher = SipHasher13::new();
    hasher.write(url.as_bytes());
    format!("{:016x}", hasher.finish())
}

pub fn node_heartbeat_key(url: &str) -> String {
    format!("node:{}", node_id_for(url))
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis()
}

pub struct NodeRegistry {
    /// Configuration order, preserved so round-robin placement is
    /// deterministic across calls.
    nodes: Vec<String>,
    heartbeat_dead: Duration,
}

impl NodeRegistry {
    pub fn new(nodes: Vec<String>, heartbeat_dead: Duration) -> Self {
        Self {
            nodes,
            heartbeat_dead,
        }
    }

    pub fn configured_nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Returns `true` iff `lastSeen` is present and within the dead window.
    async fn is_alive(&self, kv: &dyn KvStore, url: &str) -> Result<bool, Error> {
        let key = node_heartbeat_key(url);
        match kv.get(&key).await? {
            None => Ok(false),
            Some(raw) => {
                let last_seen: u128 = raw.parse().unwrap_or(0);
                let now = now_ms();
                Ok(now.saturating_sub(last_seen) < self.heartbeat_dead.as_millis())
            }
        }
    }

    /// The subset of configured nodes currently believed alive, in
    /// configuration order.
    pub async fn alive_nodes(&self, kv: &dyn KvStore) -> Result<Vec<String>, Error> {
        let mut alive = Vec::new();
        for url in &self.nodes {
            if self.is_alive(kv, url).await.unwrap_or(false) {
                alive.push(url.clone());
            } else {
                debug!("node {} considered dead", url);
            }
        }
        Ok(alive)
    }
}
