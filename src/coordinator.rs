//! The shared, long-lived coordinator state.
//!
//! One `Arc<Coordinator>` is built at startup and cloned into the HTTP
//! server and each background loop, mirroring how `proxmox-backup-proxy`
//! builds a single server-state object and moves clones of its `Arc`-wrapped
//! pieces into every spawned task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::FileCache;
use crate::config::Config;
use crate::kv::KvStore;
use crate::lease::LeaderLease;
use crate::node_client::NodeClient;
use crate::registry::NodeRegistry;

pub struct Coordinator {
    pub config: Config,
    pub kv: Arc<dyn KvStore>,
    pub registry: NodeRegistry,
    pub node_client: NodeClient,
    pub lease: Arc<LeaderLease>,
    pub cache: FileCache,
    round_robin_index: AtomicU64,
}

impl Coordinator {
    pub fn new(config: Config, kv: Arc<dyn KvStore>, master_id: String) -> Arc<Self> {
        let registry = NodeRegistry::new(config.nodes.clone(), config.tunables.heartbeat_dead);
        let node_client = NodeClient::new(config.tunables.chunk_fetch_timeout);
        let cache = FileCache::new(config.tunables.cache_count, config.tunables.cache_bytes);
        let lease = LeaderLease::new(master_id);

        Arc::new(Self {
            config,
            kv,
            registry,
            node_client,
            lease,
            cache,
            round_robin_index: AtomicU64::new(0),
        })
    }

    pub fn am_i_leader(&self) -> bool {
        self.lease.am_i_leader()
    }

    /// Atomically advances and returns the pre-increment value, so each
    /// chunk placement decision gets a distinct index even under concurrent
    /// uploads.
    pub fn next_round_robin(&self) -> u64 {
        self.round_robin_index.fetch_add(1, Ordering::SeqCst)
    }
}
