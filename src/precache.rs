//! Predictive pre-cache loop: reconstructs and caches files ahead of a
//! replica's scheduled blackout.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::metadata::FileMetadata;
use crate::reader::Reconstructor;

pub async fn run(coordinator: Arc<Coordinator>) {
    let mut interval = tokio::time::interval(coordinator.config.tunables.predict_period);
    loop {
        interval.tick().await;
        if !coordinator.am_i_leader() {
            continue;
        }
        run_once(&coordinator).await;
    }
}

/// One pre-cache pass, split out so it can be driven directly from tests.
pub async fn run_once(coordinator: &Coordinator) {
    for node_url in coordinator.registry.configured_nodes().to_vec() {
        let status = match coordinator.node_client.orbital_status(&node_url).await {
            Ok(status) => status,
            Err(err) => {
                debug!("orbital-status poll of {} failed: {}", node_url, err);
                continue;
            }
        };

        let threshold_ms = coordinator.config.tunables.predict_threshold.as_millis() as i64;
        if !status.is_in_blackout && status.next_blackout_in_ms <= threshold_ms {
            pre_cache_from_node(coordinator, &node_url).await;
        }
    }
}

/// Reconstruct and cache every file that references `node_url`, avoiding it
/// as a replica source. A chunk whose only remaining replica is the
/// avoided node cannot be pre-cached; the whole file is skipped and logged,
/// not failed.
async fn pre_cache_from_node(coordinator: &Coordinator, node_url: &str) {
    let keys = match coordinator.kv.keys("file:").await {
        Ok(keys) => keys,
        Err(err) => {
            warn!("pre-cache: listing file metadata failed: {}", err);
            return;
        }
    };

    let mut avoid = HashSet::new();
    avoid.insert(node_url.to_string());

    for key in keys {
        let file_id = key.trim_start_matches("file:").to_string();
        if coordinator.cache.has(&file_id).await {
            continue;
        }

        let raw = match coordinator.kv.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(err) => {
                warn!("pre-cache: reading {} failed: {}", key, err);
                continue;
            }
        };
        let metadata = match FileMetadata::from_json(&raw) {
            Ok(m) => m,
            Err(err) => {
                warn!("pre-cache: unreadable metadata at {}: {}", key, err);
                continue;
            }
        };
        if !metadata.chunks.iter().any(|c| c.nodes.iter().any(|n| n == node_url)) {
            continue;
        }

        let reconstructor = Reconstructor::new(coordinator);
        match reconstructor.reconstruct(&file_id, &avoid).await {
            Ok(file) => {
                coordinator.cache.set(file_id.clone(), file).await;
                info!("pre-cache: warmed {} ahead of {} blackout", file_id, node_url);
            }
            Err(err) => {
                debug!(
                    "pre-cache: cannot reconstruct {} avoiding {} (logged, not failed): {}",
                    file_id, node_url, err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Coordinator;
    use crate::kv::{KvStore, MemoryKv};
    use crate::metadata::ChunkMeta;
    use crate::test_support::FakeNode;
    use std::time::Duration;

    async fn coordinator_with(nodes: Vec<String>) -> std::sync::Arc<Coordinator> {
        let kv: std::sync::Arc<dyn KvStore> = std::sync::Arc::new(MemoryKv::new());
        let config = crate::config::Config {
            port: 0,
            redis_url: "".into(),
            nodes,
            tunables: Default::default(),
        };
        let coordinator = Coordinator::new(config, kv, "m1".into());
        coordinator.lease.tick(coordinator.kv.as_ref(), Duration::from_secs(5)).await;
        coordinator
    }

    #[tokio::test]
    async fn warms_cache_via_surviving_replica() {
        let n1 = FakeNode::spawn().await;
        let n2 = FakeNode::spawn().await;
        let coordinator = coordinator_with(vec![n1.url.clone(), n2.url.clone()]).await;

        let payload = b"0123456789";
        coordinator.node_client.store_chunk(&n1.url, "f1_chunk_0", payload).await.unwrap();
        coordinator.node_client.store_chunk(&n2.url, "f1_chunk_0", payload).await.unwrap();

        let hash = {
            let mut h = openssl::sha::Sha256::new();
            h.update(payload);
            hex::encode(h.finish())
        };
        let metadata = FileMetadata {
            file_id: "f1".into(),
            filename: "a.bin".into(),
            total_chunks: 1,
            chunks: vec![ChunkMeta {
                chunk_id: "f1_chunk_0".into(),
                hash,
                nodes: vec![n1.url.clone(), n2.url.clone()],
            }],
        };
        coordinator.kv.set(&metadata.key(), &metadata.to_json().unwrap()).await.unwrap();

        n1.set_blackout(false, 2000); // blackout imminent on n1

        run_once(&coordinator).await;

        let cached = coordinator.cache.get("f1").await.expect("file should be cached");
        assert_eq!(cached.buffer, payload.to_vec());
    }

    #[tokio::test]
    async fn skips_file_when_no_surviving_replica() {
        let n1 = FakeNode::spawn().await;
        let n2 = FakeNode::spawn().await;
        let coordinator = coordinator_with(vec![n1.url.clone(), n2.url.clone()]).await;

        // only n1 actually has the bytes; n1 is about to black out
        let payload = b"lonely";
        coordinator.node_client.store_chunk(&n1.url, "f1_chunk_0", payload).await.unwrap();
        let hash = {
            let mut h = openssl::sha::Sha256::new();
            h.update(payload);
            hex::encode(h.finish())
        };
        let metadata = FileMetadata {
            file_id: "f1".into(),
            filename: "a.bin".into(),
            total_chunks: 1,
            chunks: vec![ChunkMeta { chunk_id: "f1_chunk_0".into(), hash, nodes: vec![n1.url.clone()] }],
        };
        coordinator.kv.set(&metadata.key(), &metadata.to_json().unwrap()).await.unwrap();

        n1.set_blackout(false, 1000);
        run_once(&coordinator).await;

        assert!(!coordinator.cache.has("f1").await);
    }

    #[tokio::test]
    async fn skips_node_not_near_blackout() {
        let n1 = FakeNode::spawn().await;
        let n2 = FakeNode::spawn().await;
        let coordinator = coordinator_with(vec![n1.url.clone(), n2.url.clone()]).await;
        n1.set_blackout(false, 60_000); // far away
        run_once(&coordinator).await;
        // nothing to assert beyond "did not panic"; no metadata exists
        assert!(!coordinator.cache.has("f1").await);
    }
}
