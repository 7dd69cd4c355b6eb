//! Under-replication repair loop.
//!
//! Runs on a fixed interval, no-op unless leader. Never removes a node from
//! a chunk's replica set on liveness alone — a dead replica may simply be in
//! a blackout window and its bytes remain authoritative once it returns.
//! Permanent loss isn't detected directly; it only shows up as a chunk
//! staying under-replicated until a fresh node is minted for it.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::metadata::FileMetadata;

pub async fn run(coordinator: Arc<Coordinator>) {
    let mut interval = tokio::time::interval(coordinator.config.tunables.rebalance_period);
    loop {
        interval.tick().await;
        if !coordinator.am_i_leader() {
            continue;
        }
        if let Err(err) = run_once(&coordinator).await {
            warn!("rebalance tick failed: {}", err);
        }
    }
}

/// One rebalance pass, split out so it can be driven directly from tests.
pub async fn run_once(coordinator: &Coordinator) -> anyhow::Result<()> {
    let alive_nodes = coordinator
        .registry
        .alive_nodes(coordinator.kv.as_ref())
        .await?;
    if alive_nodes.len() < 2 {
        debug!("rebalance: fewer than 2 alive nodes, skipping");
        return Ok(());
    }

    let keys = coordinator.kv.keys("file:").await?;
    for key in keys {
        let raw = match coordinator.kv.get(&key).await? {
            Some(raw) => raw,
            None => continue, // vanished since the scan; nothing to do
        };
        let mut metadata = match FileMetadata::from_json(&raw) {
            Ok(m) => m,
            Err(err) => {
                warn!("rebalance: skipping unreadable metadata at {}: {}", key, err);
                continue;
            }
        };

        let mut dirty = false;
        for chunk in &mut metadata.chunks {
            if !chunk.is_under_replicated() {
                continue;
            }
            let source = match chunk.nodes.first() {
                Some(n) => n.clone(),
                None => {
                    warn!("rebalance: chunk {} has no surviving replica", chunk.chunk_id);
                    continue;
                }
            };
            let target = alive_nodes.iter().find(|n| !chunk.nodes.contains(n));
            let target = match target {
                Some(t) => t.clone(),
                None => continue, // no fresh node available this pass
            };

            match coordinator.node_client.get_chunk(&source, &chunk.chunk_id).await {
                Ok(data) => match coordinator.node_client.store_chunk(&target, &chunk.chunk_id, &data).await {
                    Ok(()) => {
                        chunk.nodes.push(target.clone());
                        dirty = true;
                        info!("rebalance: repaired {} onto {}", chunk.chunk_id, target);
                    }
                    Err(err) => warn!("rebalance: store on {} failed: {}", target, err),
                },
                Err(err) => warn!("rebalance: read from {} failed: {}", source, err),
            }
        }

        if dirty {
            coordinator.kv.set(&metadata.key(), &metadata.to_json()?).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKv};
    use crate::metadata::ChunkMeta;
    use crate::test_support::FakeNode;
    use std::sync::Arc;
    use std::time::Duration;

    async fn coordinator_with(nodes: Vec<String>) -> Arc<Coordinator> {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
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

    async fn mark_alive(coordinator: &Coordinator, node: &str) {
        let key = crate::registry::node_heartbeat_key(node);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        coordinator.kv.set(&key, &now.to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn repairs_under_replicated_chunk() {
        let n1 = FakeNode::spawn().await;
        let n2 = FakeNode::spawn().await;
        let n3 = FakeNode::spawn().await;

        let coordinator = coordinator_with(vec![n1.url.clone(), n2.url.clone(), n3.url.clone()]).await;
        for n in coordinator.registry.configured_nodes().to_vec() {
            mark_alive(&coordinator, &n).await;
        }

        coordinator
            .node_client
            .store_chunk(&n1.url, "f1_chunk_0", b"hello")
            .await
            .unwrap();

        let hash = {
            let mut h = openssl::sha::Sha256::new();
            h.update(b"hello");
            hex::encode(h.finish())
        };
        let metadata = FileMetadata {
            file_id: "f1".into(),
            filename: "a.bin".into(),
            total_chunks: 1,
            chunks: vec![ChunkMeta {
                chunk_id: "f1_chunk_0".into(),
                hash,
                nodes: vec![n1.url.clone()],
            }],
        };
        coordinator.kv.set(&metadata.key(), &metadata.to_json().unwrap()).await.unwrap();

        run_once(&coordinator).await.unwrap();

        let raw = coordinator.kv.get(&metadata.key()).await.unwrap().unwrap();
        let repaired = FileMetadata::from_json(&raw).unwrap();
        assert_eq!(repaired.chunks[0].nodes.len(), 2);
        assert_eq!(repaired.chunks[0].nodes[0], n1.url);
        let target = repaired.chunks[0].nodes[1].clone();
        assert!(target == n2.url || target == n3.url);
        let target_node = if target == n2.url { &n2 } else { &n3 };
        assert_eq!(target_node.chunk_bytes("f1_chunk_0"), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn noop_with_fewer_than_two_alive_nodes() {
        let coordinator = coordinator_with(vec!["http://n1".into(), "http://n2".into()]).await;
        mark_alive(&coordinator, "http://n1").await;
        let result = run_once(&coordinator).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn second_rebalance_pass_is_idempotent() {
        let n1 = FakeNode::spawn().await;
        let n2 = FakeNode::spawn().await;
        let n3 = FakeNode::spawn().await;

        let coordinator = coordinator_with(vec![n1.url.clone(), n2.url.clone(), n3.url.clone()]).await;
        for n in coordinator.registry.configured_nodes().to_vec() {
            mark_alive(&coordinator, &n).await;
        }
        coordinator.node_client.store_chunk(&n1.url, "f1_chunk_0", b"hello").await.unwrap();
        let hash = {
            let mut h = openssl::sha::Sha256::new();
            h.update(b"hello");
            hex::encode(h.finish())
        };
        let metadata = FileMetadata {
            file_id: "f1".into(),
            filename: "a.bin".into(),
            total_chunks: 1,
            chunks: vec![ChunkMeta { chunk_id: "f1_chunk_0".into(), hash, nodes: vec![n1.url.clone()] }],
        };
        coordinator.kv.set(&metadata.key(), &metadata.to_json().unwrap()).await.unwrap();

        run_once(&coordinator).await.unwrap();
        let after_first = coordinator.kv.get(&metadata.key()).await.unwrap().unwrap();

        run_once(&coordinator).await.unwrap();
        let after_second = coordinator.kv.get(&metadata.key()).await.unwrap().unwrap();

        assert_eq!(after_first, after_second);
    }
}
