//! Chunking, round-robin placement, and transactional rollback on upload.

use log::warn;
use openssl::sha::Sha256;

use crate::coordinator::Coordinator;
use crate::error::Error;
use crate::metadata::{chunk_id, new_file_id, ChunkMeta, FileMetadata};

pub struct UploadOutcome {
    pub file_id: String,
    pub total_chunks: usize,
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finish())
}

/// One successfully-stored `(chunkId, node)` placement, tracked so a failed
/// upload can be rolled back.
struct Placement {
    chunk_id: String,
    node: String,
}

pub struct ReplicatedWriter<'a> {
    coordinator: &'a Coordinator,
}

impl<'a> ReplicatedWriter<'a> {
    pub fn new(coordinator: &'a Coordinator) -> Self {
        Self { coordinator }
    }

    pub async fn upload(&self, payload: &[u8], filename: String) -> Result<UploadOutcome, Error> {
        if !self.coordinator.am_i_leader() {
            return Err(Error::NotLeader);
        }

        let alive_nodes = self.coordinator.registry.alive_nodes(self.coordinator.kv.as_ref()).await?;
        if alive_nodes.len() < 2 {
            return Err(Error::InsufficientNodes {
                alive: alive_nodes.len(),
                required: 2,
            });
        }

        let file_id = new_file_id();
        let chunk_size = self.coordinator.config.tunables.chunk_size;
        let chunks: Vec<&[u8]> = payload.chunks(chunk_size.max(1)).collect();
        let total_chunks = chunks.len();

        let mut placements: Vec<Placement> = Vec::new();
        let mut chunk_metas: Vec<ChunkMeta> = Vec::with_capacity(total_chunks);

        for (index, data) in chunks.iter().enumerate() {
            let id = chunk_id(&file_id, index);
            let hash = sha256_hex(data);

            let len = alive_nodes.len() as u64;
            let rr = self.coordinator.next_round_robin();
            let primary = &alive_nodes[(rr % len) as usize];
            let replica = &alive_nodes[((rr + 1) % len) as usize];

            match self.store_on_both(&id, data, primary, replica).await {
                Ok(()) => {
                    placements.push(Placement {
                        chunk_id: id.clone(),
                        node: primary.clone(),
                    });
                    placements.push(Placement {
                        chunk_id: id.clone(),
                        node: replica.clone(),
                    });
                    chunk_metas.push(ChunkMeta {
                        chunk_id: id,
                        hash,
                        nodes: vec![primary.clone(), replica.clone()],
                    });
                }
                Err(partial) => {
                    // record whichever of primary/replica actually succeeded
                    // before the failure, then roll everything back.
                    if partial.primary_ok {
                        placements.push(Placement {
                            chunk_id: id.clone(),
                            node: primary.clone(),
                        });
                    }
                    self.rollback(&placements).await;
                    return Err(Error::ReplicationFailed(partial.reason));
                }
            }
        }

        let metadata = FileMetadata {
            file_id: file_id.clone(),
            filename,
            total_chunks,
            chunks: chunk_metas,
        };

        self.coordinator
            .kv
            .set(&metadata.key(), &metadata.to_json()?)
            .await?;

        Ok(UploadOutcome {
            file_id,
            total_chunks,
        })
    }

    async fn store_on_both(
        &self,
        chunk_id: &str,
        data: &[u8],
        primary: &str,
        replica: &str,
    ) -> Result<(), PartialFailure> {
        if let Err(err) = self.coordinator.node_client.store_chunk(primary, chunk_id, data).await {
            return Err(PartialFailure {
                primary_ok: false,
                reason: format!("store on primary {} failed: {}", primary, err),
            });
        }
        if let Err(err) = self.coordinator.node_client.store_chunk(replica, chunk_id, data).await {
            return Err(PartialFailure {
                primary_ok: true,
                reason: format!("store on replica {} failed: {}", replica, err),
            });
        }
        Ok(())
    }

    /// Best-effort delete of every placement recorded so far. Individual
    /// failures are swallowed; residue on storage nodes is tolerated because
    /// chunkIds are scoped to the aborted fileId and never referenced once
    /// no metadata for it exists.
    async fn rollback(&self, placements: &[Placement]) {
        for placement in placements {
            if let Err(err) = self
                .coordinator
                .node_client
                .delete_chunk(&placement.node, &placement.chunk_id)
                .await
            {
                warn!(
                    "rollback delete of {} on {} failed (ignored): {}",
                    placement.chunk_id, placement.node, err
                );
            }
        }
    }
}

struct PartialFailure {
    primary_ok: bool,
    reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKv};
    use crate::metadata::FileMetadata;
    use crate::test_support::FakeNode;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex(b"hello"), sha256_hex(b"hello"));
        assert_ne!(sha256_hex(b"hello"), sha256_hex(b"world"));
        assert_eq!(sha256_hex(b"hello").len(), 64);
    }

    async fn leader_coordinator_with(nodes: Vec<String>) -> Arc<Coordinator> {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let config = crate::config::Config {
            port: 0,
            redis_url: "".into(),
            nodes,
            tunables: Default::default(),
        };
        let coordinator = Coordinator::new(config, kv, "m1".into());
        coordinator
            .lease
            .tick(coordinator.kv.as_ref(), Duration::from_secs(5))
            .await;
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
    async fn happy_upload_round_robins_across_three_nodes() {
        let n1 = FakeNode::spawn().await;
        let n2 = FakeNode::spawn().await;
        let n3 = FakeNode::spawn().await;
        let coordinator =
            leader_coordinator_with(vec![n1.url.clone(), n2.url.clone(), n3.url.clone()]).await;
        for n in coordinator.registry.configured_nodes().to_vec() {
            mark_alive(&coordinator, &n).await;
        }

        // 2.5 MiB of 0xAB: three chunks, the last one short.
        let chunk = 1024 * 1024;
        let payload = vec![0xABu8; chunk * 2 + chunk / 2];

        let writer = ReplicatedWriter::new(&coordinator);
        let outcome = writer.upload(&payload, "f.bin".into()).await.unwrap();
        assert_eq!(outcome.total_chunks, 3);

        let raw = coordinator
            .kv
            .get(&FileMetadata::kv_key(&outcome.file_id))
            .await
            .unwrap()
            .unwrap();
        let metadata = FileMetadata::from_json(&raw).unwrap();

        assert_eq!(metadata.chunks.len(), 3);
        for chunk_meta in &metadata.chunks {
            assert_eq!(chunk_meta.nodes.len(), 2);
            assert_ne!(chunk_meta.nodes[0], chunk_meta.nodes[1]);
        }
        // chunk 0: (n1,n2), chunk 1: (n2,n3), chunk 2: (n3,n1) since
        // round_robin_index starts at 0 for a freshly built coordinator.
        assert_eq!(metadata.chunks[0].nodes, vec![n1.url.clone(), n2.url.clone()]);
        assert_eq!(metadata.chunks[1].nodes, vec![n2.url.clone(), n3.url.clone()]);
        assert_eq!(metadata.chunks[2].nodes, vec![n3.url.clone(), n1.url.clone()]);

        assert!(n1.has_chunk(&format!("{}_chunk_0", outcome.file_id)));
        assert!(n2.has_chunk(&format!("{}_chunk_0", outcome.file_id)));
        assert!(n3.has_chunk(&format!("{}_chunk_1", outcome.file_id)));
        assert!(n1.has_chunk(&format!("{}_chunk_2", outcome.file_id)));
    }

    #[tokio::test]
    async fn failed_replica_store_rolls_back_and_leaves_no_metadata() {
        let n1 = FakeNode::spawn().await;
        let n2 = FakeNode::spawn().await;
        let coordinator = leader_coordinator_with(vec![n1.url.clone(), n2.url.clone()]).await;
        mark_alive(&coordinator, &n1.url).await;
        mark_alive(&coordinator, &n2.url).await;

        // n2 (the replica for chunk 0) refuses writes for the whole upload.
        n2.set_blackout(true, 0);

        let payload = vec![0xABu8; 10];
        let writer = ReplicatedWriter::new(&coordinator);
        let err = writer.upload(&payload, "f.bin".into()).await.unwrap_err();
        assert!(matches!(err, Error::ReplicationFailed(_)));

        let keys = coordinator.kv.keys("file:").await.unwrap();
        assert!(keys.is_empty(), "no file metadata should survive a rolled-back upload");
    }

    #[tokio::test]
    async fn insufficient_alive_nodes_rejects_upload() {
        let n1 = FakeNode::spawn().await;
        let coordinator = leader_coordinator_with(vec![n1.url.clone(), "http://dead".into()]).await;
        mark_alive(&coordinator, &n1.url).await;

        let writer = ReplicatedWriter::new(&coordinator);
        let err = writer.upload(b"hi", "f.bin".into()).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientNodes { .. }));
    }

    #[tokio::test]
    async fn non_leader_upload_is_rejected() {
        let n1 = FakeNode::spawn().await;
        let n2 = FakeNode::spawn().await;
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let config = crate::config::Config {
            port: 0,
            redis_url: "".into(),
            nodes: vec![n1.url.clone(), n2.url.clone()],
            tunables: Default::default(),
        };
        // never ticked the lease: this coordinator never becomes leader.
        let coordinator = Coordinator::new(config, kv, "m1".into());

        let writer = ReplicatedWriter::new(&coordinator);
        let err = writer.upload(b"hi", "f.bin".into()).await.unwrap_err();
        assert!(matches!(err, Error::NotLeader));
    }
}
