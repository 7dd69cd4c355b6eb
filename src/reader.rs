//! Per-chunk replica failover, integrity verification, and whole-file
//! assembly. The `avoid` set makes a regular download the special case of
//! pre-cache reconstruction with an empty avoidance set.

use std::collections::HashSet;

use log::warn;
use openssl::sha::Sha256;

use crate::cache::CachedFile;
use crate::coordinator::Coordinator;
use crate::error::Error;
use crate::metadata::FileMetadata;

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finish())
}

pub struct Reconstructor<'a> {
    coordinator: &'a Coordinator,
}

impl<'a> Reconstructor<'a> {
    pub fn new(coordinator: &'a Coordinator) -> Self {
        Self { coordinator }
    }

    /// Cache-first download. No KV or network I/O on a hit.
    pub async fn download(&self, file_id: &str) -> Result<CachedFile, Error> {
        if let Some(cached) = self.coordinator.cache.get(file_id).await {
            return Ok(cached);
        }

        let empty: HashSet<String> = HashSet::new();
        let file = self.reconstruct(file_id, &empty).await?;
        self.coordinator.cache.set(file_id.to_string(), file.clone()).await;
        Ok(file)
    }

    /// Reconstruct a file's bytes without consulting or populating the
    /// cache directly; used by the pre-cache loop, which fills the cache
    /// itself once reconstruction succeeds.
    pub async fn reconstruct(&self, file_id: &str, avoid: &HashSet<String>) -> Result<CachedFile, Error> {
        let key = FileMetadata::kv_key(file_id);
        let raw = self
            .coordinator
            .kv
            .get(&key)
            .await?
            .ok_or(Error::NotFound)?;
        let metadata = FileMetadata::from_json(&raw)?;

        let mut buffer = Vec::new();
        for chunk in &metadata.chunks {
            let data = self.fetch_verified_chunk(chunk, avoid).await?;
            buffer.extend_from_slice(&data);
        }

        Ok(CachedFile {
            buffer,
            filename: metadata.filename,
        })
    }

    /// Iterate a chunk's replicas in stored order, skipping `avoid`d nodes,
    /// returning the first replica whose bytes pass the hash check.
    async fn fetch_verified_chunk(
        &self,
        chunk: &crate::metadata::ChunkMeta,
        avoid: &HashSet<String>,
    ) -> Result<Vec<u8>, Error> {
        for node in &chunk.nodes {
            if avoid.contains(node) {
                continue;
            }
            match self.coordinator.node_client.get_chunk(node, &chunk.chunk_id).await {
                Ok(data) => {
                    if sha256_hex(&data) == chunk.hash {
                        return Ok(data);
                    }
                    // wrong bytes: integrity failure aborts the whole
                    // download immediately, no fallback to another replica.
                    return Err(Error::IntegrityMismatch {
                        chunk_id: chunk.chunk_id.clone(),
                    });
                }
                Err(err) => {
                    warn!("replica {} for chunk {} failed: {}", node, chunk.chunk_id, err);
                }
            }
        }
        Err(Error::ReplicaUnavailable {
            chunk_id: chunk.chunk_id.clone(),
        })
    }
}
