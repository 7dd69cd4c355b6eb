//! File metadata: the documents stored under `file:{fileId}` in the KV.
//!
//! Serialized as JSON text, matching how the rest of the KV layout is
//! self-describing rather than a packed binary format.

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMeta {
    pub chunk_id: String,
    pub hash: String,
    pub nodes: Vec<String>,
}

impl ChunkMeta {
    pub fn is_under_replicated(&self) -> bool {
        self.nodes.len() < 2
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_id: String,
    pub filename: String,
    pub total_chunks: usize,
    pub chunks: Vec<ChunkMeta>,
}

impl FileMetadata {
    pub fn kv_key(file_id: &str) -> String {
        format!("file:{}", file_id)
    }

    pub fn key(&self) -> String {
        Self::kv_key(&self.file_id)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|err| Error::Transient(err.into()))
    }

    pub fn from_json(raw: &str) -> Result<Self, Error> {
        serde_json::from_str(raw).map_err(|err| Error::Transient(err.into()))
    }
}

/// `{fileId}_chunk_{i}`, stable and derivable from fileId + index alone.
pub fn chunk_id(file_id: &str, index: usize) -> String {
    format!("{}_chunk_{}", file_id, index)
}

/// Fresh random 128-bit file id, textual (hex), assigned at upload time.
pub fn new_file_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_stable() {
        assert_eq!(chunk_id("abc", 3), "abc_chunk_3");
    }

    #[test]
    fn round_trips_through_json() {
        let meta = FileMetadata {
            file_id: "abc".into(),
            filename: "f.bin".into(),
            total_chunks: 1,
            chunks: vec![ChunkMeta {
                chunk_id: "abc_chunk_0".into(),
                hash: "deadbeef".into(),
                nodes: vec!["http://n1".into(), "http://n2".into()],
            }],
        };
        let json = meta.to_json().unwrap();
        let back = FileMetadata::from_json(&json).unwrap();
        assert_eq!(back.file_id, meta.file_id);
        assert_eq!(back.chunks.len(), 1);
        assert!(!back.chunks[0].is_under_replicated());
    }

    #[test]
    fn new_file_id_is_32_hex_chars() {
        let id = new_file_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
