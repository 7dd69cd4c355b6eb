//! HTTP client for the storage node ("blob server") interface.
//!
//! Thin wrapper over `hyper`, in the style of `tools::http::SimpleHttp` from
//! the backup stack this crate descends from, but stripped of the TLS/proxy
//! machinery that interface carried: storage nodes live on a trusted
//! internal network and are addressed by plain `http://` URLs.

use std::time::Duration;

use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Serialize)]
struct StoreRequest<'a> {
    #[serde(rename = "chunkId")]
    chunk_id: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[allow(dead_code)]
    #[serde(rename = "chunkId")]
    chunk_id: String,
    data: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OrbitalStatus {
    #[serde(rename = "isInBlackout")]
    pub is_in_blackout: bool,
    #[serde(rename = "nextBlackoutInMs")]
    pub next_blackout_in_ms: i64,
}

#[derive(Clone)]
pub struct NodeClient {
    client: Client<HttpConnector, Body>,
    chunk_timeout: Duration,
}

impl NodeClient {
    pub fn new(chunk_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            chunk_timeout,
        }
    }

    async fn body_to_string(res: hyper::Response<Body>) -> Result<String, Error> {
        let bytes = hyper::body::to_bytes(res.into_body())
            .await
            .map_err(|err| Error::Transient(err.into()))?;
        String::from_utf8(bytes.to_vec()).map_err(|err| Error::Transient(err.into()))
    }

    /// `POST /store`: stores a chunk's base64-encoded bytes on a node.
    pub async fn store_chunk(&self, node_url: &str, chunk_id: &str, data: &[u8]) -> Result<(), Error> {
        let body = StoreRequest {
            chunk_id,
            data: base64::encode(data),
        };
        let payload = serde_json::to_vec(&body).map_err(|err| Error::Transient(err.into()))?;

        let uri = format!("{}/store", node_url.trim_end_matches('/'));
        let request = Request::builder()
            .method(Method::POST)
            .uri(&uri)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .map_err(|err| Error::Transient(err.into()))?;

        let res = tokio::time::timeout(self.chunk_timeout, self.client.request(request))
            .await
            .map_err(|_| Error::Transient(anyhow::anyhow!("timeout storing chunk on {}", node_url)))?
            .map_err(|err| Error::Transient(err.into()))?;

        if res.status().is_success() {
            Ok(())
        } else {
            Err(Error::Transient(anyhow::anyhow!(
                "store chunk {} on {} failed with status {}",
                chunk_id,
                node_url,
                res.status()
            )))
        }
    }

    /// `GET /chunk/:id`. Bounded by the per-attempt chunk fetch timeout.
    pub async fn get_chunk(&self, node_url: &str, chunk_id: &str) -> Result<Vec<u8>, Error> {
        let uri = format!("{}/chunk/{}", node_url.trim_end_matches('/'), chunk_id);
        let request = Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .body(Body::empty())
            .map_err(|err| Error::Transient(err.into()))?;

        let res = tokio::time::timeout(self.chunk_timeout, self.client.request(request))
            .await
            .map_err(|_| Error::Transient(anyhow::anyhow!("timeout fetching chunk from {}", node_url)))?
            .map_err(|err| Error::Transient(err.into()))?;

        if res.status() == StatusCode::NOT_FOUND {
            return Err(Error::Transient(anyhow::anyhow!(
                "chunk {} not found on {}",
                chunk_id,
                node_url
            )));
        }
        if !res.status().is_success() {
            return Err(Error::Transient(anyhow::anyhow!(
                "get chunk {} from {} failed with status {}",
                chunk_id,
                node_url,
                res.status()
            )));
        }

        let body = Self::body_to_string(res).await?;
        let parsed: ChunkResponse =
            serde_json::from_str(&body).map_err(|err| Error::Transient(err.into()))?;
        base64::decode(parsed.data).map_err(|err| Error::Transient(err.into()))
    }

    /// `DELETE /chunk/:id`. Idempotent on the node side; individual failures
    /// here are swallowed by the caller during rollback.
    pub async fn delete_chunk(&self, node_url: &str, chunk_id: &str) -> Result<(), Error> {
        let uri = format!("{}/chunk/{}", node_url.trim_end_matches('/'), chunk_id);
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(&uri)
            .body(Body::empty())
            .map_err(|err| Error::Transient(err.into()))?;

        let res = tokio::time::timeout(self.chunk_timeout, self.client.request(request))
            .await
            .map_err(|_| Error::Transient(anyhow::anyhow!("timeout deleting chunk on {}", node_url)))?
            .map_err(|err| Error::Transient(err.into()))?;

        debug!("delete {} on {}: {}", chunk_id, node_url, res.status());
        Ok(())
    }

    /// `GET /orbital-status`.
    pub async fn orbital_status(&self, node_url: &str) -> Result<OrbitalStatus, Error> {
        let uri = format!("{}/orbital-status", node_url.trim_end_matches('/'));
        let request = Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .body(Body::empty())
            .map_err(|err| Error::Transient(err.into()))?;

        let res = tokio::time::timeout(self.chunk_timeout, self.client.request(request))
            .await
            .map_err(|_| Error::Transient(anyhow::anyhow!("timeout polling orbital-status on {}", node_url)))?
            .map_err(|err| Error::Transient(err.into()))?;

        if !res.status().is_success() {
            return Err(Error::Transient(anyhow::anyhow!(
                "orbital-status on {} failed with status {}",
                node_url,
                res.status()
            )));
        }

        let body = Self::body_to_string(res).await?;
        serde_json::from_str(&body).map_err(|err| Error::Transient(err.into()))
    }
}
