//! Crate-wide error taxonomy.
//!
//! Every failure mode a handler or background loop can hit funnels through
//! this enum, so the HTTP surface (`server::handlers`) has one place to map
//! failures to status codes and the control loops have one thing to match
//! on when deciding whether to log-and-continue.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("not leader")]
    NotLeader,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not enough alive nodes: need {required}, have {alive}")]
    InsufficientNodes { alive: usize, required: usize },

    #[error("replication failed, upload rolled back: {0}")]
    ReplicationFailed(String),

    #[error("not found")]
    NotFound,

    #[error("all replicas failed for chunk {chunk_id}")]
    ReplicaUnavailable { chunk_id: String },

    #[error("integrity check failed for chunk {chunk_id}")]
    IntegrityMismatch { chunk_id: String },

    #[error("kv store error: {0}")]
    Kv(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status code this error maps to at the coordinator's API surface.
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::NotLeader => StatusCode::FORBIDDEN,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::InsufficientNodes { .. }
            | Error::ReplicationFailed(_)
            | Error::ReplicaUnavailable { .. }
            | Error::IntegrityMismatch { .. }
            | Error::Kv(_)
            | Error::Io(_)
            | Error::Transient(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable tag, used in the JSON error body.
    pub fn tag(&self) -> &'static str {
        match self {
            Error::NotLeader => "not_leader",
            Error::BadRequest(_) => "bad_request",
            Error::InsufficientNodes { .. } => "insufficient_nodes",
            Error::ReplicationFailed(_) => "replication_failed",
            Error::NotFound => "not_found",
            Error::ReplicaUnavailable { .. } => "replica_unavailable",
            Error::IntegrityMismatch { .. } => "integrity_mismatch",
            Error::Kv(_) => "kv_error",
            Error::Io(_) => "io_error",
            Error::Transient(_) => "transient",
        }
    }
}
