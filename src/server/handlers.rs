//! Request handlers for the coordinator's HTTP surface. Stateless except
//! for shared access to the `Coordinator`.

use std::sync::Arc;

use hyper::body::HttpBody;
use hyper::{Body, Method, Request, Response};
use serde_json::json;

use crate::coordinator::Coordinator;
use crate::error::Error;
use crate::metadata::FileMetadata;
use crate::reader::Reconstructor;
use crate::server::multipart;
use crate::writer::ReplicatedWriter;

pub async fn route(coordinator: Arc<Coordinator>, req: Request<Body>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let result = match (method, path.as_str()) {
        (Method::POST, "/upload") => handle_upload(&coordinator, req).await,
        (Method::GET, p) if p.starts_with("/download/") => {
            handle_download(&coordinator, p.trim_start_matches("/download/")).await
        }
        (Method::GET, "/metadata") => handle_metadata_list(&coordinator).await,
        (Method::GET, p) if p.starts_with("/metadata/") => {
            handle_metadata_one(&coordinator, p.trim_start_matches("/metadata/")).await
        }
        (Method::GET, "/health") => handle_health(&coordinator).await,
        (Method::GET, "/nodes") => handle_nodes(&coordinator).await,
        (Method::GET, "/cache-status") => handle_cache_status(&coordinator).await,
        _ => Err(Error::NotFound),
    };

    match result {
        Ok(response) => response,
        Err(err) => error_response(&err),
    }
}

fn error_response(err: &Error) -> Response<Body> {
    let body = json!({ "error": err.tag(), "message": err.to_string() });
    Response::builder()
        .status(err.status_code())
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn handle_upload(coordinator: &Coordinator, req: Request<Body>) -> Result<Response<Body>, Error> {
    if !coordinator.am_i_leader() {
        return Err(Error::NotLeader);
    }

    let content_type = req
        .headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::BadRequest("missing Content-Type".into()))?
        .to_string();
    let boundary = multipart::boundary_from_content_type(&content_type)
        .ok_or_else(|| Error::BadRequest("missing multipart boundary".into()))?;

    let limit = coordinator.config.tunables.request_limit as u64;
    let mut body_stream = req.into_body();
    let mut body = Vec::new();
    while let Some(chunk) = body_stream.data().await {
        let chunk = chunk.map_err(|err| Error::Transient(err.into()))?;
        body.extend_from_slice(&chunk);
        if body.len() as u64 > limit {
            return Err(Error::BadRequest("request body exceeds size limit".into()));
        }
    }

    let uploaded = multipart::parse_file_field(&body, &boundary)?;
    if uploaded.data.is_empty() {
        return Err(Error::BadRequest("no file data supplied".into()));
    }

    let writer = ReplicatedWriter::new(coordinator);
    let outcome = writer.upload(&uploaded.data, uploaded.filename).await?;

    let body = json!({
        "message": "upload successful",
        "fileId": outcome.file_id,
        "totalChunks": outcome.total_chunks,
    });
    Ok(Response::new(Body::from(body.to_string())))
}

async fn handle_download(coordinator: &Coordinator, file_id: &str) -> Result<Response<Body>, Error> {
    let reconstructor = Reconstructor::new(coordinator);
    let file = reconstructor.download(file_id).await?;

    Response::builder()
        .header(hyper::header::CONTENT_TYPE, "application/octet-stream")
        .header(
            hyper::header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file.filename),
        )
        .body(Body::from(file.buffer))
        .map_err(|err| Error::Transient(err.into()))
}

async fn handle_metadata_list(coordinator: &Coordinator) -> Result<Response<Body>, Error> {
    let keys = coordinator.kv.keys("file:").await?;
    let mut files = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(raw) = coordinator.kv.get(&key).await? {
            if let Ok(metadata) = FileMetadata::from_json(&raw) {
                files.push(metadata);
            }
        }
    }
    let body = json!({ "totalFiles": files.len(), "files": files });
    Ok(Response::new(Body::from(body.to_string())))
}

async fn handle_metadata_one(coordinator: &Coordinator, file_id: &str) -> Result<Response<Body>, Error> {
    let raw = coordinator
        .kv
        .get(&FileMetadata::kv_key(file_id))
        .await?
        .ok_or(Error::NotFound)?;
    let metadata = FileMetadata::from_json(&raw)?;
    Ok(Response::new(Body::from(serde_json::to_string(&metadata).unwrap())))
}

async fn handle_health(coordinator: &Coordinator) -> Result<Response<Body>, Error> {
    let body = json!({
        "master": coordinator.lease.master_id(),
        "leader": coordinator.am_i_leader(),
    });
    Ok(Response::new(Body::from(body.to_string())))
}

async fn handle_nodes(coordinator: &Coordinator) -> Result<Response<Body>, Error> {
    let alive = coordinator.registry.alive_nodes(coordinator.kv.as_ref()).await?;
    let mut entries = Vec::new();
    for url in coordinator.registry.configured_nodes() {
        let is_alive = alive.contains(url);
        let mut entry = json!({ "url": url, "alive": is_alive });
        if is_alive {
            if let Ok(status) = coordinator.node_client.orbital_status(url).await {
                entry["isInBlackout"] = json!(status.is_in_blackout);
                entry["nextBlackoutInMs"] = json!(status.next_blackout_in_ms);
            }
        }
        entries.push(entry);
    }
    Ok(Response::new(Body::from(json!(entries).to_string())))
}

async fn handle_cache_status(coordinator: &Coordinator) -> Result<Response<Body>, Error> {
    let snapshot = coordinator.cache.snapshot().await;
    let files: Vec<_> = snapshot
        .iter()
        .map(|(file_id, file)| {
            json!({
                "fileId": file_id,
                "filename": file.filename,
                "sizeMB": file.buffer.len() as f64 / (1024.0 * 1024.0),
            })
        })
        .collect();
    let body = json!({ "totalCached": files.len(), "files": files });
    Ok(Response::new(Body::from(body.to_string())))
}

