//! The coordinator's HTTP surface: upload, download, metadata, health,
//! nodes, and cache-status.
//!
//! Routing is a manual method+path match inside one async function rather
//! than the schema-driven router the backup proxy builds its API around:
//! this crate has a handful of endpoints and no need for the generated
//! OpenAPI schema that router produces.

mod handlers;
mod multipart;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use log::info;

use crate::coordinator::Coordinator;

/// Bind and serve until the process is killed. Runs forever; the caller is
/// expected to `tokio::spawn` the control loops separately and `.await`
/// this directly on the main task.
pub async fn serve(coordinator: Arc<Coordinator>) -> hyper::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], coordinator.config.port));

    let make_svc = make_service_fn(move |_conn| {
        let coordinator = coordinator.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let coordinator = coordinator.clone();
                async move { Ok::<_, Infallible>(handlers::route(coordinator, req).await) }
            }))
        }
    });

    info!("listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await
}
