//! In-process fake storage node, used only by the crate's own tests.
//!
//! Spawns a tiny `hyper` server implementing the blob-server interface
//! against an in-memory chunk map, so the writer, reader, rebalancer and
//! pre-cache loops can be exercised end-to-end without a real storage node
//! daemon or a real Redis.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

#[derive(Default)]
struct State {
    chunks: HashMap<String, Vec<u8>>,
    is_in_blackout: bool,
    next_blackout_in_ms: i64,
}

pub struct FakeNode {
    pub url: String,
    state: Arc<Mutex<State>>,
}

impl FakeNode {
    pub async fn spawn() -> Self {
        let state = Arc::new(Mutex::new(State::default()));
        let make_state = state.clone();

        let make_svc = make_service_fn(move |_conn| {
            let state = make_state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(handle_async(req, state).await) }
                }))
            }
        });

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::from_tcp(listener).unwrap().serve(make_svc);
        tokio::spawn(async move {
            let _ = server.await;
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn corrupt(&self, chunk_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(bytes) = state.chunks.get_mut(chunk_id) {
            for b in bytes.iter_mut() {
                *b ^= 0xFF;
            }
        }
    }

    pub fn set_blackout(&self, is_in_blackout: bool, next_blackout_in_ms: i64) {
        let mut state = self.state.lock().unwrap();
        state.is_in_blackout = is_in_blackout;
        state.next_blackout_in_ms = next_blackout_in_ms;
    }

    pub fn has_chunk(&self, chunk_id: &str) -> bool {
        self.state.lock().unwrap().chunks.contains_key(chunk_id)
    }

    pub fn chunk_bytes(&self, chunk_id: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().chunks.get(chunk_id).cloned()
    }
}

async fn handle_async(req: Request<Body>, state: Arc<Mutex<State>>) -> Response<Body> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::POST, "/store") => {
            let bytes = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
            let parsed: serde_json::Value = match serde_json::from_slice(&bytes) {
                Ok(v) => v,
                Err(_) => return Response::builder().status(StatusCode::BAD_REQUEST).body(Body::empty()).unwrap(),
            };
            let in_blackout = state.lock().unwrap().is_in_blackout;
            if in_blackout {
                return Response::builder().status(StatusCode::SERVICE_UNAVAILABLE).body(Body::empty()).unwrap();
            }
            let chunk_id = parsed["chunkId"].as_str().unwrap_or_default().to_string();
            let data = parsed["data"].as_str().unwrap_or_default();
            let decoded = base64::decode(data).unwrap_or_default();
            state.lock().unwrap().chunks.insert(chunk_id.clone(), decoded);
            let body = serde_json::json!({"status": "stored", "node": "fake"});
            Response::new(Body::from(body.to_string()))
        }
        (Method::GET, p) if p.starts_with("/chunk/") => {
            let chunk_id = p.trim_start_matches("/chunk/").to_string();
            let in_blackout = state.lock().unwrap().is_in_blackout;
            if in_blackout {
                return Response::builder().status(StatusCode::SERVICE_UNAVAILABLE).body(Body::empty()).unwrap();
            }
            let data = state.lock().unwrap().chunks.get(&chunk_id).cloned();
            match data {
                Some(bytes) => {
                    let body = serde_json::json!({"chunkId": chunk_id, "data": base64::encode(bytes)});
                    Response::new(Body::from(body.to_string()))
                }
                None => Response::builder().status(StatusCode::NOT_FOUND).body(Body::empty()).unwrap(),
            }
        }
        (Method::DELETE, p) if p.starts_with("/chunk/") => {
            let chunk_id = p.trim_start_matches("/chunk/").to_string();
            state.lock().unwrap().chunks.remove(&chunk_id);
            let body = serde_json::json!({"status": "deleted"});
            Response::new(Body::from(body.to_string()))
        }
        (Method::GET, "/orbital-status") => {
            let s = state.lock().unwrap();
            let body = serde_json::json!({
                "nodeId": "fake",
                "isInBlackout": s.is_in_blackout,
                "nextBlackoutInMs": s.next_blackout_in_ms,
            });
            Response::new(Body::from(body.to_string()))
        }
        (Method::GET, "/health") => Response::new(Body::from("ok")),
        _ => Response::builder().status(StatusCode::NOT_FOUND).body(Body::empty()).unwrap(),
    }
}
