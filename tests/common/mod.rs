//! In-process remote-write receiver used by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use parking_lot::Mutex;
use prost::Message;

use monitor_relay::writer::prompb::WriteRequest;

#[derive(Debug, Clone)]
pub struct Received {
    pub headers: HeaderMap,
    pub request: WriteRequest,
}

#[derive(Clone)]
struct Inner {
    status: StatusCode,
    received: Arc<Mutex<Vec<Received>>>,
}

pub struct Receiver {
    pub url: String,
    received: Arc<Mutex<Vec<Received>>>,
}

impl Receiver {
    /// Starts a receiver answering every write with `status`.
    pub async fn start(status: StatusCode) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = Inner {
            status,
            received: received.clone(),
        };

        let app = Router::new()
            .route("/api/v1/write", post(write))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/api/v1/write"),
            received,
        }
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }
}

async fn write(State(state): State<Inner>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let raw = match snap::raw::Decoder::new().decompress_vec(&body) {
        Ok(raw) => raw,
        Err(_) => return StatusCode::UNSUPPORTED_MEDIA_TYPE,
    };
    let request = match WriteRequest::decode(raw.as_slice()) {
        Ok(req) => req,
        Err(_) => return StatusCode::BAD_REQUEST,
    };

    state.received.lock().push(Received { headers, request });
    state.status
}
