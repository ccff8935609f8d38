//! Scripted fake of the rentals registry HTTP API.
//!
//! Serves `POST /internal/rentals` and `DELETE /internal/rentals/:id` on an
//! ephemeral port. Answers can be scripted per request; unscripted requests
//! answer 200 and are applied to an in-memory rentals table.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A request received by the fake registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedRequest {
    /// `POST` or `DELETE`
    pub method: String,
    /// Request path
    pub path: String,
    /// JSON body, for upserts
    pub body: Option<serde_json::Value>,
    /// `baggage` header, when sent
    pub baggage: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    script: Mutex<VecDeque<u16>>,
    requests: Mutex<Vec<ReceivedRequest>>,
    rentals: Mutex<HashMap<String, String>>,
}

impl RegistryState {
    async fn record(&self, request: ReceivedRequest) -> StatusCode {
        self.requests.lock().await.push(request);
        let status = self.script.lock().await.pop_front().unwrap_or(200);
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Fake registry server, shut down on drop.
pub struct FakeRegistry {
    addr: SocketAddr,
    state: Arc<RegistryState>,
    server: JoinHandle<()>,
}

impl FakeRegistry {
    /// Start the server on `127.0.0.1` with an OS-assigned port.
    pub async fn start() -> Result<Self> {
        let state = Arc::new(RegistryState::default());
        let router = Router::new()
            .route("/internal/rentals", post(upsert_handler))
            .route("/internal/rentals/:id", delete(delete_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "Fake registry server error");
            }
        });

        Ok(Self { addr, state, server })
    }

    /// Base URL to configure clients with.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Script the status of the next unscripted request.
    pub async fn push_status(&self, status: u16) {
        self.state.script.lock().await.push_back(status);
    }

    /// Requests received so far, in arrival order.
    pub async fn requests(&self) -> Vec<ReceivedRequest> {
        self.state.requests.lock().await.clone()
    }

    /// Rentals currently stored (id -> price).
    pub async fn rentals(&self) -> HashMap<String, String> {
        self.state.rentals.lock().await.clone()
    }
}

impl Drop for FakeRegistry {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn baggage(headers: &HeaderMap) -> Option<String> {
    headers
        .get("baggage")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn upsert_handler(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let status = state
        .record(ReceivedRequest {
            method: "POST".to_string(),
            path: "/internal/rentals".to_string(),
            body: Some(body.clone()),
            baggage: baggage(&headers),
        })
        .await;

    if status == StatusCode::OK {
        let id = body["id"].as_str().unwrap_or_default().to_string();
        let price = body["price"].as_str().unwrap_or_default().to_string();
        state.rentals.lock().await.insert(id, price);
    }
    status
}

async fn delete_handler(
    State(state): State<Arc<RegistryState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    let status = state
        .record(ReceivedRequest {
            method: "DELETE".to_string(),
            path: format!("/internal/rentals/{}", id),
            body: None,
            baggage: baggage(&headers),
        })
        .await;

    if status == StatusCode::OK {
        state.rentals.lock().await.remove(&id);
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_registry_scripts_statuses() {
        let registry = FakeRegistry::start().await.unwrap();
        registry.push_status(503).await;

        let client = reqwest::Client::new();
        let url = format!("{}/internal/rentals", registry.base_url());
        let body = serde_json::json!({ "id": "1", "price": "2.000000" });

        let first = client.post(&url).json(&body).send().await.unwrap();
        let second = client.post(&url).json(&body).send().await.unwrap();

        assert_eq!(first.status().as_u16(), 503);
        assert_eq!(second.status().as_u16(), 200);
        assert_eq!(registry.requests().await.len(), 2);
        assert_eq!(registry.rentals().await.len(), 1);
    }
}
