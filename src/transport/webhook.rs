//! Webhook and health HTTP server.
//!
//! Requests are answered right away; the updates themselves go through a
//! queue to a single worker, so each one is handled after the previous
//! one finished.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::Dispatcher;
use crate::telegram::Update;

/// Header Telegram sets when `setWebhook` was given a secret token.
const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Updates waiting for the worker before requests start to block.
const UPDATE_QUEUE_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct WebhookState {
    updates: mpsc::Sender<Update>,
    secret: Option<String>,
}

impl WebhookState {
    #[must_use]
    pub const fn new(updates: mpsc::Sender<Update>, secret: Option<String>) -> Self {
        Self { updates, secret }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        self.secret.as_deref().is_none_or(|expected| {
            headers
                .get(SECRET_HEADER)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|got| got == expected)
        })
    }
}

/// Starts the worker that dispatches queued updates in arrival order.
///
/// The worker stops once every sender is dropped and the queue is drained.
pub fn spawn_update_worker(dispatcher: Arc<Dispatcher>) -> (mpsc::Sender<Update>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Update>(UPDATE_QUEUE_SIZE);
    let handle = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            dispatcher.process(&update).await;
        }
        debug!("Webhook update worker stopped");
    });
    (tx, handle)
}

/// Builds the `/webhook` + `/health` router.
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(receive_update))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the webhook on `host:port` until `shutdown` resolves, then
/// finishes the queued updates.
pub async fn serve<F>(
    host: &str,
    port: u16,
    dispatcher: Arc<Dispatcher>,
    secret: Option<String>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind((host, port)).await?;
    info!("Webhook server listening on {}", listener.local_addr()?);

    let (updates, worker) = spawn_update_worker(dispatcher);
    axum::serve(listener, router(WebhookState::new(updates, secret)))
        .with_graceful_shutdown(shutdown)
        .await?;

    if let Err(e) = worker.await {
        error!("Webhook update worker failed: {}", e);
    }
    Ok(())
}

async fn receive_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> Result<Json<Value>, StatusCode> {
    if !state.authorized(&headers) {
        warn!("Rejected webhook call with a missing or wrong secret token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    debug!("Webhook update {}", update.update_id);
    if state.updates.send(update).await.is_err() {
        error!("Webhook update worker is gone; dropping update");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({ "ok": true })))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "time": Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    }))
}
