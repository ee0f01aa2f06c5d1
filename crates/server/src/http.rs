//! HTTP surface: health probe and the Telegram webhook. Both live on the
//! main server port.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use chrono::Utc;
use reservo_agent::Pipeline;
use reservo_channels::{telegram, ChannelAdapter};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub agent_id: String,
    pub pipeline: Arc<Pipeline>,
    pub adapters: Vec<Arc<ChannelAdapter>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub agent_id: String,
    pub checked_at: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/telegram", post(telegram_webhook))
        .with_state(state)
}

pub async fn serve(
    bind_address: &str,
    port: u16,
    state: AppState,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(bind_address = %address, "http server listening");

    tokio::spawn(async move {
        let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        });
        if let Err(error) = server.await {
            error!(%error, "http server terminated unexpectedly");
        }
    });
    Ok(())
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let payload = HealthResponse {
        status: "ready",
        agent_id: state.agent_id.clone(),
        checked_at: Utc::now().to_rfc3339(),
    };
    (StatusCode::OK, Json(payload))
}

/// Telegram update entry point. Always answers 200 so Telegram does not
/// retry; failures are logged and the user can simply write again.
async fn telegram_webhook(
    State(state): State<AppState>,
    Json(update): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let Some(incoming) = telegram::parse_webhook(&update) else {
        return (StatusCode::OK, Json(json!({ "ok": true, "skipped": true })));
    };

    match state.pipeline.process(incoming).await {
        Ok(outgoing) => {
            let telegram = state
                .adapters
                .iter()
                .find(|adapter| adapter.name() == "telegram");
            match telegram {
                Some(adapter) => {
                    if let Err(error) = adapter.send(&outgoing).await {
                        error!(%error, "telegram reply send failed");
                    }
                }
                None => warn!("telegram update received but no telegram channel is configured"),
            }
            (StatusCode::OK, Json(json!({ "ok": true })))
        }
        Err(error) => {
            error!(%error, "webhook message processing failed");
            (StatusCode::OK, Json(json!({ "ok": false })))
        }
    }
}
