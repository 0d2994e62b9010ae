//! HTTP surface for push-style invocations. Every `POST /` performs one run.

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use foldermap_core::Config;
use foldermap_scanner::TokenSource;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::handlers::{Endpoints, format_error_chain, run_once};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    tokens: Arc<dyn TokenSource>,
    endpoints: Arc<Endpoints>,
}

impl AppState {
    pub fn new(config: Config, tokens: Arc<dyn TokenSource>, endpoints: Endpoints) -> Self {
        Self {
            config: Arc::new(config),
            tokens,
            endpoints: Arc::new(endpoints),
        }
    }
}

/// The parts of a push subscription envelope worth logging. The body is
/// otherwise ignored; any JSON, or none, triggers a run.
#[derive(Debug, Deserialize)]
struct PushEnvelope {
    #[serde(default)]
    message: Option<PushMessage>,
    #[serde(default)]
    subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushMessage {
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunFailure {
    stage: &'static str,
    error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(invoke))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

async fn invoke(State(state): State<AppState>, body: Bytes) -> Response {
    match serde_json::from_slice::<PushEnvelope>(&body) {
        Ok(envelope) => debug!(
            message_id = ?envelope.message.and_then(|m| m.message_id),
            subscription = ?envelope.subscription,
            "Received push"
        ),
        Err(_) => debug!(bytes = body.len(), "Received request without a push envelope"),
    }

    match run_once(&state.config, state.tokens.clone(), &state.endpoints).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => {
            let chain = format_error_chain(&err);
            error!(stage = err.stage(), error = %chain, "Run failed");
            let failure = RunFailure {
                stage: err.stage(),
                error: chain,
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(failure)).into_response()
        }
    }
}

/// Listen on every interface until Ctrl-C. In-flight runs finish first.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://localhost:{}", port);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!("Cannot listen for Ctrl-C, serving until killed: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
