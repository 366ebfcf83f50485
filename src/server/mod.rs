//! Webhook server
//!
//! Receives GitHub pull request events and exposes read-only status
//! endpoints for the learning and attribution stores.

pub mod http;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::feedback::OutcomeFeedbackLoop;

/// Largest webhook body accepted
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub feedback: Arc<OutcomeFeedbackLoop>,
    /// HMAC secret for `X-Hub-Signature-256`; unsigned requests are
    /// accepted when unset
    pub webhook_secret: Option<Arc<str>>,
    pub title_markers: Arc<[String]>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(
        feedback: Arc<OutcomeFeedbackLoop>,
        webhook_secret: Option<String>,
        title_markers: Vec<String>,
    ) -> Self {
        Self {
            feedback,
            webhook_secret: webhook_secret.filter(|s| !s.is_empty()).map(Arc::from),
            title_markers: title_markers.into(),
            started_at: Utc::now(),
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/webhook/github", post(http::github_webhook_handler))
        .route("/api/status", get(http::status_handler))
        .route("/api/learning/stats", get(http::learning_stats_handler))
        .route("/api/prs", get(http::list_prs_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn start(host: &str, port: u16, state: ServerState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    if state.webhook_secret.is_none() {
        tracing::warn!("No webhook secret configured, accepting unsigned deliveries");
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "Webhook server listening");
    println!("Listening on http://{}", addr);
    println!("  POST /webhook/github");
    println!("  GET  /api/status");
    println!("  GET  /api/learning/stats");
    println!("  GET  /api/prs");

    axum::serve(listener, router(state)).await?;
    Ok(())
}
