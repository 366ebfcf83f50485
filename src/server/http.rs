//! HTTP handlers

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::ServerState;
use crate::feedback::webhook::{self, Disposition, EVENT_HEADER, SIGNATURE_HEADER};
use crate::types::FixOutcome;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// GitHub webhook receiver
pub async fn github_webhook_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = &state.webhook_secret {
        if webhook::verify_signature(secret, &body, header(&headers, SIGNATURE_HEADER)).is_err() {
            warn!("Rejected webhook delivery with bad signature");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid signature" })),
            )
                .into_response();
        }
    }

    match header(&headers, EVENT_HEADER) {
        Some("pull_request") | None => {}
        Some("ping") => {
            return (StatusCode::OK, Json(json!({ "status": "pong" }))).into_response();
        }
        Some(other) => {
            return (
                StatusCode::OK,
                Json(json!({ "status": "ignored", "reason": format!("Event '{}' not handled", other) })),
            )
                .into_response();
        }
    }

    let event = match webhook::parse_event(&body) {
        Ok(e) => e,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let terminal = match webhook::interpret(&event, &state.title_markers) {
        Disposition::Terminal(t) => t,
        Disposition::Ignored(reason) => {
            info!(pr = event.pull_request.number, %reason, "Ignoring webhook event");
            return (
                StatusCode::OK,
                Json(json!({ "status": "ignored", "reason": reason })),
            )
                .into_response();
        }
    };

    match state
        .feedback
        .handle_terminal_event(terminal.pr_id, terminal.merged)
        .await
    {
        Ok(report) => (
            StatusCode::OK,
            Json(json!({ "status": "processed", "result": report })),
        )
            .into_response(),
        Err(e) => {
            warn!(pr = terminal.pr_id, error = %e, "Failed to apply PR outcome");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Status handler
pub async fn status_handler(State(state): State<ServerState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "startedAt": state.started_at,
            "signatureRequired": state.webhook_secret.is_some(),
            "titleMarkers": &*state.title_markers,
            "learningStore": state.feedback.store().location(),
        })),
    )
        .into_response()
}

pub async fn learning_stats_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let store = state.feedback.store().clone();
    let result = tokio::task::spawn_blocking(move || {
        store
            .stats()
            .and_then(|stats| Ok((stats, store.promoted()?)))
    })
    .await;

    match result {
        Ok(Ok((stats, promoted))) => (
            StatusCode::OK,
            Json(json!({
                "stats": stats,
                "promoted": promoted.iter().map(|r| &r.category).collect::<Vec<_>>(),
            })),
        )
            .into_response(),
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct PrQuery {
    pub outcome: Option<String>,
}

pub async fn list_prs_handler(
    State(state): State<ServerState>,
    Query(query): Query<PrQuery>,
) -> impl IntoResponse {
    let filter = match query.outcome.as_deref() {
        None => None,
        Some(s) => match FixOutcome::parse(s) {
            Some(o) => Some(o),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Unknown outcome '{}'", s) })),
                )
                    .into_response();
            }
        },
    };

    match state.feedback.attributions().list(filter).await {
        Ok(prs) => (StatusCode::OK, Json(json!({ "prs": prs }))).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
