//! Webhook router exercised without a socket

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use build_sentinel::feedback::webhook::{self, DEFAULT_TITLE_MARKERS};
use build_sentinel::feedback::{AttributionStore, OutcomeFeedbackLoop};
use build_sentinel::learning::{LearningStore, Thresholds};
use build_sentinel::server::{router, ServerState};
use build_sentinel::types::ConfidenceTier;
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "hook-secret";
const CATEGORY: &str = "risky:business_logic";

fn state(secret: Option<&str>) -> ServerState {
    let feedback = OutcomeFeedbackLoop::new(
        Arc::new(LearningStore::in_memory(Thresholds::default())),
        Arc::new(AttributionStore::open_in_memory().unwrap()),
    );
    ServerState::new(
        Arc::new(feedback),
        secret.map(str::to_string),
        DEFAULT_TITLE_MARKERS.iter().map(|s| s.to_string()).collect(),
    )
}

fn closed_event(pr: u64, title: &str, merged: bool) -> Vec<u8> {
    json!({
        "action": "closed",
        "number": pr,
        "pull_request": { "number": pr, "title": title, "merged": merged }
    })
    .to_string()
    .into_bytes()
}

fn delivery(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/github")
        .header("content-type", "application/json")
        .header("x-github-event", "pull_request");
    if let Some(sig) = signature {
        builder = builder.header("x-hub-signature-256", sig);
    }
    builder.body(Body::from(body)).unwrap()
}

async fn send(state: &ServerState, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn signed_merge_is_processed_once() {
    let state = state(Some(SECRET));
    state
        .feedback
        .attributions()
        .track(12, &[CATEGORY.to_string()], Some("[REQUIRES REVIEW] Fix build"))
        .await
        .unwrap();

    let body = closed_event(12, "[REQUIRES REVIEW] Fix build", true);
    let signature = webhook::sign(SECRET, &body).unwrap();

    let (status, json) = send(&state, delivery(body.clone(), Some(signature.clone()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "processed");
    assert_eq!(json["result"]["status"], "applied");

    // Redelivery of the same event
    let (status, json) = send(&state, delivery(body, Some(signature))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"]["status"], "already_resolved");

    let record = state.feedback.store().get(CATEGORY).unwrap().unwrap();
    assert_eq!(record.success_count, 1);
    assert_eq!(record.total_attempts, 1);
}

#[tokio::test]
async fn bad_signature_is_rejected_without_side_effects() {
    let state = state(Some(SECRET));
    state
        .feedback
        .attributions()
        .track(3, &[CATEGORY.to_string()], None)
        .await
        .unwrap();

    let body = closed_event(3, "Low-Confidence fix", true);
    let forged = webhook::sign("wrong", &body).unwrap();

    let (status, _) = send(&state, delivery(body.clone(), Some(forged))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&state, delivery(body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(state.feedback.store().get(CATEGORY).unwrap().is_none());
}

#[tokio::test]
async fn three_merged_fix_prs_promote_the_category() {
    let state = state(None);
    for pr in 1..=3 {
        state
            .feedback
            .attributions()
            .track(pr, &[CATEGORY.to_string()], None)
            .await
            .unwrap();
        let (status, _) = send(&state, delivery(closed_event(pr, "Low-Confidence fix", true), None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(
        state.feedback.store().confidence_for(CATEGORY).unwrap(),
        Some(ConfidenceTier::LearnedHigh)
    );

    let request = Request::builder()
        .uri("/api/learning/stats")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["promoted"], json!([CATEGORY]));
}

#[tokio::test]
async fn non_fix_and_open_events_are_ignored() {
    let state = state(None);

    let (status, json) = send(&state, delivery(closed_event(8, "Bump deps", true), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ignored");

    let opened = json!({
        "action": "opened",
        "number": 9,
        "pull_request": { "number": 9, "title": "[REQUIRES REVIEW] x", "merged": false }
    })
    .to_string()
    .into_bytes();
    let (_, json) = send(&state, delivery(opened, None)).await;
    assert_eq!(json["status"], "ignored");

    let (status, _) = send(&state, delivery(b"not json".to_vec(), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn pr_listing_filters_by_outcome() {
    let state = state(None);
    let attributions = state.feedback.attributions();
    attributions.track(1, &[CATEGORY.to_string()], None).await.unwrap();
    attributions.track(2, &[CATEGORY.to_string()], None).await.unwrap();
    state.feedback.handle_terminal_event(2, false).await.unwrap();

    let request = Request::builder()
        .uri("/api/prs?outcome=failure")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send(&state, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["prs"].as_array().unwrap().len(), 1);
    assert_eq!(json["prs"][0]["prId"], 2);

    let request = Request::builder()
        .uri("/api/prs?outcome=bogus")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
