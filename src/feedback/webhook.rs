//! GitHub pull request webhook payloads
//!
//! Only the fields needed to recognise a terminal PR event are modelled.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::FeedbackError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
/// Header naming the event type
pub const EVENT_HEADER: &str = "x-github-event";

/// Title markers of PRs the fix pipeline opened for review
pub const DEFAULT_TITLE_MARKERS: &[&str] = &["REQUIRES REVIEW", "Low-Confidence"];

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    #[serde(default)]
    pub action: String,
    pub number: Option<u64>,
    pub pull_request: PullRequestPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub merged: bool,
}

/// A closed PR the feedback loop should learn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalEvent {
    pub pr_id: u64,
    pub merged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Terminal(TerminalEvent),
    Ignored(String),
}

/// Check `X-Hub-Signature-256` (`sha256=<hex>`) against the raw body
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), FeedbackError> {
    let signature = header
        .and_then(|h| h.strip_prefix("sha256="))
        .ok_or(FeedbackError::BadSignature)?;
    let expected = hex::decode(signature).map_err(|_| FeedbackError::BadSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| FeedbackError::BadSignature)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| FeedbackError::BadSignature)
}

/// Signature header value for `body`
pub fn sign(secret: &str, body: &[u8]) -> Result<String, FeedbackError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| FeedbackError::BadSignature)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

pub fn parse_event(body: &[u8]) -> Result<PullRequestEvent, FeedbackError> {
    serde_json::from_slice(body).map_err(|e| FeedbackError::Payload(e.to_string()))
}

/// Decide whether an event is a terminal event for a tracked fix PR.
/// An empty marker list accepts every title.
pub fn interpret(event: &PullRequestEvent, markers: &[String]) -> Disposition {
    let pr = &event.pull_request;
    let action = event.action.to_lowercase();

    if !markers.is_empty() && !markers.iter().any(|m| pr.title.contains(m.as_str())) {
        return Disposition::Ignored(format!("PR #{} is not an automated fix PR", pr.number));
    }
    if action != "closed" {
        return Disposition::Ignored(format!("Action '{}' not 'closed'", action));
    }

    Disposition::Terminal(TerminalEvent {
        pr_id: event.number.unwrap_or(pr.number),
        merged: pr.merged,
    })
}
