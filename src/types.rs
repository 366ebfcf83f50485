//! Shared types used across modules
//!
//! This module contains types that are used by multiple modules
//! to avoid circular dependencies.

use serde::{Deserialize, Serialize};

/// Confidence assigned to a classified build error.
///
/// `Low` requires manual review; the other two permit automated action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    Low,
    RuleHigh,
    LearnedHigh,
}

impl ConfidenceTier {
    /// Whether this tier permits an automated fix
    pub fn is_high(&self) -> bool {
        !matches!(self, ConfidenceTier::Low)
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceTier::Low => write!(f, "LOW"),
            ConfidenceTier::RuleHigh => write!(f, "RULE_HIGH"),
            ConfidenceTier::LearnedHigh => write!(f, "LEARNED_HIGH"),
        }
    }
}

/// Terminal (or pending) outcome of an automated fix artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixOutcome {
    Pending,
    Success,
    Failure,
}

impl FixOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixOutcome::Pending => "pending",
            FixOutcome::Success => "success",
            FixOutcome::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(FixOutcome::Pending),
            "success" => Some(FixOutcome::Success),
            "failure" => Some(FixOutcome::Failure),
            _ => None,
        }
    }

    pub fn from_merged(merged: bool) -> Self {
        if merged {
            FixOutcome::Success
        } else {
            FixOutcome::Failure
        }
    }
}

impl std::fmt::Display for FixOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
