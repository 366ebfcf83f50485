//! Persisted learning document: per-category records, metadata, changelog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::ConfidenceTier;

/// Document format version
pub const DOCUMENT_VERSION: &str = "3.0";

/// Changelog entries kept in the document
pub const MAX_HISTORY_EVENTS: usize = 500;

/// Outcome statistics and promotion state for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRecord {
    pub category: String,
    pub confidence_tier: ConfidenceTier,
    pub total_attempts: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_successes: u64,
    pub consecutive_failures: u64,
    pub promoted: bool,
    pub promoted_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl PatternRecord {
    pub fn new(category: &str) -> Self {
        Self {
            category: category.to_string(),
            confidence_tier: ConfidenceTier::Low,
            total_attempts: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_successes: 0,
            consecutive_failures: 0,
            promoted: false,
            promoted_at: None,
            last_updated: Utc::now(),
        }
    }

    /// Apply one observed outcome
    pub fn observe(&mut self, success: bool) {
        self.total_attempts += 1;
        if success {
            self.success_count += 1;
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failure_count += 1;
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
        }
        self.last_updated = Utc::now();
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_attempts as f64
        }
    }
}

/// Summary block of the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMetadata {
    pub version: String,
    pub created: DateTime<Utc>,
    pub total_patterns_tracked: u64,
    pub promoted_count: u64,
    pub demoted_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for StoreMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            version: DOCUMENT_VERSION.to_string(),
            created: now,
            total_patterns_tracked: 0,
            promoted_count: 0,
            demoted_count: 0,
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    Promoted,
    Demoted,
    Reset,
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryAction::Promoted => write!(f, "PROMOTED"),
            HistoryAction::Demoted => write!(f, "DEMOTED"),
            HistoryAction::Reset => write!(f, "RESET"),
        }
    }
}

/// One changelog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub action: HistoryAction,
    pub category: Option<String>,
    pub success_count: u64,
    pub failure_count: u64,
    pub timestamp: DateTime<Utc>,
}

/// The whole durable document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LearningDocument {
    pub metadata: StoreMetadata,
    #[serde(default)]
    pub patterns: BTreeMap<String, PatternRecord>,
    #[serde(default)]
    pub history: Vec<HistoryEvent>,
}

impl LearningDocument {
    pub fn record_mut(&mut self, category: &str) -> &mut PatternRecord {
        if !self.patterns.contains_key(category) {
            self.metadata.total_patterns_tracked += 1;
        }
        self.patterns
            .entry(category.to_string())
            .or_insert_with(|| PatternRecord::new(category))
    }

    pub fn push_history(&mut self, action: HistoryAction, record: Option<&PatternRecord>) {
        self.history.push(HistoryEvent {
            action,
            category: record.map(|r| r.category.clone()),
            success_count: record.map(|r| r.success_count).unwrap_or(0),
            failure_count: record.map(|r| r.failure_count).unwrap_or(0),
            timestamp: Utc::now(),
        });
        if self.history.len() > MAX_HISTORY_EVENTS {
            let excess = self.history.len() - MAX_HISTORY_EVENTS;
            self.history.drain(..excess);
        }
    }

    pub fn touch(&mut self) {
        self.metadata.last_updated = Utc::now();
    }
}
