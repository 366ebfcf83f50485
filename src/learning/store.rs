//! Learning Store - durable per-category outcome statistics and promotion state
//!
//! Every mutation is a single read-modify-write transaction on the backing
//! storage and is persisted before the call returns.

use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

use super::promotion::Thresholds;
use super::record::{HistoryAction, HistoryEvent, LearningDocument, PatternRecord};
use super::storage::{DocumentStorage, JsonFileStorage, MemoryStorage};
use crate::error::StoreError;
use crate::types::ConfidenceTier;

/// What a combined outcome update did to a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierChange {
    Unchanged,
    Promoted,
    Demoted,
}

/// Result of `LearningStore::apply_outcome`
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeUpdate {
    pub record: PatternRecord,
    pub change: TierChange,
}

/// Aggregate figures derived from the document
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub location: String,
    pub version: String,
    pub total_patterns: usize,
    pub promoted_patterns: usize,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub success_rate: f64,
    pub promoted_count: u64,
    pub demoted_count: u64,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

/// Persistent learning store
pub struct LearningStore {
    storage: Box<dyn DocumentStorage>,
    thresholds: Thresholds,
}

impl LearningStore {
    /// Open (or lazily create) a JSON-backed store
    pub fn open(path: impl Into<PathBuf>, thresholds: Thresholds) -> Result<Self, StoreError> {
        let storage = JsonFileStorage::new(path)?;
        Ok(Self::with_storage(Box::new(storage), thresholds))
    }

    /// Store that lives only as long as the process
    pub fn in_memory(thresholds: Thresholds) -> Self {
        Self::with_storage(Box::new(MemoryStorage::new()), thresholds)
    }

    pub fn with_storage(storage: Box<dyn DocumentStorage>, thresholds: Thresholds) -> Self {
        Self {
            storage,
            thresholds,
        }
    }

    fn transact<F>(&self, mut mutate: F) -> Result<LearningDocument, StoreError>
    where
        F: FnMut(&mut LearningDocument) -> Result<(), StoreError>,
    {
        self.storage.transact(&mut mutate)
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn location(&self) -> String {
        self.storage.describe()
    }

    /// Record one observed fix outcome, creating the record on first sight
    pub fn record_outcome(&self, category: &str, success: bool) -> Result<PatternRecord, StoreError> {
        let mut updated = None;
        self.transact(|doc| {
            let record = doc.record_mut(category);
            record.observe(success);
            updated = Some(record.clone());
            Ok(())
        })?;

        let record = updated.ok_or_else(|| StoreError::UnknownCategory(category.to_string()))?;
        debug!(
            category,
            success,
            attempts = record.total_attempts,
            "Recorded fix outcome"
        );
        Ok(record)
    }

    /// Whether the category is eligible for promotion right now
    pub fn check_promotion(&self, category: &str) -> Result<bool, StoreError> {
        let doc = self.storage.load()?;
        Ok(doc
            .patterns
            .get(category)
            .map(|r| self.thresholds.should_promote(r))
            .unwrap_or(false))
    }

    /// Whether the category is eligible for demotion right now
    pub fn check_demotion(&self, category: &str) -> Result<bool, StoreError> {
        let doc = self.storage.load()?;
        Ok(doc
            .patterns
            .get(category)
            .map(|r| self.thresholds.should_demote(r))
            .unwrap_or(false))
    }

    /// Mark a category as learned-high. Returns false if it already was.
    pub fn promote(&self, category: &str) -> Result<bool, StoreError> {
        let mut changed = false;
        self.transact(|doc| {
            changed = promote_in(doc, category)?;
            Ok(())
        })?;
        if changed {
            info!(category, "Promoted category to LEARNED_HIGH");
        }
        Ok(changed)
    }

    /// Clear the learned-high state. Returns false if it was not promoted.
    pub fn demote(&self, category: &str) -> Result<bool, StoreError> {
        let mut changed = false;
        self.transact(|doc| {
            changed = demote_in(doc, category)?;
            Ok(())
        })?;
        if changed {
            info!(category, "Demoted category back to rule-based confidence");
        }
        Ok(changed)
    }

    /// Record an outcome and run the matching promotion or demotion check,
    /// all inside one transaction so concurrent writers cannot interleave
    /// between the count update and the tier decision.
    pub fn apply_outcome(&self, category: &str, success: bool) -> Result<OutcomeUpdate, StoreError> {
        let mut updates = self.apply_outcomes(&[category.to_string()], success)?;
        updates
            .pop()
            .ok_or_else(|| StoreError::UnknownCategory(category.to_string()))
    }

    /// `apply_outcome` for several categories in a single transaction:
    /// either every category is updated or none is.
    pub fn apply_outcomes(
        &self,
        categories: &[String],
        success: bool,
    ) -> Result<Vec<OutcomeUpdate>, StoreError> {
        let thresholds = self.thresholds;
        let mut updates = Vec::new();
        self.transact(|doc| {
            for category in categories {
                updates.push(apply_in(doc, &thresholds, category, success)?);
            }
            Ok(())
        })?;

        for update in &updates {
            let category = update.record.category.as_str();
            match update.change {
                TierChange::Promoted => info!(category, "Promoted category to LEARNED_HIGH"),
                TierChange::Demoted => info!(category, "Demoted category back to rule-based confidence"),
                TierChange::Unchanged => debug!(category, success, "Recorded fix outcome"),
            }
        }
        Ok(updates)
    }

    /// LEARNED_HIGH for promoted categories, otherwise nothing
    pub fn confidence_for(&self, category: &str) -> Result<Option<ConfidenceTier>, StoreError> {
        let doc = self.storage.load()?;
        Ok(doc
            .patterns
            .get(category)
            .filter(|r| r.promoted)
            .map(|_| ConfidenceTier::LearnedHigh))
    }

    pub fn get(&self, category: &str) -> Result<Option<PatternRecord>, StoreError> {
        Ok(self.storage.load()?.patterns.remove(category))
    }

    /// Full copy of the current document
    pub fn snapshot(&self) -> Result<LearningDocument, StoreError> {
        self.storage.load()
    }

    /// Records sorted by total attempts, busiest first
    pub fn records(&self) -> Result<Vec<PatternRecord>, StoreError> {
        let mut records: Vec<_> = self.storage.load()?.patterns.into_values().collect();
        records.sort_by(|a, b| {
            b.total_attempts
                .cmp(&a.total_attempts)
                .then_with(|| a.category.cmp(&b.category))
        });
        Ok(records)
    }

    pub fn promoted(&self) -> Result<Vec<PatternRecord>, StoreError> {
        Ok(self.records()?.into_iter().filter(|r| r.promoted).collect())
    }

    /// Records whose category contains `needle` (case-insensitive)
    pub fn find(&self, needle: &str) -> Result<Vec<PatternRecord>, StoreError> {
        let needle = needle.to_lowercase();
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.category.to_lowercase().contains(&needle))
            .collect())
    }

    /// Most recent changelog entries, newest first
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryEvent>, StoreError> {
        let doc = self.storage.load()?;
        Ok(doc.history.into_iter().rev().take(limit).collect())
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let doc = self.storage.load()?;
        let total_attempts: u64 = doc.patterns.values().map(|r| r.total_attempts).sum();
        let total_successes: u64 = doc.patterns.values().map(|r| r.success_count).sum();
        let success_rate = if total_attempts == 0 {
            0.0
        } else {
            total_successes as f64 / total_attempts as f64
        };

        Ok(StoreStats {
            location: self.storage.describe(),
            version: doc.metadata.version.clone(),
            total_patterns: doc.patterns.len(),
            promoted_patterns: doc.patterns.values().filter(|r| r.promoted).count(),
            total_attempts,
            total_successes,
            success_rate,
            promoted_count: doc.metadata.promoted_count,
            demoted_count: doc.metadata.demoted_count,
            last_updated: doc.metadata.last_updated,
        })
    }

    /// Drop every record. The reset itself is kept in the changelog.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.transact(|doc| {
            let mut fresh = LearningDocument::default();
            fresh.history = std::mem::take(&mut doc.history);
            fresh.push_history(HistoryAction::Reset, None);
            *doc = fresh;
            Ok(())
        })?;
        info!(location = %self.storage.describe(), "Learning store reset");
        Ok(())
    }
}

fn apply_in(
    doc: &mut LearningDocument,
    thresholds: &Thresholds,
    category: &str,
    success: bool,
) -> Result<OutcomeUpdate, StoreError> {
    doc.record_mut(category).observe(success);
    let record = &doc.patterns[category];
    let promote = success && thresholds.should_promote(record);
    let demote = !success && thresholds.should_demote(record);

    let change = if promote {
        promote_in(doc, category)?;
        TierChange::Promoted
    } else if demote {
        demote_in(doc, category)?;
        TierChange::Demoted
    } else {
        TierChange::Unchanged
    };

    Ok(OutcomeUpdate {
        record: doc.patterns[category].clone(),
        change,
    })
}

fn promote_in(doc: &mut LearningDocument, category: &str) -> Result<bool, StoreError> {
    let record = doc
        .patterns
        .get_mut(category)
        .ok_or_else(|| StoreError::UnknownCategory(category.to_string()))?;
    if record.promoted {
        return Ok(false);
    }

    record.promoted = true;
    record.promoted_at = Some(chrono::Utc::now());
    record.confidence_tier = ConfidenceTier::LearnedHigh;
    let snapshot = record.clone();

    doc.metadata.promoted_count += 1;
    doc.push_history(HistoryAction::Promoted, Some(&snapshot));
    Ok(true)
}

fn demote_in(doc: &mut LearningDocument, category: &str) -> Result<bool, StoreError> {
    let record = doc
        .patterns
        .get_mut(category)
        .ok_or_else(|| StoreError::UnknownCategory(category.to_string()))?;
    if !record.promoted {
        return Ok(false);
    }

    record.promoted = false;
    // Failure streak stays so one lucky merge cannot re-promote immediately
    record.consecutive_successes = 0;
    record.confidence_tier = ConfidenceTier::Low;
    let snapshot = record.clone();

    doc.metadata.demoted_count += 1;
    doc.push_history(HistoryAction::Demoted, Some(&snapshot));
    Ok(true)
}
