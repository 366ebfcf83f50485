//! Outcome feedback loop - closes the loop from PR outcomes to learning
//!
//! The attribution record is claimed before any learning update so that a
//! duplicated webhook delivery can never count the same PR twice. All of a
//! PR's categories are updated in one store transaction; if that fails the
//! claim is released again.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::attribution::{AttributionStore, Claim};
use crate::error::FeedbackError;
use crate::learning::{LearningStore, TierChange};
use crate::types::FixOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackStatus {
    /// Outcome recorded for every attributed category
    Applied,
    /// No attribution record for this PR
    Untracked,
    /// A previous delivery already resolved this PR
    AlreadyResolved,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryUpdate {
    pub category: String,
    pub change: TierChange,
    pub success_count: u64,
    pub failure_count: u64,
    pub promoted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackReport {
    pub pr_id: u64,
    pub status: FeedbackStatus,
    pub outcome: Option<FixOutcome>,
    pub updates: Vec<CategoryUpdate>,
}

pub struct OutcomeFeedbackLoop {
    store: Arc<LearningStore>,
    attributions: Arc<AttributionStore>,
}

impl OutcomeFeedbackLoop {
    pub fn new(store: Arc<LearningStore>, attributions: Arc<AttributionStore>) -> Self {
        Self {
            store,
            attributions,
        }
    }

    pub fn store(&self) -> &Arc<LearningStore> {
        &self.store
    }

    pub fn attributions(&self) -> &Arc<AttributionStore> {
        &self.attributions
    }

    /// Apply a merged (`merged = true`) or closed-unmerged PR outcome
    pub async fn handle_terminal_event(
        &self,
        pr_id: u64,
        merged: bool,
    ) -> Result<FeedbackReport, FeedbackError> {
        let outcome = FixOutcome::from_merged(merged);

        let record = match self.attributions.claim_terminal(pr_id, outcome).await? {
            Claim::Claimed(record) => record,
            Claim::Untracked => {
                info!(pr = pr_id, "PR is not tracked, nothing to learn");
                return Ok(FeedbackReport {
                    pr_id,
                    status: FeedbackStatus::Untracked,
                    outcome: None,
                    updates: Vec::new(),
                });
            }
            Claim::AlreadyResolved(previous) => {
                info!(pr = pr_id, previous = %previous, "PR outcome already recorded, ignoring duplicate");
                return Ok(FeedbackReport {
                    pr_id,
                    status: FeedbackStatus::AlreadyResolved,
                    outcome: Some(previous),
                    updates: Vec::new(),
                });
            }
        };

        if record.categories.is_empty() {
            warn!(pr = pr_id, "Tracked PR has no attributed categories");
        }

        // The file store takes a blocking lock and does synchronous I/O
        let store = self.store.clone();
        let categories = record.categories.clone();
        let applied = tokio::task::spawn_blocking(move || store.apply_outcomes(&categories, merged))
            .await
            .map_err(|e| FeedbackError::LearningTask(e.to_string()))
            .and_then(|r| r.map_err(FeedbackError::from));

        let applied = match applied {
            Ok(applied) => applied,
            Err(e) => {
                // Nothing was learned, so let a redelivery try again
                if let Err(release) = self.attributions.release_claim(pr_id, outcome).await {
                    warn!(pr = pr_id, error = %release, "Could not release claim after failed update");
                }
                warn!(pr = pr_id, error = %e, "Learning update failed, PR left pending");
                return Err(e);
            }
        };

        let updates: Vec<CategoryUpdate> = record
            .categories
            .iter()
            .zip(applied)
            .map(|(category, update)| CategoryUpdate {
                category: category.clone(),
                change: update.change,
                success_count: update.record.success_count,
                failure_count: update.record.failure_count,
                promoted: update.record.promoted,
            })
            .collect();

        info!(
            pr = pr_id,
            outcome = %outcome,
            categories = updates.len(),
            "Applied PR outcome to learning store"
        );

        Ok(FeedbackReport {
            pr_id,
            status: FeedbackStatus::Applied,
            outcome: Some(outcome),
            updates,
        })
    }
}
