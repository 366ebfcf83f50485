//! Error classifier: rule table first, learned state on top
//!
//! The learning store is consulted on every call and never cached here, so a
//! promotion or demotion written by the feedback loop is visible to the very
//! next classification.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::parser::{parse_errors, ErrorBlock};
use super::patterns::PatternMatcher;
use crate::learning::LearningStore;
use crate::types::ConfidenceTier;

/// Confidence reported for a promoted category
pub const LEARNED_CONFIDENCE: f64 = 0.9;
/// Base confidence at or above which a rule result is RULE_HIGH
pub const DEFAULT_HIGH_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Final decision for one error message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub category: String,
    pub confidence: f64,
    pub tier: ConfidenceTier,
}

/// A parsed error block together with its classification
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedError {
    pub fingerprint: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub message: String,
    #[serde(flatten)]
    pub classification: Classification,
}

/// Compiler output partitioned by tier. The partition, not an aggregate
/// score, is what downstream policy acts on.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassificationReport {
    /// Tier RULE_HIGH or LEARNED_HIGH: eligible for automated fixing
    pub high: Vec<ClassifiedError>,
    /// Tier LOW: manual review
    pub low: Vec<ClassifiedError>,
}

impl ClassificationReport {
    pub fn total(&self) -> usize {
        self.high.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Distinct categories in the low-confidence set, in first-seen order
    pub fn low_categories(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for e in &self.low {
            if !seen.contains(&e.classification.category) {
                seen.push(e.classification.category.clone());
            }
        }
        seen
    }
}

/// Composes the rule table with the learning store
pub struct ErrorClassifier {
    matcher: PatternMatcher,
    store: Option<Arc<LearningStore>>,
    high_threshold: f64,
}

impl ErrorClassifier {
    /// Classifier backed by a learning store
    pub fn new(store: Arc<LearningStore>) -> Self {
        Self {
            matcher: PatternMatcher::default(),
            store: Some(store),
            high_threshold: DEFAULT_HIGH_CONFIDENCE_THRESHOLD,
        }
    }

    /// Rule-only classifier (learning disabled)
    pub fn rules_only() -> Self {
        Self {
            matcher: PatternMatcher::default(),
            store: None,
            high_threshold: DEFAULT_HIGH_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_matcher(mut self, matcher: PatternMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_high_threshold(mut self, threshold: f64) -> Self {
        self.high_threshold = threshold;
        self
    }

    /// Classify a single error message
    pub fn classify(&self, error_text: &str) -> Classification {
        let base = self.matcher.match_text(error_text);

        if let Some(store) = &self.store {
            match store.confidence_for(&base.category) {
                Ok(Some(tier)) => {
                    debug!(category = %base.category, "Learned confidence overrides rule result");
                    return Classification {
                        category: base.category,
                        confidence: LEARNED_CONFIDENCE,
                        tier,
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(category = %base.category, error = %e, "Learning store lookup failed, using rule result");
                }
            }
        }

        let tier = if base.base_confidence >= self.high_threshold {
            ConfidenceTier::RuleHigh
        } else {
            ConfidenceTier::Low
        };

        Classification {
            category: base.category,
            confidence: base.base_confidence,
            tier,
        }
    }

    /// Parse compiler output into blocks and classify each independently
    pub fn classify_output(&self, output: &str) -> ClassificationReport {
        let mut report = ClassificationReport::default();

        for block in parse_errors(output) {
            let classified = self.classify_block(block);
            if classified.classification.tier.is_high() {
                report.high.push(classified);
            } else {
                report.low.push(classified);
            }
        }

        debug!(
            high = report.high.len(),
            low = report.low.len(),
            "Classified compiler output"
        );
        report
    }

    fn classify_block(&self, block: ErrorBlock) -> ClassifiedError {
        let classification = self.classify(&block.message);
        ClassifiedError {
            fingerprint: block.fingerprint(),
            file: block.file,
            line: block.line,
            message: block.message,
            classification,
        }
    }
}
