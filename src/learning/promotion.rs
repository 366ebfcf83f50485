//! Promotion policy - decides when a category earns or loses learned confidence
//!
//! Categories that keep producing merged fixes get promoted to LEARNED_HIGH;
//! promoted categories that start producing rejected fixes are demoted.

use serde::{Deserialize, Serialize};

use super::record::PatternRecord;

/// Consecutive successes that promote a category
pub const SUCCESS_STREAK_THRESHOLD: u64 = 3;
/// Total successes that promote a category (when they outnumber failures)
pub const SUCCESS_COUNT_THRESHOLD: u64 = 3;
/// Consecutive failures that demote a promoted category
pub const FAILURE_STREAK_THRESHOLD: u64 = 2;
/// Attempts needed before a failure-majority demotion applies
pub const MIN_ATTEMPTS_FOR_DEMOTION: u64 = 3;

/// Promotion and demotion thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub success_streak: u64,
    pub success_count: u64,
    pub failure_streak: u64,
    pub min_attempts_for_demotion: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            success_streak: SUCCESS_STREAK_THRESHOLD,
            success_count: SUCCESS_COUNT_THRESHOLD,
            failure_streak: FAILURE_STREAK_THRESHOLD,
            min_attempts_for_demotion: MIN_ATTEMPTS_FOR_DEMOTION,
        }
    }
}

impl Thresholds {
    /// Not yet promoted, and either on a success streak or holding a
    /// success majority above the count threshold.
    pub fn should_promote(&self, record: &PatternRecord) -> bool {
        !record.promoted
            && (record.consecutive_successes >= self.success_streak
                || (record.success_count >= self.success_count
                    && record.success_count > record.failure_count))
    }

    /// Promoted, and either on a failure streak or holding a failure
    /// majority after enough attempts.
    pub fn should_demote(&self, record: &PatternRecord) -> bool {
        record.promoted
            && (record.consecutive_failures >= self.failure_streak
                || (record.failure_count > record.success_count
                    && record.total_attempts >= self.min_attempts_for_demotion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(outcomes: &[bool]) -> PatternRecord {
        let mut r = PatternRecord::new("risky:business_logic");
        for o in outcomes {
            r.observe(*o);
        }
        r
    }

    #[test]
    fn test_default_thresholds() {
        let t = Thresholds::default();
        assert_eq!(t.success_streak, 3);
        assert_eq!(t.success_count, 3);
        assert_eq!(t.failure_streak, 2);
        assert_eq!(t.min_attempts_for_demotion, 3);
    }

    #[test]
    fn test_streak_promotes() {
        let t = Thresholds::default();
        assert!(!t.should_promote(&record_with(&[true, true])));
        assert!(t.should_promote(&record_with(&[true, true, true])));
    }

    #[test]
    fn test_success_majority_promotes_without_streak() {
        let t = Thresholds::default();
        // 3 successes, 1 failure, streak of 1
        assert!(t.should_promote(&record_with(&[true, true, false, true])));
        // 3 successes, 3 failures: no majority, streak of 1
        assert!(!t.should_promote(&record_with(&[true, false, true, false, false, true])));
    }

    #[test]
    fn test_already_promoted_never_promotes() {
        let t = Thresholds::default();
        let mut r = record_with(&[true, true, true]);
        r.promoted = true;
        assert!(!t.should_promote(&r));
    }

    #[test]
    fn test_demotion_requires_promotion() {
        let t = Thresholds::default();
        let mut r = record_with(&[false, false, false]);
        assert!(!t.should_demote(&r));
        r.promoted = true;
        assert!(t.should_demote(&r));
    }

    #[test]
    fn test_failure_majority_demotes() {
        let t = Thresholds::default();
        let mut r = record_with(&[true, false, true, false, false, true, false]);
        r.promoted = true;
        // streak of 1, but 4 failures vs 3 successes over 7 attempts
        assert!(t.should_demote(&r));
    }
}
