//! Outcome learning
//!
//! Tracks how automated fixes for each error category fare once reviewed,
//! and promotes categories whose fixes keep getting merged.

pub mod promotion;
pub mod record;
pub mod storage;
pub mod store;

pub use promotion::Thresholds;
pub use record::{HistoryAction, HistoryEvent, LearningDocument, PatternRecord, StoreMetadata};
pub use storage::{DocumentStorage, JsonFileStorage, MemoryStorage};
pub use store::{LearningStore, OutcomeUpdate, StoreStats, TierChange};
