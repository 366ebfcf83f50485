//! PR outcome feedback
//!
//! Tracks which error categories each automated fix PR addresses and feeds
//! merge/close outcomes back into the learning store.

pub mod attribution;
pub mod metadata;
pub mod outcome;
pub mod webhook;

pub use attribution::{AttributionStore, Claim, PrAttribution};
pub use metadata::LearningMetadata;
pub use outcome::{CategoryUpdate, FeedbackReport, FeedbackStatus, OutcomeFeedbackLoop};
pub use webhook::{Disposition, PullRequestEvent, TerminalEvent};
