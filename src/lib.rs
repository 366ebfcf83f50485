//! Build Sentinel - adaptive build-failure triage
//!
//! - Rule-based error classification with learned confidence overrides
//! - Outcome learning store with promotion and demotion
//! - Regression bisection over git history with working-tree restoration
//! - PR outcome feedback from GitHub webhooks
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use build_sentinel::{ErrorClassifier, LearningStore, Thresholds};
//!
//! let store = Arc::new(LearningStore::open("learning_db.json", Thresholds::default())?);
//! let report = ErrorClassifier::new(store).classify_output(&build_log);
//! for e in &report.low {
//!     println!("needs review: {}", e.classification.category);
//! }
//! ```

pub mod types;
pub mod error;
pub mod learning;
pub mod classifier;
pub mod locator;
pub mod feedback;
pub mod config;
pub mod server;
pub mod cli;

pub use types::{ConfidenceTier, FixOutcome};

pub use error::{FeedbackError, LocatorError, OracleError, StoreError};

pub use learning::{LearningStore, PatternRecord, Thresholds};

pub use classifier::{Classification, ClassificationReport, ClassifiedError, ErrorClassifier};

pub use locator::{FaultLocator, GitOracle, LocatorReport, RevisionOracle};

pub use feedback::{AttributionStore, OutcomeFeedbackLoop};

pub use config::Config;

pub use server::{start as start_server, ServerState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - Adaptive build-failure triage", NAME, VERSION)
}
