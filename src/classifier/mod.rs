//! Build error classification
//!
//! Splits compiler output into individual errors, maps each one onto a
//! category through an ordered rule table, and lets learned outcomes
//! override the rule-based confidence.

pub mod patterns;
pub mod parser;
pub mod engine;

pub use patterns::{PatternMatcher, PatternMatch, PatternRule, RuleClass};
pub use parser::{parse_errors, ErrorBlock};
pub use engine::{Classification, ClassificationReport, ClassifiedError, ErrorClassifier};
