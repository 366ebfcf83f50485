//! Error types for the triage core
//!
//! Each component owns one enum. Only the CLI and server edges collapse
//! these into `anyhow::Error`.

use std::path::PathBuf;
use thiserror::Error;

/// Learning store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not acquire store lock on {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Learning store document at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Storage backend poisoned")]
    Poisoned,
}

/// Failure of the checkout/compile machinery itself (not "does not compile")
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed (exit {code:?}): {stderr}")]
    Command {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("Unknown revision: {0}")]
    UnknownRevision(String),
}

/// Fault locator failures that must reach the caller as errors
#[derive(Debug, Error)]
pub enum LocatorError {
    /// The working tree could not be put back; the caller's checkout is suspect
    #[error("Working tree restoration failed: {0}")]
    RestorationFailure(String),

    /// The pre-run snapshot could not be taken, so nothing was touched
    #[error("Could not snapshot working tree: {0}")]
    Snapshot(#[source] OracleError),

    #[error("Fault analysis task aborted: {0}")]
    TaskAborted(String),

    /// The cross-process worktree lock could not be taken
    #[error("Could not lock working tree via {path}: {source}")]
    WorktreeLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome feedback failures
#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("Attribution database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Attribution store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Webhook signature mismatch")]
    BadSignature,

    #[error("Malformed webhook payload: {0}")]
    Payload(String),

    #[error("Corrupt attribution row for PR #{pr_id}: {reason}")]
    CorruptRow { pr_id: u64, reason: String },

    #[error("Learning update task failed: {0}")]
    LearningTask(String),
}
