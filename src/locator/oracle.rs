//! Revision oracle - the locator's only side-effecting dependency
//!
//! An oracle can list history, move the working tree to a revision and
//! report whether that revision builds. It also owns snapshot/restore of the
//! working tree so the locator can hand the caller back exactly what it found.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OracleError;

/// A working tree checked out at a specific revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingTree {
    pub revision: String,
}

/// Pre-run working tree state, enough to put everything back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    /// Commit HEAD pointed at
    pub head: String,
    /// Branch HEAD was attached to (None when detached)
    pub branch: Option<String>,
    /// Stash entry holding uncommitted changes, if there were any
    pub stash: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RevisionOracle: Send + Sync {
    /// Up to `limit` commits, newest first, starting with HEAD
    async fn history(&self, limit: usize) -> Result<Vec<String>, OracleError>;

    /// Commits after `good` up to and including `bad`, oldest first
    async fn range(&self, good: &str, bad: &str) -> Result<Vec<String>, OracleError>;

    /// First parent of a revision (None for a root commit)
    async fn parent(&self, revision: &str) -> Result<Option<String>, OracleError>;

    /// Full commit id for any revision expression (`HEAD~4`, a tag, a branch)
    async fn resolve(&self, revision: &str) -> Result<String, OracleError>;

    async fn checkout(&self, revision: &str) -> Result<WorkingTree, OracleError>;

    /// Whether the tree builds. A build that runs and fails is `Ok(false)`;
    /// `Err` means the build could not be attempted at all.
    async fn compiles(&self, tree: &WorkingTree) -> Result<bool, OracleError>;

    async fn snapshot(&self) -> Result<TreeSnapshot, OracleError>;

    async fn restore(&self, snapshot: &TreeSnapshot) -> Result<(), OracleError>;
}
