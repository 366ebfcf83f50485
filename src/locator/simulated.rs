//! In-memory revision oracle over a synthetic linear history
//!
//! Commit `i` is named `c{i}`; index 0 is the oldest and the last index is
//! HEAD.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::oracle::{RevisionOracle, TreeSnapshot, WorkingTree};
use crate::error::OracleError;

#[derive(Debug)]
struct SimState {
    head: usize,
    stash: Option<String>,
    dirty: bool,
}

pub struct SimulatedOracle {
    compiles: Vec<bool>,
    unavailable: HashSet<usize>,
    panic_at: Option<usize>,
    fail_restore: bool,
    build_delay: Option<Duration>,
    compile_calls: AtomicUsize,
    checkouts: AtomicUsize,
    /// Runs between snapshot and restore, and the most ever seen at once
    active_runs: AtomicUsize,
    max_active_runs: AtomicUsize,
    state: Mutex<SimState>,
}

impl SimulatedOracle {
    /// One flag per commit, oldest first: whether that commit builds
    pub fn from_flags(flags: &[bool]) -> Self {
        Self {
            compiles: flags.to_vec(),
            unavailable: HashSet::new(),
            panic_at: None,
            fail_restore: false,
            build_delay: None,
            compile_calls: AtomicUsize::new(0),
            checkouts: AtomicUsize::new(0),
            active_runs: AtomicUsize::new(0),
            max_active_runs: AtomicUsize::new(0),
            state: Mutex::new(SimState {
                head: flags.len().saturating_sub(1),
                stash: None,
                dirty: false,
            }),
        }
    }

    /// Chain of `len` commits where everything from `first_bad` on is broken
    pub fn with_regression_at(len: usize, first_bad: usize) -> Self {
        let flags: Vec<bool> = (0..len).map(|i| i < first_bad).collect();
        Self::from_flags(&flags)
    }

    /// Checkouts of these commits fail as if git could not run
    pub fn with_unavailable(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.unavailable.extend(indices);
        self
    }

    /// Building this commit panics
    pub fn with_panic_at(mut self, index: usize) -> Self {
        self.panic_at = Some(index);
        self
    }

    pub fn with_failing_restore(mut self) -> Self {
        self.fail_restore = true;
        self
    }

    /// Every build takes this long
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// Pretend the caller has uncommitted changes
    pub fn with_dirty_tree(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.dirty = true;
        }
        self
    }

    pub fn sha(index: usize) -> String {
        format!("c{}", index)
    }

    pub fn compile_calls(&self) -> usize {
        self.compile_calls.load(Ordering::SeqCst)
    }

    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_runs(&self) -> usize {
        self.max_active_runs.load(Ordering::SeqCst)
    }

    /// Current HEAD, whether uncommitted changes are present, and any
    /// outstanding stash
    pub fn tree_state(&self) -> (String, bool, Option<String>) {
        match self.state.lock() {
            Ok(s) => (Self::sha(s.head), s.dirty, s.stash.clone()),
            Err(poisoned) => {
                let s = poisoned.into_inner();
                (Self::sha(s.head), s.dirty, s.stash.clone())
            }
        }
    }

    fn index_of(&self, revision: &str) -> Result<usize, OracleError> {
        revision
            .strip_prefix('c')
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|i| *i < self.compiles.len())
            .ok_or_else(|| OracleError::UnknownRevision(revision.to_string()))
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, SimState>, OracleError> {
        self.state.lock().map_err(|_| OracleError::Command {
            command: "simulated".to_string(),
            code: None,
            stderr: "state lock poisoned".to_string(),
        })
    }
}

#[async_trait]
impl RevisionOracle for SimulatedOracle {
    async fn history(&self, limit: usize) -> Result<Vec<String>, OracleError> {
        let head = self.lock_state()?.head;
        Ok((0..=head).rev().take(limit).map(Self::sha).collect())
    }

    async fn range(&self, good: &str, bad: &str) -> Result<Vec<String>, OracleError> {
        let good = self.index_of(good)?;
        let bad = self.index_of(bad)?;
        Ok((good + 1..=bad).map(Self::sha).collect())
    }

    async fn parent(&self, revision: &str) -> Result<Option<String>, OracleError> {
        let index = self.index_of(revision)?;
        Ok(index.checked_sub(1).map(Self::sha))
    }

    /// Accepts `cN`, and `HEAD` or `main` with an optional `~n` suffix
    async fn resolve(&self, revision: &str) -> Result<String, OracleError> {
        let unknown = || OracleError::UnknownRevision(revision.to_string());
        let (base, back) = match revision.split_once('~') {
            Some((base, n)) => (base, n.parse::<usize>().map_err(|_| unknown())?),
            None => (revision, 0),
        };
        let index = match base {
            "HEAD" | "main" => self.lock_state()?.head,
            sha => self.index_of(sha)?,
        };
        index.checked_sub(back).map(Self::sha).ok_or_else(unknown)
    }

    async fn checkout(&self, revision: &str) -> Result<WorkingTree, OracleError> {
        let index = self.index_of(revision)?;
        if self.unavailable.contains(&index) {
            return Err(OracleError::Command {
                command: format!("git checkout {}", revision),
                code: Some(128),
                stderr: "simulated checkout failure".to_string(),
            });
        }
        let mut state = self.lock_state()?;
        if state.dirty {
            return Err(OracleError::Command {
                command: format!("git checkout {}", revision),
                code: Some(1),
                stderr: "local changes would be overwritten".to_string(),
            });
        }
        state.head = index;
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(WorkingTree {
            revision: revision.to_string(),
        })
    }

    async fn compiles(&self, tree: &WorkingTree) -> Result<bool, OracleError> {
        let index = self.index_of(&tree.revision)?;
        self.compile_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_at == Some(index) {
            panic!("simulated build crash at {}", tree.revision);
        }
        Ok(self.compiles[index])
    }

    async fn snapshot(&self) -> Result<TreeSnapshot, OracleError> {
        let active = self.active_runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_runs.fetch_max(active, Ordering::SeqCst);
        let mut state = self.lock_state()?;
        let stash = if state.dirty {
            state.dirty = false;
            let entry = format!("stash-{}", Self::sha(state.head));
            state.stash = Some(entry.clone());
            Some(entry)
        } else {
            None
        };
        Ok(TreeSnapshot {
            head: Self::sha(state.head),
            branch: Some("main".to_string()),
            stash,
        })
    }

    async fn restore(&self, snapshot: &TreeSnapshot) -> Result<(), OracleError> {
        self.active_runs.fetch_sub(1, Ordering::SeqCst);
        if self.fail_restore {
            return Err(OracleError::Command {
                command: "git checkout main".to_string(),
                code: Some(1),
                stderr: "simulated restore failure".to_string(),
            });
        }
        let head = self.index_of(&snapshot.head)?;
        let mut state = self.lock_state()?;
        state.head = head;
        if snapshot.stash.is_some() && state.stash == snapshot.stash {
            state.stash = None;
            state.dirty = true;
        }
        Ok(())
    }
}
