//! Fault locator - finds the commit that broke the build
//!
//! A run walks recent history for a commit that still builds, bisects
//! between it and HEAD, then checks the parent of the candidate. The working
//! tree is snapshotted before the first checkout and restored on every exit
//! path, including a panic inside the oracle.

use futures::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::oracle::RevisionOracle;
use crate::error::LocatorError;

/// Commits examined by the linear search, HEAD included
pub const DEFAULT_MAX_HISTORY_SEARCH: usize = 10;
/// Cap on bisection probes
pub const DEFAULT_MAX_BISECT_ATTEMPTS: usize = 50;
/// Retry interval while another process holds the worktree lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatorSettings {
    pub max_history_search: usize,
    pub max_bisect_attempts: usize,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            max_history_search: DEFAULT_MAX_HISTORY_SEARCH,
            max_bisect_attempts: DEFAULT_MAX_BISECT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocatorState {
    SearchingLastGood,
    Bisecting,
    Verifying,
    Found,
    Inconclusive,
}

impl std::fmt::Display for LocatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocatorState::SearchingLastGood => write!(f, "SEARCHING_LAST_GOOD"),
            LocatorState::Bisecting => write!(f, "BISECTING"),
            LocatorState::Verifying => write!(f, "VERIFYING"),
            LocatorState::Found => write!(f, "FOUND"),
            LocatorState::Inconclusive => write!(f, "INCONCLUSIVE"),
        }
    }
}

/// Outcome of a locator run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocatorReport {
    pub success: bool,
    pub faulty_commit: Option<String>,
    pub verified: bool,
    pub error: Option<String>,
    pub good_revision: Option<String>,
    pub oracle_calls: usize,
    pub bisect_steps: usize,
    pub state: LocatorState,
}

/// Cooperative cancellation for an in-flight run
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Reason a run stopped without a result
#[derive(Debug)]
struct Halt(String);

/// Mutable state of one run
struct Run<'a> {
    oracle: &'a dyn RevisionOracle,
    cancel: &'a CancelHandle,
    /// sha -> compiles; `None` records an unavailable revision
    cache: HashMap<String, Option<bool>>,
    oracle_calls: usize,
    bisect_steps: usize,
    state: LocatorState,
    good_revision: Option<String>,
}

impl<'a> Run<'a> {
    fn new(oracle: &'a dyn RevisionOracle, cancel: &'a CancelHandle) -> Self {
        Self {
            oracle,
            cancel,
            cache: HashMap::new(),
            oracle_calls: 0,
            bisect_steps: 0,
            state: LocatorState::SearchingLastGood,
            good_revision: None,
        }
    }

    fn enter(&mut self, state: LocatorState) {
        debug!(from = %self.state, to = %state, "Locator state change");
        self.state = state;
    }

    /// Whether `sha` builds. `Ok(None)` means the revision could not be
    /// checked out or built and should be skipped.
    async fn probe(&mut self, sha: &str) -> Result<Option<bool>, Halt> {
        if let Some(known) = self.cache.get(sha) {
            return Ok(*known);
        }
        if self.cancel.is_cancelled() {
            return Err(Halt("Fault analysis cancelled".to_string()));
        }

        let result = match self.oracle.checkout(sha).await {
            Ok(tree) => {
                self.oracle_calls += 1;
                match self.oracle.compiles(&tree).await {
                    Ok(compiles) => Some(compiles),
                    Err(e) => {
                        warn!(sha, error = %e, "Build could not run, skipping revision");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(sha, error = %e, "Checkout failed, skipping revision");
                None
            }
        };

        debug!(sha, compiles = ?result, calls = self.oracle_calls, "Probed revision");
        self.cache.insert(sha.to_string(), result);
        Ok(result)
    }

    /// Newest commit below HEAD that builds, within the search window
    async fn search_last_good(&mut self, window: usize) -> Result<(String, String), Halt> {
        let history = self
            .oracle
            .history(window)
            .await
            .map_err(|e| Halt(format!("Could not read history: {}", e)))?;
        let (head, candidates) = history
            .split_first()
            .ok_or_else(|| Halt("Repository has no commits".to_string()))?;

        for candidate in candidates {
            if self.probe(candidate).await? == Some(true) {
                info!(sha = %candidate, "Found last good commit");
                return Ok((candidate.clone(), head.clone()));
            }
        }

        Err(Halt(format!(
            "No compiling commit in the last {} commits",
            history.len()
        )))
    }

    /// Binary search over `good..=bad`. `commits[0]` builds and the last
    /// element does not; that invariant holds for `lo` and `hi` throughout.
    async fn bisect(&mut self, good: &str, bad: &str, max_attempts: usize) -> Result<String, Halt> {
        let range = self
            .oracle
            .range(good, bad)
            .await
            .map_err(|e| Halt(format!("Could not list commits {}..{}: {}", good, bad, e)))?;
        if range.is_empty() {
            return Err(Halt(format!("No commits between {} and {}", good, bad)));
        }

        let mut commits = Vec::with_capacity(range.len() + 1);
        commits.push(good.to_string());
        commits.extend(range);

        let mut lo = 0;
        let mut hi = commits.len() - 1;

        while hi - lo > 1 {
            let mut probed = None;
            for index in probe_order(lo, hi) {
                if self.bisect_steps >= max_attempts {
                    return Err(Halt(format!(
                        "Bisection did not converge within {} steps",
                        max_attempts
                    )));
                }
                self.bisect_steps += 1;

                if let Some(compiles) = self.probe(&commits[index]).await? {
                    probed = Some((index, compiles));
                    break;
                }
            }

            match probed {
                Some((index, true)) => lo = index,
                Some((index, false)) => hi = index,
                None => {
                    return Err(Halt(format!(
                        "Every commit between {} and {} is unavailable",
                        commits[lo], commits[hi]
                    )))
                }
            }
            debug!(good = %commits[lo], bad = %commits[hi], step = self.bisect_steps, "Narrowed range");
        }

        Ok(commits[hi].clone())
    }

    /// Whether the parent of `candidate` builds
    async fn verify(&mut self, candidate: &str) -> Result<bool, Halt> {
        let parent = match self.oracle.parent(candidate).await {
            Ok(Some(p)) => p,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(sha = candidate, error = %e, "Could not resolve parent");
                return Ok(false);
            }
        };
        Ok(self.probe(&parent).await? == Some(true))
    }

    fn report(&self, outcome: Result<(String, bool), Halt>) -> LocatorReport {
        let (success, faulty_commit, verified, error, state) = match outcome {
            Ok((commit, verified)) => (true, Some(commit), verified, None, LocatorState::Found),
            Err(Halt(reason)) => (false, None, false, Some(reason), LocatorState::Inconclusive),
        };
        LocatorReport {
            success,
            faulty_commit,
            verified,
            error,
            good_revision: self.good_revision.clone(),
            oracle_calls: self.oracle_calls,
            bisect_steps: self.bisect_steps,
            state,
        }
    }
}

/// Interior indices of `(lo, hi)` ordered by distance from the midpoint
fn probe_order(lo: usize, hi: usize) -> Vec<usize> {
    let mid = lo + (hi - lo) / 2;
    let mut order = vec![mid];
    for offset in 1..(hi - lo) {
        if mid >= offset && mid - offset > lo {
            order.push(mid - offset);
        }
        if mid + offset < hi {
            order.push(mid + offset);
        }
    }
    order
}

pub struct FaultLocator {
    oracle: Arc<dyn RevisionOracle>,
    settings: LocatorSettings,
    worktree: Arc<Mutex<()>>,
    lock_file: Option<PathBuf>,
}

impl FaultLocator {
    pub fn new(oracle: Arc<dyn RevisionOracle>, settings: LocatorSettings) -> Self {
        Self {
            oracle,
            settings,
            worktree: Arc::new(Mutex::new(())),
            lock_file: None,
        }
    }

    /// Also take an exclusive lock on `path` for the whole run, so locators
    /// in other processes on the same checkout wait their turn
    pub fn with_lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_file = Some(path.into());
        self
    }

    /// Share a working-tree lock with other locators on the same checkout
    pub fn with_worktree_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.worktree = lock;
        self
    }

    pub fn worktree_lock(&self) -> Arc<Mutex<()>> {
        self.worktree.clone()
    }

    pub fn settings(&self) -> LocatorSettings {
        self.settings
    }

    /// Search for the last good commit, then bisect
    pub async fn run(&self) -> Result<LocatorReport, LocatorError> {
        self.run_with(None, &CancelHandle::new()).await
    }

    /// Bisect from a known good commit, skipping the linear search
    pub async fn run_from(&self, good: &str) -> Result<LocatorReport, LocatorError> {
        self.run_with(Some(good), &CancelHandle::new()).await
    }

    /// Full run with an explicit start commit and cancellation handle.
    ///
    /// Only a failed snapshot or a failed restore is an `Err`; every other
    /// failure is an inconclusive report.
    pub async fn run_with(
        &self,
        good: Option<&str>,
        cancel: &CancelHandle,
    ) -> Result<LocatorReport, LocatorError> {
        let span = info_span!("fault_locator", run_id = %uuid::Uuid::new_v4());
        async {
            let _tree = self.worktree.lock().await;

            let mut file_lock = self.lock_file.as_deref().map(open_lock_file).transpose()?;
            let _held = match (file_lock.as_mut(), self.lock_file.as_deref()) {
                (Some(lock), Some(path)) => {
                    let mut waiting = false;
                    Some(loop {
                        match lock.try_write() {
                            Ok(guard) => break guard,
                            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                                if !waiting {
                                    info!(lock = %path.display(), "Working tree busy, waiting for another run");
                                    waiting = true;
                                }
                                tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                            }
                            Err(source) => {
                                return Err(LocatorError::WorktreeLock {
                                    path: path.to_path_buf(),
                                    source,
                                })
                            }
                        }
                    })
                }
                _ => None,
            };

            let snapshot = self.oracle.snapshot().await.map_err(LocatorError::Snapshot)?;
            info!(head = %snapshot.head, branch = ?snapshot.branch, "Starting fault analysis");

            let mut run = Run::new(self.oracle.as_ref(), cancel);
            let outcome = AssertUnwindSafe(self.drive(&mut run, good))
                .catch_unwind()
                .await;

            let report = match outcome {
                Ok(result) => run.report(result),
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(%reason, "Fault analysis panicked");
                    run.report(Err(Halt(format!("Fault analysis panicked: {}", reason))))
                }
            };

            if let Err(e) = self.oracle.restore(&snapshot).await {
                error!(error = %e, head = %snapshot.head, "Working tree restoration failed");
                return Err(LocatorError::RestorationFailure(e.to_string()));
            }

            match &report.faulty_commit {
                Some(commit) => info!(
                    sha = %commit,
                    verified = report.verified,
                    calls = report.oracle_calls,
                    "Fault analysis finished"
                ),
                None => warn!(
                    reason = report.error.as_deref().unwrap_or(""),
                    calls = report.oracle_calls,
                    "Fault analysis inconclusive"
                ),
            }
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, run: &mut Run<'_>, good: Option<&str>) -> Result<(String, bool), Halt> {
        let (good, bad) = match good {
            Some(name) => {
                // Relative names like HEAD~4 move once the first checkout does
                let good = self
                    .oracle
                    .resolve(name)
                    .await
                    .map_err(|e| Halt(format!("Start commit {} is unavailable: {}", name, e)))?;
                let head = self
                    .oracle
                    .history(1)
                    .await
                    .map_err(|e| Halt(format!("Could not read HEAD: {}", e)))?
                    .into_iter()
                    .next()
                    .ok_or_else(|| Halt("Repository has no commits".to_string()))?;
                match run.probe(&good).await? {
                    Some(true) => (good, head),
                    Some(false) => return Err(Halt(format!("Start commit {} does not compile", good))),
                    None => return Err(Halt(format!("Start commit {} is unavailable", good))),
                }
            }
            None => run.search_last_good(self.settings.max_history_search).await?,
        };
        run.good_revision = Some(good.clone());

        run.enter(LocatorState::Bisecting);
        let candidate = run
            .bisect(&good, &bad, self.settings.max_bisect_attempts)
            .await?;

        run.enter(LocatorState::Verifying);
        let verified = run.verify(&candidate).await?;
        if !verified {
            warn!(sha = %candidate, "Parent of candidate does not build, result unverified");
        }
        Ok((candidate, verified))
    }

    /// Run on a background task; the handle yields the typed result
    pub fn spawn(self: &Arc<Self>, good: Option<String>) -> FaultAnalysisTask {
        let cancel = CancelHandle::new();
        let locator = Arc::clone(self);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            locator.run_with(good.as_deref(), &task_cancel).await
        });
        FaultAnalysisTask { handle, cancel }
    }
}

/// A locator run on its own task
pub struct FaultAnalysisTask {
    handle: JoinHandle<Result<LocatorReport, LocatorError>>,
    cancel: CancelHandle,
}

impl FaultAnalysisTask {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub async fn join(self) -> Result<LocatorReport, LocatorError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(LocatorError::TaskAborted(e.to_string())),
        }
    }
}

fn open_lock_file(path: &Path) -> Result<fd_lock::RwLock<File>, LocatorError> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .read(true)
        .open(path)
        .map(fd_lock::RwLock::new)
        .map_err(|source| LocatorError::WorktreeLock {
            path: path.to_path_buf(),
            source,
        })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::locator::oracle::{MockRevisionOracle, TreeSnapshot, WorkingTree};
    use crate::locator::simulated::SimulatedOracle;

    fn locator(oracle: Arc<SimulatedOracle>) -> FaultLocator {
        FaultLocator::new(oracle, LocatorSettings::default())
    }

    #[test]
    fn test_probe_order_fans_out_from_midpoint() {
        assert_eq!(probe_order(0, 2), vec![1]);
        assert_eq!(probe_order(0, 6), vec![3, 2, 4, 1, 5]);
        assert_eq!(probe_order(4, 9), vec![6, 5, 7, 8]);
    }

    #[tokio::test]
    async fn test_five_commit_chain() {
        let oracle = Arc::new(SimulatedOracle::from_flags(&[true, true, true, false, false]));
        let report = locator(oracle.clone()).run().await.unwrap();

        assert!(report.success);
        assert_eq!(report.faulty_commit.as_deref(), Some("c3"));
        assert!(report.verified);
        assert_eq!(report.state, LocatorState::Found);
        assert!(oracle.compile_calls() <= 3);
        assert_eq!(report.oracle_calls, oracle.compile_calls());
    }

    #[tokio::test]
    async fn test_no_good_commit_is_inconclusive() {
        let oracle = Arc::new(SimulatedOracle::from_flags(&[false; 4]));
        let report = locator(oracle.clone()).run().await.unwrap();
        assert!(!report.success);
        assert_eq!(report.state, LocatorState::Inconclusive);
        assert!(report.error.unwrap().contains("No compiling commit"));
        assert_eq!(oracle.tree_state().0, "c3");
    }

    #[tokio::test]
    async fn test_window_excludes_older_commits() {
        // only c0 builds, but the window is HEAD plus 9 candidates
        let oracle = Arc::new(SimulatedOracle::with_regression_at(12, 1));
        let report = locator(oracle.clone()).run().await.unwrap();
        assert!(!report.success);
        assert_eq!(oracle.compile_calls(), 9);
    }

    #[tokio::test]
    async fn test_unavailable_midpoint_is_skipped() {
        let oracle = Arc::new(SimulatedOracle::with_regression_at(16, 9).with_unavailable([7]));
        let report = locator(oracle.clone()).run_from("c0").await.unwrap();
        assert_eq!(report.faulty_commit.as_deref(), Some("c9"));
        assert!(report.verified);
    }

    #[tokio::test]
    async fn test_unbuildable_parent_leaves_result_unverified() {
        // merge history: first parent of the candidate is off the bisected path
        let mut mock = MockRevisionOracle::new();
        mock.expect_snapshot().returning(|| {
            Ok(TreeSnapshot {
                head: "c".to_string(),
                branch: None,
                stash: None,
            })
        });
        mock.expect_history().returning(|_| {
            Ok(vec!["c".to_string(), "b".to_string(), "a".to_string()])
        });
        mock.expect_range()
            .returning(|_, _| Ok(vec!["b".to_string(), "c".to_string()]));
        mock.expect_parent()
            .returning(|_| Ok(Some("x".to_string())));
        mock.expect_checkout().returning(|rev| {
            Ok(WorkingTree {
                revision: rev.to_string(),
            })
        });
        mock.expect_compiles()
            .times(3)
            .returning(|tree| Ok(tree.revision == "a"));
        mock.expect_restore().times(1).returning(|_| Ok(()));

        let locator = FaultLocator::new(Arc::new(mock), LocatorSettings::default());
        let report = locator.run().await.unwrap();
        assert!(report.success);
        assert_eq!(report.faulty_commit.as_deref(), Some("b"));
        assert!(!report.verified);
    }

    #[tokio::test]
    async fn test_all_interior_unavailable_is_inconclusive() {
        let oracle = Arc::new(SimulatedOracle::with_regression_at(5, 2).with_unavailable([1, 2, 3]));
        let report = locator(oracle).run_from("c0").await.unwrap();
        assert!(!report.success);
        assert!(report.error.unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_bisect_step_cap() {
        let oracle = Arc::new(SimulatedOracle::with_regression_at(64, 40));
        let settings = LocatorSettings {
            max_history_search: 10,
            max_bisect_attempts: 2,
        };
        let report = FaultLocator::new(oracle, settings).run_from("c0").await.unwrap();
        assert!(!report.success);
        assert_eq!(report.bisect_steps, 2);
        assert!(report.error.unwrap().contains("did not converge"));
    }

    #[tokio::test]
    async fn test_bad_start_commit() {
        let oracle = Arc::new(SimulatedOracle::with_regression_at(5, 2));
        let report = locator(oracle).run_from("c3").await.unwrap();
        assert!(!report.success);
        assert!(report.error.unwrap().contains("does not compile"));
    }

    #[tokio::test]
    async fn test_relative_start_is_resolved_before_checkout() {
        let oracle = Arc::new(SimulatedOracle::with_regression_at(8, 6));
        let report = locator(oracle.clone()).run_from("HEAD~4").await.unwrap();
        assert!(report.success);
        assert_eq!(report.good_revision.as_deref(), Some("c3"));
        assert_eq!(report.faulty_commit.as_deref(), Some("c6"));
        assert_eq!(oracle.tree_state().0, "c7");

        let report = locator(oracle).run_from("release-1").await.unwrap();
        assert!(!report.success);
        assert!(report.error.unwrap().contains("release-1 is unavailable"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lock_file_serializes_separate_locators() {
        let dir = tempfile::TempDir::new().unwrap();
        let lock = dir.path().join("worktree.lock");
        let oracle = Arc::new(
            SimulatedOracle::with_regression_at(12, 7).with_build_delay(Duration::from_millis(5)),
        );

        // Separate locators, so the in-process mutex is not shared
        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let locator = FaultLocator::new(oracle.clone(), LocatorSettings::default())
                    .with_lock_file(&lock);
                Arc::new(locator).spawn(Some("c0".to_string()))
            })
            .collect();
        for task in tasks {
            let report = task.join().await.unwrap();
            assert_eq!(report.faulty_commit.as_deref(), Some("c7"));
        }

        assert_eq!(oracle.max_concurrent_runs(), 1);
        assert_eq!(oracle.tree_state().0, "c11");
    }

    #[tokio::test]
    async fn test_unopenable_lock_file_is_an_error() {
        let oracle = Arc::new(SimulatedOracle::with_regression_at(4, 2));
        let locator = locator(oracle.clone()).with_lock_file("/nonexistent/build-sentinel/x.lock");
        let err = locator.run().await.unwrap_err();
        assert!(matches!(err, LocatorError::WorktreeLock { .. }));
        assert_eq!(oracle.checkouts(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_restores_tree() {
        let oracle = Arc::new(SimulatedOracle::with_regression_at(8, 5));
        let cancel = CancelHandle::new();
        cancel.cancel();
        let report = locator(oracle.clone()).run_with(None, &cancel).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.oracle_calls, 0);
        assert_eq!(oracle.tree_state().0, "c7");
    }

    #[tokio::test]
    async fn test_panic_in_oracle_is_inconclusive_and_restored() {
        let oracle = Arc::new(
            SimulatedOracle::with_regression_at(6, 3)
                .with_dirty_tree()
                .with_panic_at(4),
        );
        let report = locator(oracle.clone()).run().await.unwrap();
        assert!(!report.success);
        assert!(report.error.unwrap().contains("panicked"));
        assert_eq!(oracle.tree_state(), ("c5".to_string(), true, None));
    }

    #[tokio::test]
    async fn test_failed_restore_is_an_error() {
        let oracle = Arc::new(SimulatedOracle::with_regression_at(5, 3).with_failing_restore());
        let err = locator(oracle).run().await.unwrap_err();
        assert!(matches!(err, LocatorError::RestorationFailure(_)));
    }

    #[tokio::test]
    async fn test_restore_failure_reported_even_after_found() {
        let mut mock = MockRevisionOracle::new();
        mock.expect_snapshot().returning(|| {
            Ok(TreeSnapshot {
                head: "b".to_string(),
                branch: Some("main".to_string()),
                stash: None,
            })
        });
        mock.expect_history()
            .returning(|_| Ok(vec!["b".to_string(), "a".to_string()]));
        mock.expect_range()
            .returning(|_, _| Ok(vec!["b".to_string()]));
        mock.expect_parent()
            .returning(|_| Ok(Some("a".to_string())));
        mock.expect_checkout().returning(|rev| {
            Ok(WorkingTree {
                revision: rev.to_string(),
            })
        });
        mock.expect_compiles()
            .times(1)
            .returning(|tree| Ok(tree.revision == "a"));
        mock.expect_restore().times(1).returning(|_| {
            Err(OracleError::Command {
                command: "git checkout main".to_string(),
                code: Some(1),
                stderr: "index.lock exists".to_string(),
            })
        });

        let locator = FaultLocator::new(Arc::new(mock), LocatorSettings::default());
        let err = locator.run().await.unwrap_err();
        assert!(matches!(err, LocatorError::RestorationFailure(msg) if msg.contains("index.lock")));
    }

    #[tokio::test]
    async fn test_snapshot_failure_touches_nothing() {
        let mut mock = MockRevisionOracle::new();
        mock.expect_snapshot().returning(|| {
            Err(OracleError::Spawn {
                command: "git rev-parse HEAD".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "git"),
            })
        });
        mock.expect_checkout().never();
        mock.expect_restore().never();

        let locator = FaultLocator::new(Arc::new(mock), LocatorSettings::default());
        assert!(matches!(locator.run().await, Err(LocatorError::Snapshot(_))));
    }

    #[tokio::test]
    async fn test_spawned_task_returns_report() {
        let oracle = Arc::new(SimulatedOracle::with_regression_at(10, 6));
        let locator = Arc::new(locator(oracle));
        let task = locator.spawn(None);
        let report = task.join().await.unwrap();
        assert_eq!(report.faulty_commit.as_deref(), Some("c6"));
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_serialized() {
        let oracle = Arc::new(SimulatedOracle::with_regression_at(10, 6));
        let locator = Arc::new(locator(oracle.clone()));
        let a = locator.spawn(None);
        let b = locator.spawn(Some("c0".to_string()));
        let (ra, rb) = (a.join().await.unwrap(), b.join().await.unwrap());
        assert_eq!(ra.faulty_commit, rb.faulty_commit);
        assert_eq!(oracle.tree_state().0, "c9");
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = LocatorReport {
            success: true,
            faulty_commit: Some("abc".into()),
            verified: true,
            error: None,
            good_revision: Some("def".into()),
            oracle_calls: 2,
            bisect_steps: 1,
            state: LocatorState::Found,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["faultyCommit"], "abc");
        assert_eq!(json["state"], "FOUND");
    }
}
