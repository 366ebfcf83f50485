//! Git-backed revision oracle
//!
//! Drives `git` and the configured build command as child processes. Every
//! invocation runs under a timeout and is killed if it overruns.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::oracle::{RevisionOracle, TreeSnapshot, WorkingTree};
use crate::error::OracleError;

/// Default bound on a single git invocation
pub const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on a single build
pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(10);
/// Name of the cross-process worktree lock inside the git dir
pub const WORKTREE_LOCK_FILE: &str = "build-sentinel.lock";

/// Captured output of a finished child process
#[derive(Debug)]
struct CommandOutput {
    status_ok: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// Git oracle configuration
#[derive(Debug, Clone)]
pub struct GitOracleConfig {
    pub repo_dir: PathBuf,
    /// Shell command that builds the tree, run with `sh -c`
    pub build_command: String,
    pub checkout_timeout: Duration,
    pub compile_timeout: Duration,
}

impl GitOracleConfig {
    pub fn new(repo_dir: impl Into<PathBuf>, build_command: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            build_command: build_command.into(),
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
            compile_timeout: DEFAULT_COMPILE_TIMEOUT,
        }
    }
}

pub struct GitOracle {
    config: GitOracleConfig,
}

impl GitOracle {
    pub fn new(config: GitOracleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GitOracleConfig {
        &self.config
    }

    async fn run(
        &self,
        program: &str,
        args: &[&str],
        limit: Duration,
    ) -> Result<CommandOutput, OracleError> {
        let display = format!("{} {}", program, args.join(" "));
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.config.repo_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| OracleError::Spawn {
            command: display.clone(),
            source,
        })?;

        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(OracleError::Spawn {
                    command: display,
                    source,
                })
            }
            Err(_) => {
                return Err(OracleError::Timeout {
                    command: display,
                    secs: limit.as_secs(),
                })
            }
        };

        Ok(CommandOutput {
            status_ok: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run git and require a zero exit status
    async fn git(&self, args: &[&str]) -> Result<String, OracleError> {
        let out = self.run("git", args, self.config.checkout_timeout).await?;
        if !out.status_ok {
            return Err(OracleError::Command {
                command: format!("git {}", args.join(" ")),
                code: out.code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out.stdout)
    }

    /// Run git and only report whether it exited cleanly
    async fn git_status_ok(&self, args: &[&str]) -> Result<(bool, String), OracleError> {
        let out = self.run("git", args, self.config.checkout_timeout).await?;
        Ok((out.status_ok, out.stdout))
    }

    /// Lock file shared by every locator working on this repository. Lives
    /// in the common git dir so linked worktrees agree on it.
    pub async fn lock_path(&self) -> Result<PathBuf, OracleError> {
        let out = self.git(&["rev-parse", "--git-common-dir"]).await?;
        let dir = PathBuf::from(out.trim());
        let dir = if dir.is_absolute() {
            dir
        } else {
            self.config.repo_dir.join(dir)
        };
        Ok(dir.join(WORKTREE_LOCK_FILE))
    }

    async fn head(&self) -> Result<String, OracleError> {
        Ok(self.git(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    /// Discard whatever the previous build left behind. Only safe after the
    /// snapshot has stashed the caller's own changes.
    async fn scrub(&self) -> Result<(), OracleError> {
        self.git(&["reset", "--hard", "--quiet"]).await?;
        self.git(&["clean", "-fd", "--quiet"]).await?;
        Ok(())
    }
}

fn lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

#[async_trait]
impl RevisionOracle for GitOracle {
    async fn history(&self, limit: usize) -> Result<Vec<String>, OracleError> {
        let count = format!("-n{}", limit);
        let out = self.git(&["log", &count, "--format=%H"]).await?;
        Ok(lines(&out))
    }

    async fn range(&self, good: &str, bad: &str) -> Result<Vec<String>, OracleError> {
        let revs = format!("{}..{}", good, bad);
        let out = self
            .git(&["rev-list", "--reverse", "--ancestry-path", &revs])
            .await?;
        Ok(lines(&out))
    }

    async fn parent(&self, revision: &str) -> Result<Option<String>, OracleError> {
        // "<sha> <parent1> <parent2>..."
        let out = self.git(&["rev-list", "--parents", "-n1", revision]).await?;
        Ok(out.split_whitespace().nth(1).map(String::from))
    }

    async fn resolve(&self, revision: &str) -> Result<String, OracleError> {
        let expr = format!("{}^{{commit}}", revision);
        let (ok, out) = self
            .git_status_ok(&["rev-parse", "--verify", "--quiet", &expr])
            .await?;
        let sha = out.trim();
        if !ok || sha.is_empty() {
            return Err(OracleError::UnknownRevision(revision.to_string()));
        }
        Ok(sha.to_string())
    }

    async fn checkout(&self, revision: &str) -> Result<WorkingTree, OracleError> {
        let sha = self.resolve(revision).await?;
        self.scrub().await?;
        self.git(&["checkout", "--quiet", "--detach", &sha]).await?;
        let head = self.head().await?;
        if head != sha {
            return Err(OracleError::Command {
                command: format!("git checkout {}", sha),
                code: None,
                stderr: format!("HEAD is {} after checkout", head),
            });
        }
        debug!(revision, sha = %head, "Checked out revision");
        Ok(WorkingTree { revision: head })
    }

    async fn compiles(&self, tree: &WorkingTree) -> Result<bool, OracleError> {
        let start = Instant::now();
        let result = self
            .run(
                "sh",
                &["-c", &self.config.build_command],
                self.config.compile_timeout,
            )
            .await;

        match result {
            Ok(out) => {
                debug!(
                    sha = %tree.revision,
                    exit_code = ?out.code,
                    duration_ms = %start.elapsed().as_millis(),
                    "Build finished"
                );
                Ok(out.status_ok)
            }
            // An overrunning build counts as a failed build, never a retry
            Err(OracleError::Timeout { secs, .. }) => {
                warn!(sha = %tree.revision, secs, "Build timed out, treating as not compiling");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn snapshot(&self) -> Result<TreeSnapshot, OracleError> {
        let head = self.head().await?;
        let (attached, branch) = self
            .git_status_ok(&["symbolic-ref", "--short", "-q", "HEAD"])
            .await?;
        let branch = attached
            .then(|| branch.trim().to_string())
            .filter(|b| !b.is_empty());

        let dirty = !self.git(&["status", "--porcelain"]).await?.trim().is_empty();
        let stash = if dirty {
            let message = format!("build-sentinel {}", uuid::Uuid::new_v4());
            self.git(&["stash", "push", "--include-untracked", "--quiet", "-m", &message])
                .await?;
            let sha = self.git(&["rev-parse", "stash@{0}"]).await?.trim().to_string();
            info!(stash = %sha, "Stashed uncommitted changes");
            Some(sha)
        } else {
            None
        };

        Ok(TreeSnapshot {
            head,
            branch,
            stash,
        })
    }

    async fn restore(&self, snapshot: &TreeSnapshot) -> Result<(), OracleError> {
        self.scrub().await?;
        match &snapshot.branch {
            Some(branch) => self.git(&["checkout", "--quiet", branch]).await?,
            None => {
                self.git(&["checkout", "--quiet", "--detach", &snapshot.head])
                    .await?
            }
        };

        let head = self.head().await?;
        if head != snapshot.head {
            return Err(OracleError::Command {
                command: "git rev-parse HEAD".to_string(),
                code: None,
                stderr: format!("HEAD is {} after restore, expected {}", head, snapshot.head),
            });
        }

        if let Some(stash) = &snapshot.stash {
            let listing = self.git(&["stash", "list", "--format=%H"]).await?;
            let index = lines(&listing)
                .iter()
                .position(|s| s == stash)
                .ok_or_else(|| OracleError::UnknownRevision(stash.clone()))?;
            let entry = format!("stash@{{{}}}", index);
            self.git(&["stash", "pop", "--index", "--quiet", &entry]).await?;
            info!(stash = %stash, "Restored uncommitted changes");
        }

        Ok(())
    }
}
