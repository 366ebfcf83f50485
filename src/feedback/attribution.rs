//! SQLite-backed PR attribution records
//!
//! Maps each automated fix PR to the error categories it addresses. The
//! outcome column moves from `pending` to a terminal value exactly once.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::FeedbackError;
use crate::types::FixOutcome;

/// One tracked fix PR
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrAttribution {
    pub pr_id: u64,
    pub categories: Vec<String>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub outcome: FixOutcome,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Result of trying to move a record to a terminal outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// This caller performed the transition and owns the learning update
    Claimed(PrAttribution),
    /// Another delivery already resolved it
    AlreadyResolved(FixOutcome),
    /// No record for this PR
    Untracked,
}

pub struct AttributionStore {
    conn: Arc<Mutex<Connection>>,
}

impl AttributionStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, FeedbackError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, FeedbackError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), FeedbackError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pr_attributions (
                pr_id INTEGER PRIMARY KEY,
                title TEXT,
                created_at TEXT NOT NULL,
                outcome TEXT NOT NULL DEFAULT 'pending',
                resolved_at TEXT
            );

            CREATE TABLE IF NOT EXISTS pr_categories (
                pr_id INTEGER NOT NULL,
                category TEXT NOT NULL,
                PRIMARY KEY (pr_id, category),
                FOREIGN KEY (pr_id) REFERENCES pr_attributions(pr_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_pr_attributions_outcome ON pr_attributions(outcome);
        "#,
        )?;
        Ok(())
    }

    /// Start tracking a fix PR. Re-tracking a PR adds categories but never
    /// resets an outcome that has already been recorded.
    pub async fn track(
        &self,
        pr_id: u64,
        categories: &[String],
        title: Option<&str>,
    ) -> Result<PrAttribution, FeedbackError> {
        {
            let mut conn = self.conn.lock().await;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO pr_attributions (pr_id, title, created_at, outcome)
                 VALUES (?1, ?2, ?3, 'pending')",
                params![pr_id as i64, title, Utc::now().to_rfc3339()],
            )?;
            for category in categories {
                tx.execute(
                    "INSERT OR IGNORE INTO pr_categories (pr_id, category) VALUES (?1, ?2)",
                    params![pr_id as i64, category],
                )?;
            }
            tx.commit()?;
        }

        info!(pr = pr_id, categories = ?categories, "Tracking fix PR");
        self.get(pr_id)
            .await?
            .ok_or_else(|| FeedbackError::CorruptRow {
                pr_id,
                reason: "row missing right after insert".to_string(),
            })
    }

    pub async fn get(&self, pr_id: u64) -> Result<Option<PrAttribution>, FeedbackError> {
        let conn = self.conn.lock().await;
        Self::load(&conn, pr_id)
    }

    /// Tracked PRs, newest first, optionally filtered by outcome
    pub async fn list(&self, outcome: Option<FixOutcome>) -> Result<Vec<PrAttribution>, FeedbackError> {
        let conn = self.conn.lock().await;
        let ids: Vec<i64> = match outcome {
            Some(o) => {
                let mut stmt = conn.prepare(
                    "SELECT pr_id FROM pr_attributions WHERE outcome = ?1 ORDER BY created_at DESC, pr_id DESC",
                )?;
                let rows = stmt.query_map(params![o.as_str()], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT pr_id FROM pr_attributions ORDER BY created_at DESC, pr_id DESC",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            }
        };

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(r) = Self::load(&conn, id as u64)? {
                records.push(r);
            }
        }
        Ok(records)
    }

    /// Atomically move a pending record to `outcome`. Only the caller that
    /// gets `Claim::Claimed` may apply learning updates for this PR.
    pub async fn claim_terminal(&self, pr_id: u64, outcome: FixOutcome) -> Result<Claim, FeedbackError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE pr_attributions SET outcome = ?2, resolved_at = ?3
             WHERE pr_id = ?1 AND outcome = 'pending'",
            params![pr_id as i64, outcome.as_str(), Utc::now().to_rfc3339()],
        )?;

        let record = Self::load(&conn, pr_id)?;
        let claim = match (changed, record) {
            (1, Some(r)) => Claim::Claimed(r),
            (_, Some(r)) => Claim::AlreadyResolved(r.outcome),
            (_, None) => Claim::Untracked,
        };
        debug!(pr = pr_id, outcome = %outcome, claim = ?claim_kind(&claim), "Claim attempted");
        Ok(claim)
    }

    /// Hand a claimed record back to `pending` so a redelivery can apply it.
    /// Only reverts if the row still holds the outcome this caller claimed.
    pub async fn release_claim(&self, pr_id: u64, outcome: FixOutcome) -> Result<bool, FeedbackError> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE pr_attributions SET outcome = 'pending', resolved_at = NULL
             WHERE pr_id = ?1 AND outcome = ?2",
            params![pr_id as i64, outcome.as_str()],
        )?;
        debug!(pr = pr_id, outcome = %outcome, released = changed == 1, "Claim released");
        Ok(changed == 1)
    }

    fn load(conn: &Connection, pr_id: u64) -> Result<Option<PrAttribution>, FeedbackError> {
        let row = conn
            .query_row(
                "SELECT title, created_at, outcome, resolved_at FROM pr_attributions WHERE pr_id = ?1",
                params![pr_id as i64],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((title, created_at, outcome, resolved_at)) = row else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT category FROM pr_categories WHERE pr_id = ?1 ORDER BY category")?;
        let categories = stmt
            .query_map(params![pr_id as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let corrupt = |reason: String| FeedbackError::CorruptRow { pr_id, reason };
        let outcome =
            FixOutcome::parse(&outcome).ok_or_else(|| corrupt(format!("unknown outcome '{}'", outcome)))?;
        let created_at = parse_time(&created_at).map_err(corrupt)?;
        let resolved_at = resolved_at.as_deref().map(parse_time).transpose().map_err(corrupt)?;

        Ok(Some(PrAttribution {
            pr_id,
            categories,
            title,
            created_at,
            outcome,
            resolved_at,
        }))
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", s, e))
}

fn claim_kind(claim: &Claim) -> &'static str {
    match claim {
        Claim::Claimed(_) => "claimed",
        Claim::AlreadyResolved(_) => "already_resolved",
        Claim::Untracked => "untracked",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_track_and_get() {
        let store = AttributionStore::open_in_memory().unwrap();
        let r = store
            .track(42, &cats(&["risky:security", "risky:business_logic"]), Some("Fix"))
            .await
            .unwrap();
        assert_eq!(r.outcome, FixOutcome::Pending);
        assert_eq!(r.categories, cats(&["risky:business_logic", "risky:security"]));
        assert!(store.get(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_once() {
        let store = AttributionStore::open_in_memory().unwrap();
        store.track(1, &cats(&["unknown"]), None).await.unwrap();

        let first = store.claim_terminal(1, FixOutcome::Success).await.unwrap();
        assert!(matches!(first, Claim::Claimed(ref r) if r.outcome == FixOutcome::Success));

        let second = store.claim_terminal(1, FixOutcome::Failure).await.unwrap();
        assert_eq!(second, Claim::AlreadyResolved(FixOutcome::Success));

        let missing = store.claim_terminal(99, FixOutcome::Success).await.unwrap();
        assert_eq!(missing, Claim::Untracked);
    }

    #[tokio::test]
    async fn test_released_claim_can_be_claimed_again() {
        let store = AttributionStore::open_in_memory().unwrap();
        store.track(4, &cats(&["a"]), None).await.unwrap();
        store.claim_terminal(4, FixOutcome::Success).await.unwrap();

        // Wrong outcome leaves the row alone
        assert!(!store.release_claim(4, FixOutcome::Failure).await.unwrap());
        assert!(store.release_claim(4, FixOutcome::Success).await.unwrap());

        let r = store.get(4).await.unwrap().unwrap();
        assert_eq!(r.outcome, FixOutcome::Pending);
        assert!(r.resolved_at.is_none());
        let again = store.claim_terminal(4, FixOutcome::Success).await.unwrap();
        assert!(matches!(again, Claim::Claimed(_)));
    }

    #[tokio::test]
    async fn test_retrack_keeps_outcome() {
        let store = AttributionStore::open_in_memory().unwrap();
        store.track(5, &cats(&["a"]), None).await.unwrap();
        store.claim_terminal(5, FixOutcome::Failure).await.unwrap();
        let r = store.track(5, &cats(&["b"]), None).await.unwrap();
        assert_eq!(r.outcome, FixOutcome::Failure);
        assert_eq!(r.categories, cats(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_list_filters_by_outcome() {
        let store = AttributionStore::open_in_memory().unwrap();
        store.track(1, &cats(&["a"]), None).await.unwrap();
        store.track(2, &cats(&["b"]), None).await.unwrap();
        store.claim_terminal(2, FixOutcome::Success).await.unwrap();

        assert_eq!(store.list(None).await.unwrap().len(), 2);
        let pending = store.list(Some(FixOutcome::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].pr_id, 1);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pr_tracking.db");
        {
            let store = AttributionStore::open(&path).await.unwrap();
            store.track(3, &cats(&["safe:formatting"]), Some("t")).await.unwrap();
        }
        let store = AttributionStore::open(&path).await.unwrap();
        let r = store.get(3).await.unwrap().unwrap();
        assert_eq!(r.title.as_deref(), Some("t"));
    }
}
