// src/db/mod.rs
//! Attack path persistence

use crate::attack::AttackAction;
use crate::environment::AccessLevel;
use crate::error::{LabError, Result};
use crate::simulation::SimulationReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;

/// One executed step of an episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub iteration: u32,
    pub action: AttackAction,
    pub success: bool,
    /// Level after the step
    pub access_level: AccessLevel,
    pub message: String,
    pub reward: f64,
    pub discovered_entity: Option<String>,
    pub discovered_vuln: Option<String>,
    pub blocked: bool,
    pub hint_present: bool,
    pub hint_matched: bool,
    pub active_hint: Option<AttackAction>,
}

/// A persisted episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackPathRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<StepRecord>,
    pub final_access_level: AccessLevel,
    pub total_iterations: u32,
    pub successful_attacks: u32,
    pub failed_attacks: u32,
    pub discovered_vulnerabilities: Vec<String>,
    pub score: f64,
}

#[derive(Debug, FromRow)]
struct AttackPathRow {
    id: i64,
    created_at: DateTime<Utc>,
    final_access_level: String,
    total_iterations: i64,
    successful_attacks: i64,
    failed_attacks: i64,
    discovered_vulnerabilities: String,
    attack_path_json: String,
    score: f64,
}

impl TryFrom<AttackPathRow> for AttackPathRecord {
    type Error = LabError;

    fn try_from(row: AttackPathRow) -> Result<Self> {
        let corrupt = |what: &str| LabError::CorruptRecord(format!("path {}: {}", row.id, what));

        let final_access_level = row
            .final_access_level
            .parse::<AccessLevel>()
            .map_err(|_| corrupt(&format!("bad access level {:?}", row.final_access_level)))?;
        let steps: Vec<StepRecord> = serde_json::from_str(&row.attack_path_json)
            .map_err(|e| corrupt(&format!("bad step trace ({})", e)))?;
        let discovered_vulnerabilities: Vec<String> =
            serde_json::from_str(&row.discovered_vulnerabilities)
            .map_err(|e| corrupt(&format!("bad vulnerability list ({})", e)))?;
        let count = |v: i64| u32::try_from(v).map_err(|_| corrupt("negative counter"));

        Ok(Self {
            id: row.id,
            created_at: row.created_at,
            steps,
            final_access_level,
            total_iterations: count(row.total_iterations)?,
            successful_attacks: count(row.successful_attacks)?,
            failed_attacks: count(row.failed_attacks)?,
            discovered_vulnerabilities,
            score: row.score,
        })
    }
}

/// Success and failure totals for one action across all paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ActionTally {
    pub action_type: String,
    pub success_count: i64,
    pub failure_count: i64,
}

/// Aggregate view of the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_paths: i64,
    pub average_score: f64,
    pub max_score: f64,
    pub total_successful_attacks: i64,
    pub total_failed_attacks: i64,
    pub action_statistics: Vec<ActionTally>,
}

fn level_weight(level: AccessLevel) -> f64 {
    match level {
        AccessLevel::None => 0.0,
        AccessLevel::Public => 10.0,
        AccessLevel::Internal => 30.0,
        AccessLevel::Admin => 100.0,
    }
}

/// Score of a finished episode: level weight scaled by the success ratio, plus
/// 5 per vulnerability, minus 0.5 per failure
pub fn calculate_path_score(
    final_level: AccessLevel,
    total_steps: usize,
    successes: u32,
    failures: u32,
    vulnerabilities: usize,
) -> f64 {
    let mut score = level_weight(final_level);
    if total_steps > 0 {
        score *= 1.0 + f64::from(successes) / total_steps as f64;
    }
    score + 5.0 * vulnerabilities as f64 - 0.5 * f64::from(failures)
}

/// SQLite store of completed attack paths
#[derive(Clone)]
pub struct PathStore {
    pool: SqlitePool,
}

impl PathStore {
    /// Open (creating if missing) the database at `url` and ensure the schema exists
    pub async fn connect(url: &str) -> Result<Self> {
        if url.contains(":memory:") {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        // every pooled connection would otherwise get its own empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Close the pool; later operations fail with a storage error
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Initialize database schema
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attack_paths (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at DATETIME NOT NULL,
                final_access_level TEXT NOT NULL,
                total_iterations INTEGER NOT NULL,
                successful_attacks INTEGER NOT NULL,
                failed_attacks INTEGER NOT NULL,
                discovered_vulnerabilities TEXT NOT NULL,
                attack_path_json TEXT NOT NULL,
                score REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS path_statistics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path_id INTEGER NOT NULL,
                action_type TEXT NOT NULL,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (path_id) REFERENCES attack_paths(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_paths_score ON attack_paths(score DESC, id DESC)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stats_path ON path_statistics(path_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Persist an episode and its per-action tallies; returns the new path id.
    ///
    /// `score` overrides the derived score when given.
    pub async fn save(
        &self,
        steps: &[StepRecord],
        final_level: AccessLevel,
        vulnerabilities: &[String],
        score: Option<f64>,
    ) -> Result<i64> {
        let successes = steps.iter().filter(|s| s.success).count() as u32;
        let failures = steps.len() as u32 - successes;
        let score = score.unwrap_or_else(|| {
            calculate_path_score(final_level, steps.len(), successes, failures, vulnerabilities.len())
        });
        if !score.is_finite() {
            return Err(LabError::InvalidInput(format!("path score must be finite, got {}", score)));
        }

        let mut tallies: BTreeMap<&'static str, (i64, i64)> = BTreeMap::new();
        for step in steps {
            let entry = tallies.entry(step.action.as_str()).or_default();
            if step.success {
                entry.0 += 1;
            } else {
                entry.1 += 1;
            }
        }

        let steps_json = serde_json::to_string(steps)?;
        let vulns_json = serde_json::to_string(vulnerabilities)?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO attack_paths (created_at, final_access_level, total_iterations, successful_attacks, failed_attacks, discovered_vulnerabilities, attack_path_json, score)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Utc::now())
        .bind(final_level.as_str())
        .bind(steps.len() as i64)
        .bind(i64::from(successes))
        .bind(i64::from(failures))
        .bind(&vulns_json)
        .bind(&steps_json)
        .bind(score)
        .execute(&mut *tx)
        .await?;
        let path_id = inserted.last_insert_rowid();

        for (action, (success_count, failure_count)) in &tallies {
            sqlx::query(
                "INSERT INTO path_statistics (path_id, action_type, success_count, failure_count)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(path_id)
            .bind(*action)
            .bind(*success_count)
            .bind(*failure_count)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(path_id = path_id, score = score, steps = steps.len(), "saved attack path");
        Ok(path_id)
    }

    /// Persist the trace of a finished simulation
    pub async fn save_report(&self, report: &SimulationReport) -> Result<i64> {
        self.save(
            &report.attack_path,
            report.final_access_level,
            &report.discovered_vulnerabilities,
            None,
        )
        .await
    }

    /// Highest-scoring path; the newest wins a tie
    pub async fn best_path(&self) -> Result<Option<AttackPathRecord>> {
        sqlx::query_as::<_, AttackPathRow>(
            "SELECT * FROM attack_paths ORDER BY score DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?
        .map(AttackPathRecord::try_from)
        .transpose()
    }

    pub async fn list_paths(&self, limit: u32) -> Result<Vec<AttackPathRecord>> {
        sqlx::query_as::<_, AttackPathRow>(
            "SELECT * FROM attack_paths ORDER BY score DESC, id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(AttackPathRecord::try_from)
        .collect()
    }

    pub async fn path_by_id(&self, id: i64) -> Result<Option<AttackPathRecord>> {
        sqlx::query_as::<_, AttackPathRow>("SELECT * FROM attack_paths WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(AttackPathRecord::try_from)
            .transpose()
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let (total_paths, average_score, max_score, total_successful_attacks, total_failed_attacks): (
            i64,
            Option<f64>,
            Option<f64>,
            i64,
            i64,
        ) = sqlx::query_as(
            "SELECT COUNT(*), AVG(score), MAX(score),
                    COALESCE(SUM(successful_attacks), 0), COALESCE(SUM(failed_attacks), 0)
             FROM attack_paths",
        )
        .fetch_one(&self.pool)
        .await?;

        let action_statistics = sqlx::query_as::<_, ActionTally>(
            "SELECT action_type,
                    SUM(success_count) AS success_count,
                    SUM(failure_count) AS failure_count
             FROM path_statistics
             GROUP BY action_type
             ORDER BY success_count DESC, action_type",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(StoreStats {
            total_paths,
            average_score: average_score.unwrap_or(0.0),
            max_score: max_score.unwrap_or(0.0),
            total_successful_attacks,
            total_failed_attacks,
            action_statistics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(iteration: u32, action: AttackAction, success: bool, level: AccessLevel) -> StepRecord {
        StepRecord {
            iteration,
            action,
            success,
            access_level: level,
            message: if success { "ok".into() } else { "failed".into() },
            reward: if success { 5.0 } else { -2.0 },
            discovered_entity: None,
            discovered_vuln: None,
            blocked: false,
            hint_present: false,
            hint_matched: false,
            active_hint: None,
        }
    }

    fn admin_run() -> (Vec<StepRecord>, Vec<String>) {
        let mut steps: Vec<StepRecord> = (1..=8)
            .map(|i| step(i, AttackAction::SqlInjectionAttempt, true, AccessLevel::Admin))
            .collect();
        steps.push(step(9, AttackAction::XssAttempt, false, AccessLevel::Admin));
        steps.push(step(10, AttackAction::SqlInjectionAttempt, false, AccessLevel::Admin));
        let vulns = vec![
            "SQL Injection".to_string(),
            "Path Traversal".to_string(),
            "Command Injection".to_string(),
        ];
        (steps, vulns)
    }

    #[test]
    fn test_path_score() {
        assert_eq!(calculate_path_score(AccessLevel::Admin, 10, 8, 2, 3), 194.0);
        assert_eq!(calculate_path_score(AccessLevel::None, 0, 0, 0, 0), 0.0);
        assert_eq!(calculate_path_score(AccessLevel::Public, 4, 2, 2, 1), 19.0);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = PathStore::in_memory().await.unwrap();
        assert!(store.best_path().await.unwrap().is_none());
        assert!(store.list_paths(10).await.unwrap().is_empty());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_paths, 0);
        assert_eq!(stats.average_score, 0.0);
        assert!(stats.action_statistics.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = PathStore::in_memory().await.unwrap();
        let (steps, vulns) = admin_run();

        let id = store.save(&steps, AccessLevel::Admin, &vulns, None).await.unwrap();
        let record = store.path_by_id(id).await.unwrap().unwrap();

        assert_eq!(record.score, 194.0);
        assert_eq!(record.final_access_level, AccessLevel::Admin);
        assert_eq!(record.total_iterations, 10);
        assert_eq!(record.successful_attacks, 8);
        assert_eq!(record.failed_attacks, 2);
        assert_eq!(record.steps, steps);
        assert_eq!(record.discovered_vulnerabilities, vulns);
        assert!(store.path_by_id(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ordering_and_ties() {
        let store = PathStore::in_memory().await.unwrap();
        let steps = vec![step(1, AttackAction::PublicAccessAttempt, true, AccessLevel::Public)];

        let low = store.save(&steps, AccessLevel::Public, &[], Some(10.0)).await.unwrap();
        let first_high = store.save(&steps, AccessLevel::Public, &[], Some(50.0)).await.unwrap();
        let second_high = store.save(&steps, AccessLevel::Public, &[], Some(50.0)).await.unwrap();

        let best = store.best_path().await.unwrap().unwrap();
        assert_eq!(best.id, second_high);

        let ids: Vec<i64> = store.list_paths(10).await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second_high, first_high, low]);
        assert_eq!(store.list_paths(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stats_tallies() {
        let store = PathStore::in_memory().await.unwrap();
        let (steps, vulns) = admin_run();
        store.save(&steps, AccessLevel::Admin, &vulns, None).await.unwrap();
        store
            .save(
                &[step(1, AttackAction::XssAttempt, true, AccessLevel::Public)],
                AccessLevel::Public,
                &[],
                Some(6.0),
            )
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_paths, 2);
        assert_eq!(stats.max_score, 194.0);
        assert_eq!(stats.average_score, 100.0);
        assert_eq!(stats.total_successful_attacks, 9);
        assert_eq!(stats.total_failed_attacks, 2);

        let top = &stats.action_statistics[0];
        assert_eq!(top.action_type, "sql_injection_attempt");
        assert_eq!((top.success_count, top.failure_count), (8, 1));
        let xss = &stats.action_statistics[1];
        assert_eq!(xss.action_type, "xss_attempt");
        assert_eq!((xss.success_count, xss.failure_count), (1, 1));
    }

    #[tokio::test]
    async fn test_corrupt_row_is_reported() {
        let store = PathStore::in_memory().await.unwrap();
        sqlx::query(
            "INSERT INTO attack_paths (created_at, final_access_level, total_iterations, successful_attacks, failed_attacks, discovered_vulnerabilities, attack_path_json, score)
             VALUES (?, 'root', 0, 0, 0, '[]', '[]', 1.0)",
        )
        .bind(Utc::now())
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store.best_path().await.unwrap_err();
        assert!(matches!(err, LabError::CorruptRecord(_)));
    }

    #[tokio::test]
    async fn test_non_finite_score_is_rejected() {
        let store = PathStore::in_memory().await.unwrap();
        let steps = vec![step(1, AttackAction::XssAttempt, true, AccessLevel::Public)];

        let err = store
            .save(&steps, AccessLevel::Public, &[], Some(f64::NAN))
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::InvalidInput(_)));
        assert!(err.is_client_error());
        assert!(store
            .save(&steps, AccessLevel::Public, &[], Some(f64::INFINITY))
            .await
            .is_err());
        assert_eq!(store.stats().await.unwrap().total_paths, 0);
    }

    #[tokio::test]
    async fn test_failed_tally_insert_rolls_back_path() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("paths.db").display());
        let store = PathStore::connect(&url).await.unwrap();

        let side = SqlitePool::connect(&url).await.unwrap();
        sqlx::query("DROP TABLE path_statistics")
            .execute(&side)
            .await
            .unwrap();
        side.close().await;

        let (steps, vulns) = admin_run();
        let err = store
            .save(&steps, AccessLevel::Admin, &vulns, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::Storage(_)));

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attack_paths")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert!(store.best_path().await.unwrap().is_none());
    }
}
