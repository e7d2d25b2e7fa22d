//! Ambient persistence: configuration history and the durable state that
//! lets quota usage and historical back-fill progress survive a restart.
//! Deliberately a separate `SqlitePool` from [`cache::CacheStore`]'s own —
//! see DESIGN.md for why that's an acceptable simplification here.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use loader::{LoadingId, LoadingState, Progress};
use quota::QuotaSnapshot;

pub struct Persistence {
    pool: SqlitePool,
}

impl Persistence {
    pub async fn connect(db_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let persistence = Self { pool };
        persistence.init_tables().await?;
        Ok(persistence)
    }

    pub async fn connect_in_memory() -> anyhow::Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn init_tables(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS configurations (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                changed_at TEXT NOT NULL,
                key TEXT NOT NULL,
                old_value TEXT,
                new_value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quota_snapshots (
                provider TEXT PRIMARY KEY,
                daily_used INTEGER NOT NULL,
                monthly_used INTEGER NOT NULL,
                day_reset_at TEXT NOT NULL,
                month_reset_at TEXT NOT NULL,
                last_request_at TEXT,
                snapshotted_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS loading_progress (
                loading_id INTEGER PRIMARY KEY,
                state TEXT NOT NULL,
                total_chunks INTEGER NOT NULL,
                completed INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                bytes INTEGER NOT NULL,
                eta TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upserts `key` and appends the change to `config_audit`, carrying the
    /// value that was replaced (if any).
    pub async fn set_config(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let old_value: Option<String> = sqlx::query("SELECT value FROM configurations WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row.get("value"));

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO configurations (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO config_audit (changed_at, key, old_value, new_value) VALUES (?, ?, ?, ?)",
        )
        .bind(&now)
        .bind(key)
        .bind(&old_value)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_config(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM configurations WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn config_audit_history(&self, key: &str) -> anyhow::Result<Vec<(DateTime<Utc>, Option<String>, String)>> {
        let rows = sqlx::query(
            "SELECT changed_at, old_value, new_value FROM config_audit WHERE key = ? ORDER BY id ASC",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let changed_at: String = row.get("changed_at");
                Ok((
                    DateTime::parse_from_rfc3339(&changed_at)?.with_timezone(&Utc),
                    row.get("old_value"),
                    row.get("new_value"),
                ))
            })
            .collect()
    }

    pub async fn save_quota_snapshot(&self, snapshot: &QuotaSnapshot) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quota_snapshots
                (provider, daily_used, monthly_used, day_reset_at, month_reset_at, last_request_at, snapshotted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(provider) DO UPDATE SET
                daily_used = excluded.daily_used,
                monthly_used = excluded.monthly_used,
                day_reset_at = excluded.day_reset_at,
                month_reset_at = excluded.month_reset_at,
                last_request_at = excluded.last_request_at,
                snapshotted_at = excluded.snapshotted_at
            "#,
        )
        .bind(&snapshot.provider)
        .bind(snapshot.daily_used as i64)
        .bind(snapshot.monthly_used as i64)
        .bind(snapshot.day_reset_at.to_rfc3339())
        .bind(snapshot.month_reset_at.to_rfc3339())
        .bind(snapshot.last_request_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_quota_snapshots(&self) -> anyhow::Result<Vec<QuotaSnapshot>> {
        let rows = sqlx::query("SELECT * FROM quota_snapshots").fetch_all(&self.pool).await?;
        rows.iter().map(row_to_snapshot).collect()
    }

    pub async fn save_loading_progress(&self, id: LoadingId, progress: &Progress) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO loading_progress
                (loading_id, state, total_chunks, completed, failed, bytes, eta, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(loading_id) DO UPDATE SET
                state = excluded.state,
                total_chunks = excluded.total_chunks,
                completed = excluded.completed,
                failed = excluded.failed,
                bytes = excluded.bytes,
                eta = excluded.eta,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id.0 as i64)
        .bind(state_str(progress.state))
        .bind(progress.total_chunks as i64)
        .bind(progress.completed as i64)
        .bind(progress.failed as i64)
        .bind(progress.bytes as i64)
        .bind(progress.eta.map(|e| e.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_snapshot(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<QuotaSnapshot> {
    let day_reset_at: String = row.get("day_reset_at");
    let month_reset_at: String = row.get("month_reset_at");
    let last_request_at: Option<String> = row.get("last_request_at");
    Ok(QuotaSnapshot {
        provider: row.get("provider"),
        daily_used: row.get::<i64, _>("daily_used") as u32,
        monthly_used: row.get::<i64, _>("monthly_used") as u32,
        day_reset_at: DateTime::parse_from_rfc3339(&day_reset_at)?.with_timezone(&Utc),
        month_reset_at: DateTime::parse_from_rfc3339(&month_reset_at)?.with_timezone(&Utc),
        last_request_at: last_request_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()?,
    })
}

fn state_str(state: LoadingState) -> &'static str {
    match state {
        LoadingState::Running => "running",
        LoadingState::Paused => "paused",
        LoadingState::Completed => "completed",
        LoadingState::CompletedWithErrors => "completed_with_errors",
        LoadingState::Cancelled => "cancelled",
    }
}
