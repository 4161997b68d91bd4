//! PostgreSQL audit log implementation.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::error::{ControlError, ControlResult};
use crate::types::{AuditEntry, AuditOutcome};

use super::AuditLog;

/// PostgreSQL-backed audit log.
#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    /// Connect to PostgreSQL and create a new audit log.
    ///
    /// The audit table is created if it doesn't exist.
    pub async fn new(url: &str, max_connections: u32) -> ControlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Create an audit log from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> ControlResult<Self> {
        let log = Self { pool };
        log.ensure_schema().await?;
        Ok(log)
    }

    async fn ensure_schema(&self) -> ControlResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id BIGSERIAL PRIMARY KEY,
                timestamp TIMESTAMPTZ NOT NULL,
                actor TEXT NOT NULL,
                app TEXT NOT NULL,
                action TEXT NOT NULL,
                detail TEXT NOT NULL,
                outcome TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_audit_log_app
            ON audit_log (app, id DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> ControlResult<AuditEntry> {
        let outcome: String = row.get("outcome");
        let outcome: AuditOutcome = outcome.parse().map_err(ControlError::audit)?;

        Ok(AuditEntry {
            timestamp: row.get("timestamp"),
            actor: row.get("actor"),
            app: row.get("app"),
            action: row.get("action"),
            detail: row.get("detail"),
            outcome,
        })
    }
}

#[async_trait]
impl AuditLog for PostgresAuditLog {
    async fn append(&self, entry: AuditEntry) -> ControlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (timestamp, actor, app, action, detail, outcome)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.timestamp)
        .bind(&entry.actor)
        .bind(&entry.app)
        .bind(&entry.action)
        .bind(&entry.detail)
        .bind(entry.outcome.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| ControlError::audit(e.to_string()))?;

        Ok(())
    }

    async fn history(&self, app: &str, limit: usize) -> ControlResult<Vec<AuditEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT timestamp, actor, app, action, detail, outcome
            FROM audit_log
            WHERE app = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(app)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }
}
