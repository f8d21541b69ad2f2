//! Call history persistence.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::info;
use uuid::Uuid;

/// One finished call, as persisted.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub caller_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub cost_cents: f64,
    /// JSON array of `{role, text}` lines.
    pub transcript: serde_json::Value,
    /// Agent names that served the call, in activation order.
    pub agents_used: Vec<String>,
    pub logs: String,
}

/// Store for the `calls` table.
#[derive(Clone)]
pub struct CallLogStore {
    pool: SqlitePool,
}

impl CallLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        CallLogStore { pool }
    }

    /// Persist one finished call.
    pub async fn record(&self, record: &CallRecord) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let duration = (record.ended_at - record.started_at).num_seconds().max(0);

        sqlx::query(
            "INSERT INTO calls
                (id, caller_id, started_at, ended_at, duration_seconds,
                 cost_cents, agents_used, transcript, logs)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&record.caller_id)
        .bind(record.started_at.to_rfc3339())
        .bind(record.ended_at.to_rfc3339())
        .bind(duration)
        .bind(record.cost_cents)
        .bind(serde_json::to_string(&record.agents_used)?)
        .bind(serde_json::to_string(&record.transcript)?)
        .bind(&record.logs)
        .execute(&self.pool)
        .await?;

        info!(
            "call persisted: {} ({}s, {:.2} ct)",
            record.caller_id, duration, record.cost_cents
        );
        Ok(id)
    }

    /// Number of persisted calls (dashboard statistics).
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM calls")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("cnt"))
    }
}
