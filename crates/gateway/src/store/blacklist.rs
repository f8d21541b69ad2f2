//! Caller blacklist, whitelist and the failed-unlock window.
//!
//! Auto-blacklist policy: three failed unlock calls within a rolling
//! twelve-hour window add the caller automatically. Removing a caller
//! from the blacklist also purges their failed-attempt rows, so three
//! fresh failures are needed to re-block them.

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

/// Failed calls within the window that trigger the auto-blacklist.
pub const MAX_FAILED_CALLS: i64 = 3;
/// Rolling window size in hours.
pub const FAILED_CALLS_WINDOW_HOURS: i64 = 12;

/// One blacklist row.
#[derive(Debug, Clone)]
pub struct BlockedCaller {
    pub caller_id: String,
    pub reason: String,
    pub blocked_at: String,
}

/// One whitelist row.
#[derive(Debug, Clone)]
pub struct TrustedCaller {
    pub caller_id: String,
    pub note: String,
    pub added_at: String,
}

/// Access-control store over the shared pool.
#[derive(Clone)]
pub struct BlacklistStore {
    pool: SqlitePool,
}

impl BlacklistStore {
    pub fn new(pool: SqlitePool) -> Self {
        BlacklistStore { pool }
    }

    pub async fn is_blacklisted(&self, caller_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT caller_id FROM blacklist WHERE caller_id = ?")
            .bind(caller_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Add a caller; adding twice keeps a single row.
    pub async fn add(&self, caller_id: &str, reason: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO blacklist (caller_id, reason, blocked_at) VALUES (?, ?, ?)",
        )
        .bind(caller_id)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        warn!("caller blacklisted: {} ({})", caller_id, reason);
        Ok(())
    }

    /// Remove a caller and purge their failed-unlock rows. Returns
    /// whether the caller was actually on the list.
    pub async fn remove(&self, caller_id: &str) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM blacklist WHERE caller_id = ?")
            .bind(caller_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed == 0 {
            return Ok(false);
        }
        sqlx::query("DELETE FROM failed_unlock_calls WHERE caller_id = ?")
            .bind(caller_id)
            .execute(&self.pool)
            .await?;
        info!(
            "caller unblocked, failed-call records purged: {}",
            caller_id
        );
        Ok(true)
    }

    pub async fn all(&self) -> Result<Vec<BlockedCaller>> {
        let rows = sqlx::query(
            "SELECT caller_id, reason, blocked_at FROM blacklist ORDER BY blocked_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| BlockedCaller {
                caller_id: row.get("caller_id"),
                reason: row.get::<Option<String>, _>("reason").unwrap_or_default(),
                blocked_at: row.get::<Option<String>, _>("blocked_at").unwrap_or_default(),
            })
            .collect())
    }

    /// Record one failed unlock call.
    pub async fn record_failed_call(&self, caller_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO failed_unlock_calls (caller_id, failed_at) VALUES (?, ?)")
            .bind(caller_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        info!("failed unlock call recorded: {}", caller_id);
        Ok(())
    }

    /// Auto-blacklist check: true when the caller was just blocked.
    pub async fn check_and_auto_blacklist(&self, caller_id: &str) -> Result<bool> {
        if self.is_blacklisted(caller_id).await? {
            return Ok(false);
        }

        let cutoff = (Utc::now() - Duration::hours(FAILED_CALLS_WINDOW_HOURS)).to_rfc3339();
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM failed_unlock_calls WHERE caller_id = ? AND failed_at > ?",
        )
        .bind(caller_id)
        .bind(&cutoff)
        .fetch_one(&self.pool)
        .await?
        .get("cnt");

        if count >= MAX_FAILED_CALLS {
            self.add(
                caller_id,
                &format!(
                    "Auto-Blacklist: {} fehlgeschlagene Anrufe in {}h",
                    count, FAILED_CALLS_WINDOW_HOURS
                ),
            )
            .await?;
            return Ok(true);
        }
        Ok(false)
    }

    // ===== Whitelist =====

    pub async fn is_whitelisted(&self, caller_id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT caller_id FROM whitelist WHERE caller_id = ?")
            .bind(caller_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn add_to_whitelist(&self, caller_id: &str, note: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO whitelist (caller_id, note, added_at) VALUES (?, ?, ?)",
        )
        .bind(caller_id)
        .bind(note)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        info!("caller whitelisted: {}", caller_id);
        Ok(())
    }

    pub async fn remove_from_whitelist(&self, caller_id: &str) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM whitelist WHERE caller_id = ?")
            .bind(caller_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    pub async fn all_whitelist(&self) -> Result<Vec<TrustedCaller>> {
        let rows = sqlx::query(
            "SELECT caller_id, note, added_at FROM whitelist ORDER BY added_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| TrustedCaller {
                caller_id: row.get("caller_id"),
                note: row.get::<Option<String>, _>("note").unwrap_or_default(),
                added_at: row.get::<Option<String>, _>("added_at").unwrap_or_default(),
            })
            .collect())
    }
}
