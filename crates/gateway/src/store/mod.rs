//! SQLite persistence (sqlx, WAL mode).
//!
//! One pool shared by all stores. The schema is created on startup;
//! later additions land as additive column migrations probed with
//! `SELECT col FROM table LIMIT 0`, since there is no `ALTER TABLE IF
//! NOT EXISTS` in SQLite.

mod blacklist;
mod calls;

pub use blacklist::BlacklistStore;
pub use calls::{CallLogStore, CallRecord};

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

const SCHEMA_VERSION: i64 = 1;

/// Schema statements, one per table. Tables the core does not write
/// (tasks, ideas, projects, agent_configs) are still created here:
/// external collaborators share the same database file.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        agent_name TEXT NOT NULL,
        description TEXT,
        status TEXT DEFAULT 'pending',
        result TEXT,
        error TEXT,
        progress REAL DEFAULT 0.0,
        caller_id TEXT,
        metadata TEXT DEFAULT '{}',
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS ideas (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        category TEXT,
        priority INTEGER DEFAULT 0,
        status TEXT DEFAULT 'new',
        tags TEXT DEFAULT '[]',
        notes TEXT DEFAULT '[]',
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT,
        status TEXT DEFAULT 'planning',
        ideas TEXT DEFAULT '[]',
        tasks TEXT DEFAULT '[]',
        plan TEXT,
        milestones TEXT DEFAULT '[]',
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS calls (
        id TEXT PRIMARY KEY,
        caller_id TEXT,
        started_at TIMESTAMP,
        ended_at TIMESTAMP,
        duration_seconds INTEGER,
        cost_cents REAL DEFAULT 0.0,
        agents_used TEXT DEFAULT '[]',
        transcript TEXT DEFAULT '[]',
        logs TEXT DEFAULT '',
        summary TEXT
    )",
    "CREATE TABLE IF NOT EXISTS agent_configs (
        agent_name TEXT PRIMARY KEY,
        config TEXT DEFAULT '{}',
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS blacklist (
        caller_id TEXT PRIMARY KEY,
        reason TEXT,
        blocked_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS failed_unlock_calls (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        caller_id TEXT NOT NULL,
        failed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS whitelist (
        caller_id TEXT PRIMARY KEY,
        note TEXT,
        added_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )",
];

/// Additive column migrations: (table, column, definition).
const COLUMN_MIGRATIONS: &[(&str, &str, &str)] = &[
    ("calls", "cost_cents", "REAL DEFAULT 0.0"),
    ("calls", "logs", "TEXT DEFAULT ''"),
];

/// Open (creating if necessary) the gateway database.
pub async fn open_database(path: &str) -> Result<SqlitePool> {
    if path != ":memory:" {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
            }
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    // An in-memory database exists per connection; cap the pool at one
    // so every store sees the same data (tests use :memory:).
    let max_connections = if path == ":memory:" { 1 } else { 4 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("opening database {}", path))?;

    sqlx::query("PRAGMA journal_mode=WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    migrate_columns(&pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(&pool)
        .await?;

    info!("database initialized: {}", path);
    Ok(pool)
}

/// Probe each expected column and add the missing ones.
async fn migrate_columns(pool: &SqlitePool) -> Result<()> {
    for (table, column, definition) in COLUMN_MIGRATIONS {
        let probe = format!("SELECT {} FROM {} LIMIT 0", column, table);
        if sqlx::query(&probe).fetch_optional(pool).await.is_err() {
            info!("migration: adding {}.{}", table, column);
            let alter = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition);
            sqlx::query(&alter).execute(pool).await?;
        }
    }
    Ok(())
}
