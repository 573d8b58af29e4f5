mod models;

pub use models::*;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub type DbPool = SqlitePool;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_identities", include_str!("../../migrations/001_identities.sql")),
    ("002_sessions", include_str!("../../migrations/002_sessions.sql")),
    ("003_invites", include_str!("../../migrations/003_invites.sql")),
    ("004_audit_logs", include_str!("../../migrations/004_audit_logs.sql")),
];

/// Split a migration file into statements. Comment lines are dropped
/// before splitting so a `;` inside a comment never ends a statement.
fn split_statements(sql: &str) -> Vec<String> {
    let cleaned: String = sql
        .lines()
        .filter(|line| !line.trim().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    cleaned
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in split_statements(sql) {
        sqlx::query(&statement).execute(pool).await?;
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("edusphere.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Single-connection in-memory database with the full schema applied.
pub async fn init_memory() -> Result<DbPool> {
    // Every connection to `sqlite::memory:` is its own database, so pin the
    // pool to one connection that never idles out.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    for (name, sql) in MIGRATIONS {
        tracing::debug!(migration = name, "Applying migration");
        execute_sql(pool, sql).await?;
    }

    Ok(())
}

/// Format a timestamp the way SQLite's `datetime('now')` does, so stored
/// values compare correctly against it.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn timestamp_in_hours(hours: i64) -> String {
    format_timestamp(Utc::now() + Duration::hours(hours))
}
