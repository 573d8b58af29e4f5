//! Login sessions.

use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Session {
    pub id: String,
    pub identity_id: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

pub async fn create_session(
    pool: &SqlitePool,
    identity_id: &str,
    token_hash: &str,
    ttl_hours: i64,
) -> Result<Session, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let expires_at = crate::db::timestamp_in_hours(ttl_hours);

    sqlx::query_as(
        r#"
        INSERT INTO sessions (id, identity_id, token_hash, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(identity_id)
    .bind(token_hash)
    .bind(&expires_at)
    .bind(crate::db::now_timestamp())
    .fetch_one(pool)
    .await
}

/// Unexpired session for a token hash
pub async fn find_active_session(
    pool: &SqlitePool,
    token_hash: &str,
) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > datetime('now')")
        .bind(token_hash)
        .fetch_optional(pool)
        .await
}

pub async fn delete_session(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn purge_expired_sessions(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= datetime('now')")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
