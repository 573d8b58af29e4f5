//! Staff invites issued by admins and redeemed once.

use serde::Serialize;
use sqlx::{FromRow, Sqlite, SqlitePool};

use crate::identity::{IdentityError, Role};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Invite {
    pub id: String,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub email: String,
    pub staff_number: String,
    pub role: String,
    pub school_id: String,
    pub invited_by: Option<String>,
    pub expires_at: String,
    pub accepted_at: Option<String>,
    pub created_at: String,
}

impl Invite {
    pub fn role_enum(&self) -> Result<Role, IdentityError> {
        self.role.parse()
    }
}

#[derive(Debug, Clone)]
pub struct NewInvite {
    pub token_hash: String,
    pub email: String,
    pub staff_number: String,
    pub role: Role,
    pub school_id: String,
    pub invited_by: String,
    pub ttl_hours: i64,
}

pub async fn create_invite(pool: &SqlitePool, new: &NewInvite) -> Result<Invite, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO invites (id, token_hash, email, staff_number, role, school_id, invited_by, expires_at, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&new.token_hash)
    .bind(new.email.trim().to_lowercase())
    .bind(new.staff_number.trim().to_uppercase())
    .bind(new.role.as_str())
    .bind(&new.school_id)
    .bind(&new.invited_by)
    .bind(crate::db::timestamp_in_hours(new.ttl_hours))
    .bind(crate::db::now_timestamp())
    .fetch_one(pool)
    .await
}

/// Unredeemed, unexpired invite for a token hash
pub async fn find_pending_invite(
    pool: &SqlitePool,
    token_hash: &str,
) -> Result<Option<Invite>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM invites WHERE token_hash = ? AND accepted_at IS NULL AND expires_at > datetime('now')",
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await
}

/// Mark an invite redeemed. Returns false if another request got there first.
pub async fn claim_invite<'e, E>(executor: E, id: &str) -> Result<bool, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE invites SET accepted_at = ? WHERE id = ? AND accepted_at IS NULL")
        .bind(crate::db::now_timestamp())
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}
