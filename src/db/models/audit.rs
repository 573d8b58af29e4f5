//! Audit log models for tracking sign-in activity and identity writes.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: String,
    pub action: String,
    /// Identity performing the action, if known
    pub identity_id: Option<String>,
    /// Identity or record the action was applied to
    pub target_id: Option<String>,
    pub ip_address: Option<String>,
    pub details: Option<String>,
    pub created_at: String,
}

/// Query parameters for listing audit logs
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditLogQuery {
    /// Filter by action (e.g., "auth.login")
    pub action: Option<String>,
    /// Max entries to return (defaults to 50, max 200)
    pub limit: Option<i64>,
}

/// Audit action names
pub mod actions {
    pub const AUTH_LOGIN: &str = "auth.login";
    pub const AUTH_LOGIN_FAILED: &str = "auth.login_failed";
    pub const AUTH_LOGOUT: &str = "auth.logout";
    pub const AUTH_SETUP: &str = "auth.setup";
    pub const AUTH_REGISTER: &str = "auth.register";
    pub const ACCESS_DENIED: &str = "access.denied";

    pub const STUDENT_ADMIT: &str = "student.admit";
    pub const STAFF_CREATE: &str = "staff.create";
    pub const INVITE_CREATE: &str = "invite.create";
    pub const INVITE_ACCEPT: &str = "invite.accept";
}

/// Log an audit event to the database
pub async fn log_audit(
    db: &SqlitePool,
    action: &str,
    identity_id: Option<&str>,
    target_id: Option<&str>,
    ip_address: Option<&str>,
    details: Option<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let details_json = details.map(|d| d.to_string());

    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, action, identity_id, target_id, ip_address, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(action)
    .bind(identity_id)
    .bind(target_id)
    .bind(ip_address)
    .bind(&details_json)
    .bind(crate::db::now_timestamp())
    .execute(db)
    .await?;

    tracing::debug!(
        action = action,
        identity_id = identity_id,
        target_id = target_id,
        "Audit log recorded"
    );

    Ok(())
}

/// Most recent audit entries, newest first
pub async fn list_audit_logs(
    db: &SqlitePool,
    query: &AuditLogQuery,
) -> Result<Vec<AuditLog>, sqlx::Error> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    match &query.action {
        Some(action) => {
            sqlx::query_as(
                "SELECT * FROM audit_logs WHERE action = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
            )
            .bind(action)
            .bind(limit)
            .fetch_all(db)
            .await
        }
        None => {
            sqlx::query_as("SELECT * FROM audit_logs ORDER BY created_at DESC, rowid DESC LIMIT ?")
                .bind(limit)
                .fetch_all(db)
                .await
        }
    }
}
