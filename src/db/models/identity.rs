//! Identity rows and the SQLite-backed identity store.

use async_trait::async_trait;
use sqlx::{FromRow, Sqlite, SqlitePool};

use crate::identity::{Identity, IdentityError, IdentityStore, Role};

const STAFF_EXACT_SQL: &str = "SELECT * FROM identities \
     WHERE role IN ('admin', 'teacher') AND (staff_number = ? OR email = ?)";

const STAFF_NAME_SQL: &str = "SELECT * FROM identities \
     WHERE role IN ('admin', 'teacher') AND lower(full_name) LIKE ? ESCAPE '\\'";

/// Raw `identities` row. The secret hash never leaves this module except via
/// [`secret_hash_for`].
#[derive(Debug, Clone, FromRow)]
pub struct IdentityRow {
    pub id: String,
    pub role: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub admission_number: Option<String>,
    pub staff_number: Option<String>,
    pub school_id: Option<String>,
    pub parent_id: Option<String>,
    pub fee_balance_cents: i64,
    pub secret_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<IdentityRow> for Identity {
    type Error = IdentityError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        Ok(Identity {
            role: row.role.parse::<Role>()?,
            id: row.id,
            full_name: row.full_name,
            email: row.email,
            phone: row.phone,
            admission_number: row.admission_number,
            staff_number: row.staff_number,
            school_id: row.school_id,
            parent_id: row.parent_id,
            fee_balance_cents: row.fee_balance_cents,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_identities(rows: Vec<IdentityRow>) -> Result<Vec<Identity>, IdentityError> {
    rows.into_iter().map(Identity::try_from).collect()
}

/// Values for a new identity. Callers validate field formats; this layer
/// normalizes case so lookups stay exact.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub role: Role,
    pub full_name: String,
    pub email: Option<String>,
    /// Already normalized to `254XXXXXXXXX`
    pub phone: Option<String>,
    pub admission_number: Option<String>,
    pub staff_number: Option<String>,
    pub school_id: Option<String>,
    pub parent_id: Option<String>,
    pub fee_balance_cents: i64,
    pub secret_hash: String,
}

impl NewIdentity {
    pub fn new(role: Role, full_name: impl Into<String>, secret_hash: impl Into<String>) -> Self {
        Self {
            role,
            full_name: full_name.into(),
            email: None,
            phone: None,
            admission_number: None,
            staff_number: None,
            school_id: None,
            parent_id: None,
            fee_balance_cents: 0,
            secret_hash: secret_hash.into(),
        }
    }
}

pub async fn insert_identity<'e, E>(executor: E, new: &NewIdentity) -> Result<Identity, IdentityError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let id = uuid::Uuid::new_v4().to_string();
    let now = crate::db::now_timestamp();

    let row: IdentityRow = sqlx::query_as(
        r#"
        INSERT INTO identities (
            id, role, full_name, email, phone, admission_number, staff_number,
            school_id, parent_id, fee_balance_cents, secret_hash, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(new.role.as_str())
    .bind(new.full_name.trim())
    .bind(new.email.as_deref().map(|e| e.trim().to_lowercase()))
    .bind(new.phone.as_deref())
    .bind(new.admission_number.as_deref().map(|a| a.trim().to_uppercase()))
    .bind(new.staff_number.as_deref().map(|s| s.trim().to_uppercase()))
    .bind(new.school_id.as_deref())
    .bind(new.parent_id.as_deref())
    .bind(new.fee_balance_cents)
    .bind(&new.secret_hash)
    .bind(&now)
    .bind(&now)
    .fetch_one(executor)
    .await?;

    tracing::info!(identity_id = %row.id, role = %row.role, "Created identity");
    Identity::try_from(row)
}

pub async fn get_identity(pool: &SqlitePool, id: &str) -> Result<Option<Identity>, IdentityError> {
    let row: Option<IdentityRow> = sqlx::query_as("SELECT * FROM identities WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(Identity::try_from).transpose()
}

pub async fn secret_hash_for(pool: &SqlitePool, id: &str) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT secret_hash FROM identities WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.0))
}

pub async fn count_identities<'e, E>(executor: E) -> Result<i64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM identities")
        .fetch_one(executor)
        .await?;
    Ok(count.0)
}

pub async fn list_identities(
    pool: &SqlitePool,
    role: Option<Role>,
) -> Result<Vec<Identity>, IdentityError> {
    let rows: Vec<IdentityRow> = match role {
        Some(role) => {
            sqlx::query_as("SELECT * FROM identities WHERE role = ? ORDER BY created_at DESC, full_name")
                .bind(role.as_str())
                .fetch_all(pool)
                .await?
        }
        None => {
            sqlx::query_as("SELECT * FROM identities ORDER BY created_at DESC, full_name")
                .fetch_all(pool)
                .await?
        }
    };
    into_identities(rows)
}

/// Students linked to a parent
pub async fn children_of(pool: &SqlitePool, parent_id: &str) -> Result<Vec<Identity>, IdentityError> {
    let rows: Vec<IdentityRow> = sqlx::query_as(
        "SELECT * FROM identities WHERE role = 'student' AND parent_id = ? ORDER BY full_name",
    )
    .bind(parent_id)
    .fetch_all(pool)
    .await?;
    into_identities(rows)
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// [`IdentityStore`] over the `identities` table.
#[derive(Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

impl SqliteIdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn students_by_admission_number(
        &self,
        admission_number: &str,
    ) -> Result<Vec<Identity>, IdentityError> {
        let rows: Vec<IdentityRow> = sqlx::query_as(
            "SELECT * FROM identities WHERE role = 'student' AND admission_number = ?",
        )
        .bind(admission_number.to_uppercase())
        .fetch_all(&self.pool)
        .await?;
        into_identities(rows)
    }

    async fn identities_by_phone(&self, phone: &str) -> Result<Vec<Identity>, IdentityError> {
        let rows: Vec<IdentityRow> = sqlx::query_as("SELECT * FROM identities WHERE phone = ?")
            .bind(phone)
            .fetch_all(&self.pool)
            .await?;
        into_identities(rows)
    }

    async fn staff_by_identifier(&self, identifier: &str) -> Result<Vec<Identity>, IdentityError> {
        let exact: Vec<IdentityRow> = sqlx::query_as(STAFF_EXACT_SQL)
            .bind(identifier.to_uppercase())
            .bind(identifier.to_lowercase())
            .fetch_all(&self.pool)
            .await?;

        if !exact.is_empty() {
            return into_identities(exact);
        }

        let pattern = format!("%{}%", escape_like(&identifier.to_lowercase()));
        let by_name: Vec<IdentityRow> = sqlx::query_as(STAFF_NAME_SQL)
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?;
        into_identities(by_name)
    }

    async fn identity_by_id(&self, id: &str) -> Result<Option<Identity>, IdentityError> {
        get_identity(&self.pool, id).await
    }
}
