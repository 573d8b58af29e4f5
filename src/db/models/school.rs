use serde::Serialize;
use sqlx::{FromRow, Sqlite, SqlitePool};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct School {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

pub async fn create_school<'e, E>(executor: E, name: &str) -> Result<School, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as("INSERT INTO schools (id, name, created_at) VALUES (?, ?, ?) RETURNING *")
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(name.trim())
        .bind(crate::db::now_timestamp())
        .fetch_one(executor)
        .await
}

pub async fn get_school(pool: &SqlitePool, id: &str) -> Result<Option<School>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM schools WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}
