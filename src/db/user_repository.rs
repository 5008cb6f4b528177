//! User repository
//!
//! The minimum user storage the key pipeline needs: key ownership lookup and
//! login authentication.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db::api_key_repository::parse_db_timestamp;
use crate::models::User;

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    name: String,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, name, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.is_active)
        .bind(user.created_at.to_rfc3339())
        .bind(user.updated_at.to_rfc3339())
        .execute(self.pool)
        .await
        .context("Failed to insert user")?;

        Ok(())
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, name, is_active, created_at, updated_at FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(self.pool)
        .await
        .context("Failed to fetch user by ID")?;

        row.map(row_to_user).transpose()
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, name, is_active, created_at, updated_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(self.pool)
        .await
        .context("Failed to fetch user by email")?;

        row.map(row_to_user).transpose()
    }

    pub async fn set_active(&self, id: Uuid, is_active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(self.pool)
            .await
            .context("Failed to update user active flag")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM users")
            .fetch_one(self.pool)
            .await
            .context("Failed to count users")?;

        Ok(row.try_get("n")?)
    }
}

fn row_to_user(row: UserRow) -> Result<User> {
    Ok(User {
        id: Uuid::parse_str(&row.id).context("Invalid user id")?,
        email: row.email,
        password_hash: row.password_hash,
        name: row.name,
        is_active: row.is_active,
        created_at: parse_db_timestamp(&row.created_at),
        updated_at: parse_db_timestamp(&row.updated_at),
    })
}
