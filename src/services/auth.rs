//! Authentication service
//!
//! Provides password hashing with Argon2 and user authentication. Passwords
//! get per-record salts; API key hashing lives in `key_codec` and deliberately
//! does not.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::UserRepository;
use crate::models::User;

/// Authentication service for user management
pub struct AuthService {
    pool: SqlitePool,
}

impl AuthService {
    /// Create a new auth service
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Hash a password using Argon2id
    pub fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
            .to_string();
        Ok(password_hash)
    }

    /// Verify a password against a hash
    pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(password_hash)
            .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Authenticate a user by email and password
    ///
    /// Returns `None` for unknown email, wrong password, or an inactive account.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>> {
        let repo = UserRepository::new(&self.pool);
        let user = repo.get_by_email(email).await?;

        match user {
            Some(user) if user.is_active => {
                if Self::verify_password(password, &user.password_hash)? {
                    Ok(Some(user))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        UserRepository::new(&self.pool).get_by_id(id).await
    }

    /// Create a new user, enforcing email uniqueness
    pub async fn create_user(&self, email: &str, password: &str, name: &str) -> Result<User> {
        let repo = UserRepository::new(&self.pool);

        if repo.get_by_email(email).await?.is_some() {
            anyhow::bail!("Email already exists");
        }

        let password_hash = Self::hash_password(password)?;
        let user = User::new(email.to_string(), password_hash, name.to_string());

        repo.insert(&user).await.context("Failed to create user")?;

        Ok(user)
    }
}
