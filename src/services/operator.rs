//! Operator resolution: the admin every imported record is attributed to.

use crate::{db::is_unique_violation, models::admin::Admin};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("no operator is registered; create one with `admin add`")]
    NoneRegistered,
    #[error("operator `{0}` does not exist")]
    Unknown(Uuid),
    #[error("operator with email `{0}` already exists")]
    EmailTaken(String),
    #[error("invalid email `{0}`")]
    InvalidEmail(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type OperatorResult<T> = Result<T, OperatorError>;

#[derive(Clone)]
pub struct OperatorService {
    pub db: Arc<SqlitePool>,
}

impl OperatorService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// The explicit operator when `requested` is set, otherwise the earliest registered.
    pub async fn resolve(&self, requested: Option<Uuid>) -> OperatorResult<Admin> {
        match requested {
            Some(id) => sqlx::query_as::<_, Admin>(
                "SELECT id, email, display_name, created_at FROM admins WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(OperatorError::Unknown(id)),
            None => sqlx::query_as::<_, Admin>(
                "SELECT id, email, display_name, created_at FROM admins
                 ORDER BY created_at ASC, email ASC LIMIT 1",
            )
            .fetch_optional(&*self.db)
            .await?
            .ok_or(OperatorError::NoneRegistered),
        }
    }

    pub async fn create(&self, email: &str, display_name: &str) -> OperatorResult<Admin> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(OperatorError::InvalidEmail(email.to_string()));
        }

        let admin = Admin {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: display_name.trim().to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO admins (id, email, display_name, created_at) VALUES (?, ?, ?, ?)")
            .bind(admin.id)
            .bind(&admin.email)
            .bind(&admin.display_name)
            .bind(admin.created_at)
            .execute(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    OperatorError::EmailTaken(admin.email.clone())
                } else {
                    OperatorError::Sqlx(err)
                }
            })?;

        Ok(admin)
    }

    pub async fn list(&self) -> OperatorResult<Vec<Admin>> {
        Ok(sqlx::query_as::<_, Admin>(
            "SELECT id, email, display_name, created_at FROM admins ORDER BY created_at ASC",
        )
        .fetch_all(&*self.db)
        .await?)
    }
}
