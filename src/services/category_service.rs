//! Category Resolver: find-or-create for the category tree.
//!
//! Uniqueness of (`name`, `parent_id`) is enforced by a unique index. A
//! create that loses a race against another writer re-fetches and returns
//! the winner's row, so concurrent resolution never yields duplicates.

use crate::{db::is_unique_violation, models::category::Category};
use chrono::Utc;
use serde_json::json;
use sqlx::{SqlitePool, types::Json};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CategoryError {
    #[error("category name must not be empty")]
    EmptyName,
    #[error("category `{name}` vanished after a conflicting insert")]
    Vanished { name: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type CategoryResult<T> = Result<T, CategoryError>;

/// Outcome of [`CategoryService::ensure`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub category: Category,
    /// False when the category already existed.
    pub created: bool,
}

#[derive(Clone)]
pub struct CategoryService {
    pub db: Arc<SqlitePool>,
}

impl CategoryService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Return the category named `name` under `parent_id`, creating it if needed.
    ///
    /// An existing row is returned unchanged, even when its stored `path`
    /// differs from `full_path`.
    pub async fn ensure(
        &self,
        name: &str,
        parent_id: Option<Uuid>,
        level: i64,
        full_path: &str,
    ) -> CategoryResult<Resolved> {
        if name.trim().is_empty() {
            return Err(CategoryError::EmptyName);
        }

        if let Some(category) = self.find(name, parent_id).await? {
            debug!(path = %category.path, "category exists");
            return Ok(Resolved {
                category,
                created: false,
            });
        }

        let category = Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
            path: full_path.to_string(),
            parent_id,
            level,
            is_premium: false,
            metadata: Json(json!({ "source_path": full_path })),
            created_at: Utc::now(),
        };

        let inserted = sqlx::query(
            "INSERT INTO categories (id, name, path, parent_id, level, is_premium, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(category.id)
        .bind(&category.name)
        .bind(&category.path)
        .bind(category.parent_id)
        .bind(category.level)
        .bind(category.is_premium)
        .bind(&category.metadata)
        .bind(category.created_at)
        .execute(&*self.db)
        .await;

        match inserted {
            Ok(_) => {
                info!(path = %category.path, level = category.level, "category created");
                Ok(Resolved {
                    category,
                    created: true,
                })
            }
            Err(err) if is_unique_violation(&err) => {
                debug!(path = %full_path, "lost category insert race, fetching winner");
                let category = self.find(name, parent_id).await?.ok_or_else(|| {
                    CategoryError::Vanished {
                        name: name.to_string(),
                    }
                })?;
                Ok(Resolved {
                    category,
                    created: false,
                })
            }
            Err(err) => Err(CategoryError::Sqlx(err)),
        }
    }

    /// Look up by the (`name`, `parent_id`) key. `IS` matches NULL parents.
    pub async fn find(&self, name: &str, parent_id: Option<Uuid>) -> CategoryResult<Option<Category>> {
        let category = sqlx::query_as::<_, Category>(
            "SELECT id, name, path, parent_id, level, is_premium, metadata, created_at
             FROM categories WHERE name = ? AND parent_id IS ?",
        )
        .bind(name)
        .bind(parent_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(category)
    }

    /// Children of `parent_id`, or roots when `None`, ordered by name.
    pub async fn list_children(&self, parent_id: Option<Uuid>) -> CategoryResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, Category>(
            "SELECT id, name, path, parent_id, level, is_premium, metadata, created_at
             FROM categories WHERE parent_id IS ? ORDER BY name ASC",
        )
        .bind(parent_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> CategoryResult<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM categories")
            .fetch_one(&*self.db)
            .await?)
    }
}
