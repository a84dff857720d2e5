//! Resource Registrar. Persists one record per uploaded asset.
//!
//! Registration is metadata only and assumes the upload already happened.
//! (`storage_key`, `resource_id`) is unique; registering the same pair again
//! returns the existing record instead of creating a second one.

use crate::{
    db::is_unique_violation,
    models::resource::{AssetClass, Gender, Resource, ResourceStatus},
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const RESOURCE_COLUMNS: &str = "id, asset_class, name, description, storage_url, storage_key, \
     file_size, file_type, mime_type, checksum, category_id, gender, animation_type, version, \
     resource_id, status, metadata, uploaded_by_admin_id, created_at";

/// How a resource is classified: by directory category, or by inferred animation traits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Category(Uuid),
    Animation {
        gender: Gender,
        animation_type: String,
        version: i64,
    },
}

/// Everything the registrar needs to persist one uploaded file.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub storage_url: String,
    pub storage_key: String,
    pub file_size: i64,
    pub file_type: String,
    pub mime_type: String,
    pub checksum: String,
    pub classification: Classification,
    pub resource_id: String,
    pub metadata: Map<String, Value>,
    pub uploaded_by_admin_id: Uuid,
}

/// Outcome of [`Registrar::register`].
#[derive(Debug, Clone)]
pub struct Registered {
    pub resource: Resource,
    /// False when a record for the same key and slug already existed.
    pub created: bool,
}

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("invalid descriptor: {0}")]
    Invalid(String),
    #[error("record for `{0}` vanished after a conflicting insert")]
    Vanished(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type RegistrarResult<T> = Result<T, RegistrarError>;

/// Persistence boundary for imported assets.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn register(&self, descriptor: ResourceDescriptor) -> RegistrarResult<Registered>;
}

#[derive(Clone)]
pub struct SqliteRegistrar {
    pub db: Arc<SqlitePool>,
}

impl SqliteRegistrar {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn find_existing(
        &self,
        storage_key: &str,
        resource_id: &str,
    ) -> RegistrarResult<Option<Resource>> {
        let sql = format!(
            "SELECT {} FROM resources WHERE storage_key = ? AND resource_id = ?",
            RESOURCE_COLUMNS
        );
        let row = sqlx::query_as::<_, Resource>(&sql)
            .bind(storage_key)
            .bind(resource_id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row)
    }

    /// Page of resources ordered by (`storage_key`, `resource_id`), starting after `after`.
    pub async fn list(
        &self,
        category_id: Option<Uuid>,
        after: Option<(&str, &str)>,
        limit: usize,
    ) -> RegistrarResult<Vec<Resource>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM resources WHERE 1 = 1",
            RESOURCE_COLUMNS
        ));

        if let Some(category_id) = category_id {
            builder.push(" AND category_id = ");
            builder.push_bind(category_id);
        }

        if let Some((key, slug)) = after {
            builder.push(" AND (storage_key > ");
            builder.push_bind(key.to_string());
            builder.push(" OR (storage_key = ");
            builder.push_bind(key.to_string());
            builder.push(" AND resource_id > ");
            builder.push_bind(slug.to_string());
            builder.push("))");
        }

        builder.push(" ORDER BY storage_key ASC, resource_id ASC LIMIT ");
        builder.push_bind(limit as i64);

        Ok(builder.build_query_as().fetch_all(&*self.db).await?)
    }

    pub async fn count(&self) -> RegistrarResult<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM resources")
            .fetch_one(&*self.db)
            .await?)
    }
}

#[async_trait]
impl Registrar for SqliteRegistrar {
    async fn register(&self, descriptor: ResourceDescriptor) -> RegistrarResult<Registered> {
        if descriptor.resource_id.is_empty() {
            return Err(RegistrarError::Invalid("resource_id is empty".into()));
        }
        if descriptor.storage_key.is_empty() {
            return Err(RegistrarError::Invalid("storage_key is empty".into()));
        }

        if let Some(resource) = self
            .find_existing(&descriptor.storage_key, &descriptor.resource_id)
            .await?
        {
            return Ok(Registered {
                resource,
                created: false,
            });
        }

        let (asset_class, category_id, gender, animation_type, version) =
            match descriptor.classification {
                Classification::Category(id) => (AssetClass::Resource, Some(id), None, None, None),
                Classification::Animation {
                    gender,
                    animation_type,
                    version,
                } => (
                    AssetClass::Animation,
                    None,
                    Some(gender),
                    Some(animation_type),
                    Some(version),
                ),
            };

        let resource = Resource {
            id: Uuid::new_v4(),
            asset_class,
            name: descriptor.name,
            description: descriptor.description,
            storage_url: descriptor.storage_url,
            storage_key: descriptor.storage_key,
            file_size: descriptor.file_size,
            file_type: descriptor.file_type,
            mime_type: descriptor.mime_type,
            checksum: descriptor.checksum,
            category_id,
            gender,
            animation_type,
            version,
            resource_id: descriptor.resource_id,
            status: ResourceStatus::Active,
            metadata: Json(Value::Object(descriptor.metadata)),
            uploaded_by_admin_id: descriptor.uploaded_by_admin_id,
            created_at: Utc::now(),
        };

        let sql = format!(
            "INSERT INTO resources ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            RESOURCE_COLUMNS
        );
        let inserted = sqlx::query(&sql)
            .bind(resource.id)
            .bind(resource.asset_class)
            .bind(&resource.name)
            .bind(&resource.description)
            .bind(&resource.storage_url)
            .bind(&resource.storage_key)
            .bind(resource.file_size)
            .bind(&resource.file_type)
            .bind(&resource.mime_type)
            .bind(&resource.checksum)
            .bind(resource.category_id)
            .bind(resource.gender)
            .bind(&resource.animation_type)
            .bind(resource.version)
            .bind(&resource.resource_id)
            .bind(resource.status)
            .bind(&resource.metadata)
            .bind(resource.uploaded_by_admin_id)
            .bind(resource.created_at)
            .execute(&*self.db)
            .await;

        match inserted {
            Ok(_) => {
                debug!(key = %resource.storage_key, resource_id = %resource.resource_id, "resource registered");
                Ok(Registered {
                    resource,
                    created: true,
                })
            }
            Err(err) if is_unique_violation(&err) => {
                let existing = self
                    .find_existing(&resource.storage_key, &resource.resource_id)
                    .await?
                    .ok_or_else(|| RegistrarError::Vanished(resource.storage_key.clone()))?;
                Ok(Registered {
                    resource: existing,
                    created: false,
                })
            }
            Err(err) => Err(RegistrarError::Database(err)),
        }
    }
}
