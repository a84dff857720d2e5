//! A node of the category tree mirroring the source directory structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

/// A category created lazily during an import walk.
///
/// The pair (`name`, `parent_id`) is unique. Rows are never deleted or
/// rewritten by the importer; later admin tooling owns any mutation.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Category {
    pub id: Uuid,

    /// Directory name this category was created from.
    pub name: String,

    /// Full slash-joined ancestry, e.g. `props/furniture/chairs`.
    pub path: String,

    /// Parent category; `None` for a root.
    pub parent_id: Option<Uuid>,

    /// Depth in the tree, roots are level 0.
    pub level: i64,

    pub is_premium: bool,

    /// Open key/value map.
    pub metadata: Json<Value>,

    pub created_at: DateTime<Utc>,
}
