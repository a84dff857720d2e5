//! Represents a payload held by the content store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

/// Metadata for a single stored payload, addressed by its key.
///
/// The `StoredObject` row describes the bytes on disk; it does not hold them.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Object key (path-like identifier, unique across the store).
    pub key: String,

    /// Original filename of the uploaded file.
    pub filename: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload, hex encoded.
    pub etag: String,

    /// Owner tag the key was derived from.
    pub owner_tag: String,

    /// Free-form metadata supplied by the uploader.
    pub metadata: Json<Value>,

    /// Timestamp when the payload was last written.
    pub last_modified: DateTime<Utc>,
}
