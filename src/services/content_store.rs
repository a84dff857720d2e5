//! Content Store Gateway: puts asset payloads into the object store and
//! reports whether an existing object was reused. The local implementation
//! keeps payloads on disk sharded beneath `base_path/{shard}/{shard}/{key}`
//! and their metadata in SQLite.
//!
//! Keys are derived from owner tag + file name, never from content, so a
//! re-import of the same path lands on the same key.

use crate::models::object::StoredObject;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{SqlitePool, types::Json};
use std::{
    error::Error as StdError,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// What `put` does when the destination exists and `ignore_if_exists` is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Replace the stored payload.
    Overwrite,
    /// Refuse with `ContentStoreError::AlreadyExists`.
    Fail,
}

/// Options accepted by [`ContentStore::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: Map<String, Value>,
    /// Destination key used verbatim instead of the derived one.
    pub specific_key: Option<String>,
    /// Reuse an existing object at the destination instead of writing.
    pub ignore_if_exists: bool,
}

/// Where a payload ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutResult {
    pub url: String,
    pub key: String,
    /// True when nothing was written because the object already existed.
    pub reused: bool,
    /// MD5 of the stored payload, hex encoded.
    pub etag: String,
    /// Size of the stored payload in bytes.
    pub size: i64,
}

#[derive(Debug, Error)]
pub enum ContentStoreError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("object `{key}` already exists")]
    AlreadyExists {
        key: String,
        url: String,
        etag: String,
        size: i64,
    },
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] Box<dyn StdError + Send + Sync>),
}

impl From<io::Error> for ContentStoreError {
    fn from(err: io::Error) -> Self {
        ContentStoreError::StorageUnavailable(Box::new(err))
    }
}

impl From<sqlx::Error> for ContentStoreError {
    fn from(err: sqlx::Error) -> Self {
        ContentStoreError::StorageUnavailable(Box::new(err))
    }
}

pub type ContentStoreResult<T> = Result<T, ContentStoreError>;

/// Object storage as seen by the importer.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes` under a key derived from `owner_tag` and
    /// `original_file_name`, or under `options.specific_key` when given.
    async fn put(
        &self,
        bytes: Bytes,
        original_file_name: &str,
        owner_tag: &str,
        options: PutOptions,
    ) -> ContentStoreResult<PutResult>;
}

/// Disk + SQLite backed content store.
#[derive(Clone)]
pub struct LocalContentStore {
    /// Shared SQLite connection pool used for object metadata.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Prefix for object URLs, without trailing slash.
    pub public_base_url: String,

    pub on_conflict: ConflictPolicy,
}

impl LocalContentStore {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        on_conflict: ConflictPolicy,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            on_conflict,
        }
    }

    /// Default destination key: `{owner_tag}/{file_name}`.
    ///
    /// Segments are used byte for byte, so names differing only in
    /// surrounding whitespace map to different keys. Empty owner segments
    /// (doubled or edge slashes) are dropped; blank, `.` and `..` segments
    /// and file names containing a separator are rejected.
    pub fn derive_key(owner_tag: &str, file_name: &str) -> ContentStoreResult<String> {
        if file_name.trim().is_empty() || file_name.contains('/') || file_name.contains('\\') {
            return Err(ContentStoreError::InvalidPayload(format!(
                "invalid file name `{}`",
                file_name
            )));
        }

        let mut segments: Vec<&str> = owner_tag.split('/').filter(|s| !s.is_empty()).collect();
        segments.push(file_name);

        if segments
            .iter()
            .any(|s| s.trim().is_empty() || *s == "." || *s == "..")
        {
            return Err(ContentStoreError::InvalidPayload(format!(
                "owner tag `{}` contains a blank or relative segment",
                owner_tag
            )));
        }

        let key = segments.join("/");
        ensure_key_safe(&key)?;
        Ok(key)
    }

    /// Public URL for `key`.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/objects/{}", self.public_base_url, encode_key(key))
    }

    /// Two-level shard identifiers from MD5(key), as lowercase hex (00–ff).
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// base_path/{shard}/{shard}/{key}. Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Stored metadata for `key`, if any.
    pub async fn find_object(&self, key: &str) -> ContentStoreResult<Option<StoredObject>> {
        let object = sqlx::query_as::<_, StoredObject>(
            "SELECT id, key, filename, content_type, size_bytes, etag, owner_tag,
                    metadata, last_modified
             FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(object)
    }

    /// Metadata plus an open file handle ready for streaming out.
    ///
    /// Returns NotFound if metadata exists but the payload is missing on disk.
    pub async fn open_object(&self, key: &str) -> ContentStoreResult<(StoredObject, File)> {
        ensure_key_safe(key)?;
        let object = self
            .find_object(key)
            .await?
            .ok_or_else(|| ContentStoreError::NotFound(key.to_string()))?;

        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ContentStoreError::NotFound(key.to_string())
            } else {
                ContentStoreError::from(err)
            }
        })?;

        Ok((object, file))
    }

    /// Write the payload via temp file + fsync + rename.
    async fn write_payload(&self, file_path: &Path, bytes: &[u8]) -> ContentStoreResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, file_path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn put(
        &self,
        bytes: Bytes,
        original_file_name: &str,
        owner_tag: &str,
        options: PutOptions,
    ) -> ContentStoreResult<PutResult> {
        if bytes.is_empty() {
            return Err(ContentStoreError::InvalidPayload(format!(
                "`{}` is empty",
                original_file_name
            )));
        }

        let key = match options.specific_key {
            Some(key) => {
                ensure_key_safe(&key)?;
                key
            }
            None => Self::derive_key(owner_tag, original_file_name)?,
        };
        let url = self.url_for(&key);
        let etag = format!("{:x}", md5::compute(&bytes));

        let existing = self.find_object(&key).await?;
        if let Some(existing) = &existing {
            if existing.etag != etag {
                warn!(
                    key = %key,
                    stored_etag = %existing.etag,
                    new_etag = %etag,
                    "content drift: payload differs from stored object"
                );
            }
            if options.ignore_if_exists {
                debug!(key = %key, "object exists, reusing");
                return Ok(PutResult {
                    url,
                    key,
                    reused: true,
                    etag: existing.etag.clone(),
                    size: existing.size_bytes,
                });
            }
            if self.on_conflict == ConflictPolicy::Fail {
                return Err(ContentStoreError::AlreadyExists {
                    key,
                    url,
                    etag: existing.etag.clone(),
                    size: existing.size_bytes,
                });
            }
        }

        let file_path = self.object_path(&key);
        self.write_payload(&file_path, &bytes).await?;

        let insert_result = sqlx::query(
            r#"
            INSERT INTO objects (
                id, key, filename, content_type, size_bytes, etag, owner_tag,
                metadata, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                owner_tag = excluded.owner_tag,
                metadata = excluded.metadata,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&key)
        .bind(original_file_name)
        .bind(options.content_type)
        .bind(bytes.len() as i64)
        .bind(&etag)
        .bind(owner_tag)
        .bind(Json(Value::Object(options.metadata)))
        .bind(Utc::now())
        .execute(&*self.db)
        .await;

        if let Err(err) = insert_result {
            // A fresh payload with no row is unreachable; an overwritten one still has its old row.
            if existing.is_none() {
                let _ = fs::remove_file(&file_path).await;
            }
            return Err(err.into());
        }

        debug!(key = %key, size = bytes.len(), "stored object");
        Ok(PutResult {
            url,
            key,
            reused: false,
            etag,
            size: bytes.len() as i64,
        })
    }
}

/// Reject keys that could escape the storage root or break URLs.
fn ensure_key_safe(key: &str) -> ContentStoreResult<()> {
    let invalid = |reason: &str| {
        Err(ContentStoreError::InvalidPayload(format!(
            "invalid object key `{}`: {}",
            key, reason
        )))
    };
    if key.is_empty() {
        return invalid("empty");
    }
    if key.len() > MAX_OBJECT_KEY_LEN {
        return invalid("too long");
    }
    if key.starts_with('/') || key.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
        return invalid("empty or relative segment");
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return invalid("control character or backslash");
    }
    Ok(())
}

/// Percent-encode everything outside RFC 3986 unreserved characters, keeping `/`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
