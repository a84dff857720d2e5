//! Represents one imported binary asset and where its payload lives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, types::Json};
use std::fmt;
use uuid::Uuid;

/// Which import path produced a record.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    /// Generic asset linked to a category.
    Resource,
    /// Animation classified by gender and type instead of a category.
    Animation,
}

/// Lifecycle tag of a resource.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Active,
    Disabled,
}

/// Gender tag inferred from an animation filename.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Gender {
    Female,
    Male,
    Unisex,
}

impl Gender {
    /// Tag as stored and displayed (`FEMALE`, `MALE`, `UNISEX`).
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Female => "FEMALE",
            Gender::Male => "MALE",
            Gender::Unisex => "UNISEX",
        }
    }

    /// Lowercase form used inside storage keys.
    pub fn key_segment(self) -> &'static str {
        match self {
            Gender::Female => "female",
            Gender::Male => "male",
            Gender::Unisex => "unisex",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered asset.
///
/// Created exactly once per successful upload + register pair and never
/// mutated by the importer afterwards.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Resource {
    pub id: Uuid,
    pub asset_class: AssetClass,

    /// Filename with the extension stripped.
    pub name: String,
    pub description: Option<String>,

    pub storage_url: String,
    pub storage_key: String,

    /// Payload size in bytes.
    pub file_size: i64,

    /// Lowercase file extension, e.g. `glb`.
    pub file_type: String,
    pub mime_type: String,

    /// MD5 of the payload, hex encoded.
    pub checksum: String,

    /// Owning category. Always set for `AssetClass::Resource`.
    pub category_id: Option<Uuid>,

    pub gender: Option<Gender>,
    pub animation_type: Option<String>,
    pub version: Option<i64>,

    /// Slug derived deterministically from the filename.
    pub resource_id: String,
    pub status: ResourceStatus,

    /// Original filename, source path and import timestamp.
    pub metadata: Json<Value>,

    pub uploaded_by_admin_id: Uuid,
    pub created_at: DateTime<Utc>,
}
