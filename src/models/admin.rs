//! The accountable operator attached to every imported record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An administrator allowed to run imports.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Admin {
    pub id: Uuid,

    /// Unique login email.
    pub email: String,

    pub display_name: String,

    /// Used to pick the "first available" operator when none is supplied.
    pub created_at: DateTime<Utc>,
}
