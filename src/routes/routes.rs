//! Routes for the read-only serving surface.
//!
//! - `GET /healthz`, `GET /readyz`
//! - `GET|HEAD /objects/{*key}`: stored payloads, so every `storage_url` resolves
//! - `GET /categories?parent_id=`
//! - `GET /resources?category_id=&max-keys=&continuation-token=`
//!
//! The wildcard `*key` allows nested keys like `proj/props/chairs/chair.glb`.

use crate::handlers::{
    AppState,
    catalog_handlers::{list_categories, list_resources},
    health_handlers::{healthz, readyz},
    object_handlers::{get_object, head_object},
};
use axum::{Router, routing::get};

/// Build the router; handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/objects/{*key}", get(get_object).head(head_object))
        .route("/categories", get(list_categories))
        .route("/resources", get(list_resources))
}
