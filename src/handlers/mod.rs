pub mod catalog_handlers;
pub mod health_handlers;
pub mod object_handlers;

use crate::services::{
    category_service::CategoryService, content_store::LocalContentStore,
    registrar::SqliteRegistrar,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: LocalContentStore,
    pub categories: CategoryService,
    pub registrar: SqliteRegistrar,
}
