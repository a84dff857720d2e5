pub mod category_service;
pub mod classify;
pub mod content_store;
pub mod importer;
pub mod operator;
pub mod registrar;
