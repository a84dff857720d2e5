//! Core data models for the asset import pipeline.
//!
//! These entities mirror the SQLite tables created by the embedded migration.
//! They map to rows via `sqlx::FromRow` and serialize as JSON via `serde` for
//! the read-only catalog API and run reports.

pub mod admin;
pub mod category;
pub mod object;
pub mod resource;
