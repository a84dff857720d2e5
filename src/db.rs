//! SQLite pool construction and the embedded schema.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, sync::Arc};

/// Schema applied on every connect. Statements are idempotent.
const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open (creating if needed) the database at `database_url` and apply migrations.
pub async fn connect(database_url: &str) -> Result<Arc<SqlitePool>> {
    tracing::debug!("Connecting using raw URL => {}", database_url);

    if let Some(db_path) = file_path(database_url) {
        tracing::debug!("Interpreted SQLite path => {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database URL `{}`", database_url))?
        .create_if_missing(true)
        .foreign_keys(true);

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", database_url))?;

    run_migrations(&db).await?;
    Ok(Arc::new(db))
}

/// Run the embedded migration statements one by one.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::debug!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::trace!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt)
            .execute(db)
            .await
            .with_context(|| format!("executing migration statement `{}`", stmt))?;
    }

    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Local file path behind a `sqlite:` URL, `None` for in-memory databases.
fn file_path(database_url: &str) -> Option<&Path> {
    let raw = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let raw = raw.split('?').next().unwrap_or(raw);
    if raw.is_empty() || raw.starts_with(":memory:") {
        None
    } else {
        Some(Path::new(raw))
    }
}

/// Single-connection in-memory database with the schema applied.
///
/// One connection only: every new SQLite memory connection is a fresh database.
#[cfg(test)]
pub async fn memory_pool() -> Arc<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    run_migrations(&db).await.unwrap();
    Arc::new(db)
}
