use anyhow::{Context, Result};
use axum::Router;
use sqlx::SqlitePool;
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AdminCommand, AppConfig, Command, ImportArgs};
use handlers::AppState;
use services::{
    category_service::CategoryService,
    content_store::LocalContentStore,
    importer::{ImportSettings, ImportSummary, Importer},
    operator::OperatorService,
    registrar::SqliteRegistrar,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + subcommand ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::debug!("Starting asset-import with config: {:?}", cfg);

    // --- Initialize SQLite connection (applies migrations) ---
    let db = db::connect(&cfg.database_url).await?;

    match command {
        Command::Migrate => {
            tracing::info!("Database migration complete.");
            Ok(())
        }
        Command::Admin(cmd) => run_admin(db, cmd).await,
        Command::Import(args) => {
            let importer = build_importer(&cfg, db.clone()).await?;
            let summary = importer.import_tree(&args.source, args.admin_id).await?;
            finish_import(db, &args, &summary).await;
            Ok(())
        }
        Command::ImportAnimations(args) => {
            let importer = build_importer(&cfg, db.clone()).await?;
            let summary = importer
                .import_animations(&args.source, args.admin_id)
                .await?;
            finish_import(db, &args, &summary).await;
            Ok(())
        }
        Command::Serve => serve(&cfg, db).await,
    }
}

/// Wire the import pipeline and hook Ctrl-C to its cancellation token.
async fn build_importer(cfg: &AppConfig, db: Arc<SqlitePool>) -> Result<Importer> {
    ensure_storage_dir(&cfg.storage_dir).await?;

    let store = LocalContentStore::new(
        db.clone(),
        &cfg.storage_dir,
        &cfg.public_base_url,
        cfg.on_conflict,
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight uploads");
            on_signal.cancel();
        }
    });

    let importer = Importer::new(
        Arc::new(store),
        CategoryService::new(db.clone()),
        Arc::new(SqliteRegistrar::new(db.clone())),
        OperatorService::new(db),
        ImportSettings {
            project: cfg.project.clone(),
            concurrency: cfg.concurrency,
            deadline: cfg.deadline,
            reuse_existing: !cfg.refresh,
        },
    )
    .with_cancellation(cancel);

    Ok(importer)
}

/// The run is already committed; bookkeeping failures only warn.
async fn finish_import(db: Arc<SqlitePool>, args: &ImportArgs, summary: &ImportSummary) {
    if let Err(err) = log_catalog_totals(db).await {
        tracing::warn!("Could not read catalog totals: {:#}", err);
    }
    if let Err(err) = write_report(args, summary).await {
        tracing::warn!("Could not write import report: {:#}", err);
    }
}

async fn log_catalog_totals(db: Arc<SqlitePool>) -> Result<()> {
    let categories = CategoryService::new(db.clone()).count().await?;
    let resources = SqliteRegistrar::new(db).count().await?;
    tracing::info!(categories, resources, "Catalog totals");
    Ok(())
}

async fn write_report(args: &ImportArgs, summary: &ImportSummary) -> Result<()> {
    if let Some(path) = &args.report {
        let json = serde_json::to_vec_pretty(summary)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("writing report to {}", path.display()))?;
        tracing::info!("Wrote import report to {}", path.display());
    }
    Ok(())
}

async fn run_admin(db: Arc<SqlitePool>, cmd: AdminCommand) -> Result<()> {
    let operators = OperatorService::new(db);
    match cmd {
        AdminCommand::Add { email, name } => {
            let name = name.unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
            let admin = operators.create(&email, &name).await?;
            tracing::info!(id = %admin.id, email = %admin.email, "Operator registered");
            println!("{}", admin.id);
        }
        AdminCommand::List => {
            for admin in operators.list().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    admin.id,
                    admin.email,
                    admin.display_name,
                    admin.created_at.to_rfc3339()
                );
            }
        }
    }
    Ok(())
}

async fn serve(cfg: &AppConfig, db: Arc<SqlitePool>) -> Result<()> {
    ensure_storage_dir(&cfg.storage_dir).await?;

    let state = AppState {
        store: LocalContentStore::new(
            db.clone(),
            &cfg.storage_dir,
            &cfg.public_base_url,
            cfg.on_conflict,
        ),
        categories: CategoryService::new(db.clone()),
        registrar: SqliteRegistrar::new(db),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

async fn ensure_storage_dir(dir: &str) -> Result<()> {
    if !Path::new(dir).exists() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating storage directory {}", dir))?;
        tracing::info!("Created storage directory at {}", dir);
    }
    Ok(())
}
