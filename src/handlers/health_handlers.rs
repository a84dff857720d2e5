//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and disk I/O

use crate::handlers::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::SqlitePool;
use std::{collections::HashMap, path::Path};
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness probe, never touches I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 200 when SQLite answers `SELECT 1` and a probe file can be written, read
/// back and removed under the storage directory; 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = HashMap::new();
    checks.insert("sqlite", check_sqlite(&state.store.db).await);
    checks.insert("disk", check_disk(&state.store.base_path).await);

    let ready = checks.values().all(|c| c.ok);
    let body = ReadyResponse {
        status: if ready { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_sqlite(db: &SqlitePool) -> CheckStatus {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db).await {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    }
}

async fn check_disk(base_path: &Path) -> CheckStatus {
    let probe = base_path.join(format!(".readyz-{}", Uuid::new_v4()));
    if let Err(e) = fs::write(&probe, b"readyz").await {
        return CheckStatus::failed(format!("could not write probe file: {}", e));
    }

    let status = match fs::read(&probe).await {
        Ok(bytes) if bytes == b"readyz" => CheckStatus::ok(),
        Ok(_) => CheckStatus::failed("probe file content mismatch".into()),
        Err(e) => CheckStatus::failed(format!("could not read probe file: {}", e)),
    };

    match fs::remove_file(&probe).await {
        Err(e) if status.ok => CheckStatus {
            ok: true,
            error: Some(format!("could not remove probe file: {}", e)),
        },
        _ => status,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
