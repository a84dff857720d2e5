//! HTTP handlers serving stored payloads back by key.
//! Bodies are streamed from disk, never buffered whole.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::object::StoredObject,
    services::content_store::ContentStoreError,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;

/// `GET /objects/{*key}` as a streaming response.
pub async fn get_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let (meta, file) = state.store.open_object(&key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);

    Ok(response)
}

/// `HEAD /objects/{*key}`, same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let meta = state
        .store
        .find_object(&key)
        .await?
        .ok_or(ContentStoreError::NotFound(key))?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);

    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(meta.size_bytes.max(0) as u64),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", meta.etag)) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
