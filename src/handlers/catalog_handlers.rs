//! Read-only views over the imported catalog.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::{category::Category, resource::Resource},
};
use axum::{
    Json,
    extract::{Query, State},
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_MAX_KEYS: usize = 100;
const MAX_KEYS_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct CategoryQuery {
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceQuery {
    pub category_id: Option<Uuid>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResourcePage {
    pub resources: Vec<Resource>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// `GET /categories?parent_id=`: children of `parent_id`, roots when absent.
pub async fn list_categories(
    State(state): State<AppState>,
    Query(q): Query<CategoryQuery>,
) -> Result<Json<Vec<Category>>, AppError> {
    Ok(Json(state.categories.list_children(q.parent_id).await?))
}

/// `GET /resources?category_id=&max-keys=&continuation-token=`
pub async fn list_resources(
    State(state): State<AppState>,
    Query(q): Query<ResourceQuery>,
) -> Result<Json<ResourcePage>, AppError> {
    let max_keys = q.max_keys.unwrap_or(DEFAULT_MAX_KEYS).clamp(1, MAX_KEYS_LIMIT);
    let after = q
        .continuation_token
        .as_deref()
        .map(decode_continuation_token)
        .transpose()?;

    let mut resources = state
        .registrar
        .list(
            q.category_id,
            after.as_ref().map(|(k, s)| (k.as_str(), s.as_str())),
            max_keys + 1,
        )
        .await?;

    let is_truncated = resources.len() > max_keys;
    resources.truncate(max_keys);
    let next_continuation_token = if is_truncated {
        resources
            .last()
            .map(|r| encode_continuation_token(&r.storage_key, &r.resource_id))
    } else {
        None
    };

    Ok(Json(ResourcePage {
        resources,
        is_truncated,
        next_continuation_token,
    }))
}

/// Storage keys never contain control characters, so `\n` separates the pair.
fn encode_continuation_token(storage_key: &str, resource_id: &str) -> String {
    general_purpose::STANDARD.encode(format!("{}\n{}", storage_key, resource_id))
}

fn decode_continuation_token(token: &str) -> Result<(String, String), AppError> {
    let invalid = || AppError::bad_request("invalid continuation-token");
    let bytes = general_purpose::STANDARD
        .decode(token)
        .map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (key, slug) = text.split_once('\n').ok_or_else(invalid)?;
    Ok((key.to_string(), slug.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory_pool,
        services::{
            category_service::CategoryService,
            content_store::{ConflictPolicy, LocalContentStore},
            operator::OperatorService,
            registrar::{Classification, Registrar, ResourceDescriptor, SqliteRegistrar},
        },
    };
    use axum::http::StatusCode;
    use serde_json::Map;
    use tempfile::TempDir;

    async fn seeded(dir: &TempDir) -> (AppState, Uuid) {
        let db = memory_pool().await;
        let state = AppState {
            store: LocalContentStore::new(
                db.clone(),
                dir.path(),
                "http://assets.local",
                ConflictPolicy::Overwrite,
            ),
            categories: CategoryService::new(db.clone()),
            registrar: SqliteRegistrar::new(db.clone()),
        };
        let admin = OperatorService::new(db)
            .create("ops@example.com", "Ops")
            .await
            .unwrap();
        let props = state
            .categories
            .ensure("props", None, 0, "props")
            .await
            .unwrap()
            .category;
        state
            .categories
            .ensure("chairs", Some(props.id), 1, "props/chairs")
            .await
            .unwrap();

        for name in ["a", "b", "c", "d", "e"] {
            let key = format!("proj/props/{}.glb", name);
            state
                .registrar
                .register(ResourceDescriptor {
                    name: name.into(),
                    description: None,
                    storage_url: state.store.url_for(&key),
                    storage_key: key,
                    file_size: 1,
                    file_type: "glb".into(),
                    mime_type: "model/gltf-binary".into(),
                    checksum: "00".into(),
                    classification: Classification::Category(props.id),
                    resource_id: name.into(),
                    metadata: Map::new(),
                    uploaded_by_admin_id: admin.id,
                })
                .await
                .unwrap();
        }
        (state, props.id)
    }

    #[tokio::test]
    async fn categories_list_roots_and_children() {
        let dir = TempDir::new().unwrap();
        let (state, props_id) = seeded(&dir).await;

        let Json(roots) = list_categories(State(state.clone()), Query(CategoryQuery { parent_id: None }))
            .await
            .unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].path, "props");

        let Json(children) = list_categories(
            State(state),
            Query(CategoryQuery {
                parent_id: Some(props_id),
            }),
        )
        .await
        .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].path, "props/chairs");
        assert_eq!(children[0].level, 1);
    }

    #[tokio::test]
    async fn resources_page_with_continuation_tokens() {
        let dir = TempDir::new().unwrap();
        let (state, props_id) = seeded(&dir).await;

        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let Json(page) = list_resources(
                State(state.clone()),
                Query(ResourceQuery {
                    category_id: Some(props_id),
                    max_keys: Some(2),
                    continuation_token: token.take(),
                }),
            )
            .await
            .unwrap();
            seen.extend(page.resources.into_iter().map(|r| r.resource_id));
            match page.next_continuation_token {
                Some(next) => {
                    assert!(page.is_truncated);
                    token = Some(next);
                }
                None => break,
            }
        }
        assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (state, _) = seeded(&dir).await;

        let err = list_resources(
            State(state),
            Query(ResourceQuery {
                category_id: None,
                max_keys: None,
                continuation_token: Some("!!not base64!!".into()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn token_carries_key_and_slug() {
        let token = encode_continuation_token("proj/props/a.glb", "a");
        let (key, slug) = decode_continuation_token(&token).unwrap();
        assert_eq!(key, "proj/props/a.glb");
        assert_eq!(slug, "a");
    }
}
