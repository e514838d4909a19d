//! Route handlers.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::auth::{Permission, RouteClass};
use crate::error::{FindexError, Result};
use crate::registry::DirStatus;

use super::types::*;
use super::{client_ip, ApiError, AppState};

type Handler<T> = std::result::Result<T, ApiError>;

/// Decode a JSON body into a typed request, mapping unknown enum values and
/// missing fields to 400 instead of the extractor's default.
fn parse_body<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| FindexError::InvalidInput(format!("invalid request body: {}", e)))
}

/// Directory paths arrive via wildcard segments without their leading slash.
fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

// ---- System ----

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

pub async fn info() -> Json<Value> {
    Json(json!({
        "name": "findex",
        "version": env!("CARGO_PKG_VERSION"),
        "docs": "/api/info",
    }))
}

// ---- Auth ----

pub async fn create_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Handler<Json<ApiResponse>> {
    state.gate_admin(&headers).await?;
    let req: CreateKeyRequest = parse_body(body)?;

    let (api_key, key_info) = state
        .auth
        .store()
        .create(&req.name, req.description.as_deref(), req.expires_days, req.permissions)
        .await?;

    // The plaintext key appears in this response and nowhere else
    Ok(Json(ApiResponse::ok(
        "API key created successfully",
        json!({ "api_key": api_key, "key_info": key_info }),
    )))
}

pub async fn list_keys(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Handler<Json<ApiResponse>> {
    state.gate_admin(&headers).await?;
    let keys = state.auth.store().list().await?;
    Ok(Json(ApiResponse::ok("keys listed", json!({ "keys": keys }))))
}

pub async fn revoke_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key_id): Path<String>,
) -> Handler<Json<ApiResponse>> {
    state.gate_admin(&headers).await?;
    let info = state.auth.store().revoke(&key_id).await?;
    Ok(Json(ApiResponse::ok(
        format!("API key '{}' revoked", info.name),
        json!({ "ok": true }),
    )))
}

pub async fn validate_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Handler<Json<ApiResponse>> {
    state
        .limiter
        .check_request(&client_ip(&headers), RouteClass::General)?;
    let req: KeyCredentialRequest = parse_body(body)?;
    let key_info = state.auth.store().validate(&req.api_key).await?;
    Ok(Json(ApiResponse::ok(
        "API key is valid",
        json!({ "key_info": key_info }),
    )))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Handler<Json<ApiResponse>> {
    state
        .limiter
        .check_request(&client_ip(&headers), RouteClass::General)?;
    let req: KeyCredentialRequest = parse_body(body)?;
    let (access_token, expires_in, _info) = state.auth.login(&req.api_key).await?;
    Ok(Json(ApiResponse::ok(
        "login successful",
        json!({
            "access_token": access_token,
            "token_type": "bearer",
            "expires_in": expires_in,
        }),
    )))
}

// ---- Directories ----

pub async fn add_directory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AddDirectoryQuery>,
) -> Handler<Json<ApiResponse>> {
    state.gate(&headers, Permission::Index, RouteClass::Index).await?;
    let entry = state.registry.add(&query.path).await?;
    Ok(Json(ApiResponse::ok(
        format!("directory added: {}", entry.path),
        json!({ "directory": entry }),
    )))
}

pub async fn list_directories(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Handler<Json<ApiResponse>> {
    state.gate(&headers, Permission::Index, RouteClass::General).await?;
    let directories = state.registry.list().await?;
    Ok(Json(ApiResponse::ok(
        "directories listed",
        json!({ "directories": directories }),
    )))
}

pub async fn directory_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Handler<Json<DirectoryStatusResponse>> {
    state.gate(&headers, Permission::Index, RouteClass::General).await?;
    let path = normalize_path(&path);

    let entry = state
        .registry
        .get(&path)
        .await?
        .ok_or_else(|| FindexError::NotFound(format!("directory not found: {}", path)))?;

    let message = entry
        .last_task_id
        .as_deref()
        .and_then(|id| state.scheduler.task_status(id))
        .and_then(|task| task.message);

    Ok(Json(DirectoryStatusResponse {
        path: entry.path,
        status: entry.status.as_str().to_string(),
        progress: entry.progress,
        total_files: entry.total_files,
        indexed_files: entry.indexed_files,
        task_id: entry.last_task_id,
        message,
    }))
}

pub async fn refresh_directory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Handler<Json<ApiResponse>> {
    state.gate(&headers, Permission::Index, RouteClass::Index).await?;
    let path = normalize_path(&path);

    if state.registry.get(&path).await?.is_none() {
        return Err(FindexError::NotFound(format!("directory not found: {}", path)).into());
    }

    let task_id = state.scheduler.spawn(&path).await?;
    Ok(Json(ApiResponse::ok(
        format!("indexing started for: {}", path),
        json!({ "task_id": task_id }),
    )))
}

pub async fn remove_directory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(path): Path<String>,
) -> Handler<Json<ApiResponse>> {
    state.gate(&headers, Permission::Index, RouteClass::Index).await?;
    let path = normalize_path(&path);

    if state.registry.get(&path).await?.is_none() {
        return Err(FindexError::NotFound(format!("directory not found: {}", path)).into());
    }

    let purged = state.scheduler.purge_directory(&path).await?;
    Ok(Json(ApiResponse::ok(
        format!("directory removed: {}", path),
        json!({ "sources_purged": purged }),
    )))
}

// ---- Search ----

pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Handler<Json<SearchResponse>> {
    state.gate(&headers, Permission::Search, RouteClass::Search).await?;
    let req: SearchRequest = parse_body(body)?;

    if req.limit == 0 || req.limit > 100 {
        return Err(FindexError::InvalidInput("limit must be between 1 and 100".to_string()).into());
    }
    if !(0.0..=1.0).contains(&req.threshold) {
        return Err(
            FindexError::InvalidInput("threshold must be between 0.0 and 1.0".to_string()).into(),
        );
    }

    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(state.config.search.timeout_secs);
    let hits = tokio::time::timeout(
        timeout,
        state.engine.search(&req.query, req.search_type, req.limit, req.threshold),
    )
    .await
    .map_err(|_| FindexError::Search("search timed out".to_string()))??;

    let results: Vec<SearchResultItem> = hits.into_iter().map(SearchResultItem::from).collect();
    Ok(Json(SearchResponse {
        query: req.query,
        search_type: req.search_type,
        total_results: results.len(),
        search_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        results,
    }))
}

// ---- Stats ----

pub async fn system_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Handler<Json<ApiResponse>> {
    state.gate(&headers, Permission::Read, RouteClass::General).await?;

    let store_stats = state.store.stats().await?;
    let directories = state.registry.list().await?;
    let by_status: Vec<(String, usize)> = state.registry.status_counts().await?;
    let total_files: usize = directories.iter().map(|d| d.indexed_files).sum();
    let key_count = state.auth.store().count().await?;

    Ok(Json(ApiResponse::ok(
        "system statistics",
        json!({
            "chunks": {
                "total": store_stats.total_chunks,
                "embedded": store_stats.embedded_chunks,
            },
            "sources": store_stats.total_sources,
            "embedding": {
                "provider": state.config.embeddings.provider,
                "model": state.config.embeddings.model,
                "dimensions": state.config.embeddings.dimensions,
            },
            "directories": {
                "total": directories.len(),
                "by_status": by_status.into_iter().collect::<std::collections::HashMap<_, _>>(),
                "indexing": directories.iter().filter(|d| d.status == DirStatus::Indexing).count(),
            },
            "files": { "total": total_files },
            "api_keys": key_count,
            "data_dir": state.config.storage.data_dir,
        }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{build_router, AppState};
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use std::path::Path as FsPath;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    const ADMIN_KEY: &str = "test-admin-secret";

    async fn setup() -> (Router, AppState, TempDir) {
        std::env::set_var("FINDEX_TEST_ADMIN_KEY", ADMIN_KEY);

        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = tmp.path().join("data");
        config.server.admin_key_env = "FINDEX_TEST_ADMIN_KEY".to_string();

        let migrations_dir = FsPath::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        let state = AppState::build(config, &migrations_dir).await.unwrap();
        (build_router(state.clone()), state, tmp)
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn create_key(router: &Router, name: &str, permissions: &[&str]) -> String {
        let (status, body) = send(
            router,
            "POST",
            "/api/v1/auth/create-key",
            Some(ADMIN_KEY),
            Some(json!({ "name": name, "permissions": permissions })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "create-key failed: {}", body);
        body["data"]["api_key"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let (router, _state, _tmp) = setup().await;
        let (status, body) = send(&router, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_info_is_public() {
        let (router, _state, _tmp) = setup().await;
        let (status, body) = send(&router, "GET", "/api/info", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "findex");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_search_requires_auth() {
        let (router, _state, _tmp) = setup().await;
        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/searcher/search",
            None,
            Some(json!({ "query": "anything" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_create_key_requires_admin() {
        let (router, _state, _tmp) = setup().await;
        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/auth/create-key",
            Some("not-the-admin"),
            Some(json!({ "name": "nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_key_lifecycle_and_permission_enforcement() {
        let (router, _state, _tmp) = setup().await;
        let docs = TempDir::new().unwrap();
        let search_key = create_key(&router, "search-only", &["search"]).await;

        // Search permission works on the search route
        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/searcher/search",
            Some(&search_key),
            Some(json!({ "query": "python" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // ...but not on directory mutation
        let uri = format!(
            "/api/v1/directories/add?path={}",
            docs.path().to_str().unwrap()
        );
        let (status, _) = send(&router, "POST", &uri, Some(&search_key), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Revoke, then the key stops authenticating
        let (_, keys_body) = send(&router, "GET", "/api/v1/auth/list-keys", Some(ADMIN_KEY), None).await;
        let key_id = keys_body["data"]["keys"][0]["id"].as_str().unwrap().to_string();
        let (status, _) = send(
            &router,
            "DELETE",
            &format!("/api/v1/auth/revoke-key/{}", key_id),
            Some(ADMIN_KEY),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/searcher/search",
            Some(&search_key),
            Some(json!({ "query": "python" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_validate_key_endpoint() {
        let (router, _state, _tmp) = setup().await;
        let key = create_key(&router, "valid", &["read"]).await;

        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/auth/validate-key",
            None,
            Some(json!({ "api_key": key })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["key_info"]["name"], "valid");

        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/auth/validate-key",
            None,
            Some(json!({ "api_key": "ds_bogus" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_issues_usable_token() {
        let (router, _state, _tmp) = setup().await;
        let key = create_key(&router, "jwt-user", &["search"]).await;

        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({ "api_key": key })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["token_type"], "bearer");
        let token = body["data"]["access_token"].as_str().unwrap().to_string();

        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/searcher/search",
            Some(&token),
            Some(json!({ "query": "python" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_register_index_and_search_flow() {
        let (router, _state, _tmp) = setup().await;
        let docs = TempDir::new().unwrap();
        std::fs::write(docs.path().join("a.txt"), "Python is a language. Python is great.").unwrap();
        std::fs::write(docs.path().join("b.txt"), "Java is an object-oriented language.").unwrap();

        let key = create_key(&router, "indexer", &["index", "search", "read"]).await;
        let dir_path = docs.path().to_str().unwrap().to_string();

        // Register
        let (status, _) = send(
            &router,
            "POST",
            &format!("/api/v1/directories/add?path={}", dir_path),
            Some(&key),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // Refresh returns a task id immediately
        let (status, body) = send(
            &router,
            "POST",
            &format!("/api/v1/directories/refresh{}", dir_path),
            Some(&key),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let task_id = body["data"]["task_id"].as_str().unwrap().to_string();
        assert!(task_id.starts_with("dir_"));

        // Poll status until indexed
        let status_uri = format!("/api/v1/directories/status{}", dir_path);
        let mut last = Value::Null;
        for _ in 0..200 {
            let (code, body) = send(&router, "GET", &status_uri, Some(&key), None).await;
            assert_eq!(code, StatusCode::OK);
            last = body;
            if last["status"] == "indexed" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(last["status"], "indexed", "directory never finished: {}", last);
        assert_eq!(last["progress"], 1.0);
        assert_eq!(last["total_files"], 2);

        // Keyword search finds the right document first
        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/searcher/search",
            Some(&key),
            Some(json!({ "query": "python", "search_type": "keyword", "limit": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["total_results"].as_u64().unwrap() >= 1);
        assert_eq!(body["results"][0]["display_name"], "a.txt");
        assert!(body["search_time_ms"].as_f64().unwrap() >= 0.0);

        // Stats reflect the ingest
        let (status, body) = send(&router, "GET", "/api/v1/stats/system", Some(&key), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["chunks"]["total"].as_u64().unwrap() >= 2);

        // Remove wipes everything under the directory
        let (status, _) = send(
            &router,
            "DELETE",
            &format!("/api/v1/directories/remove{}", dir_path),
            Some(&key),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/searcher/search",
            Some(&key),
            Some(json!({ "query": "python" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_results"], 0);
    }

    #[tokio::test]
    async fn test_add_directory_invalid_paths() {
        let (router, _state, _tmp) = setup().await;
        let key = create_key(&router, "indexer", &["index"]).await;

        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/directories/add?path=/definitely/missing",
            Some(&key),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let docs = TempDir::new().unwrap();
        let uri = format!("/api/v1/directories/add?path={}", docs.path().to_str().unwrap());
        let (status, _) = send(&router, "POST", &uri, Some(&key), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&router, "POST", &uri, Some(&key), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_search_type_is_bad_request() {
        let (router, _state, _tmp) = setup().await;
        let key = create_key(&router, "searcher", &["search"]).await;

        let (status, body) = send(
            &router,
            "POST",
            "/api/v1/searcher/search",
            Some(&key),
            Some(json!({ "query": "x", "search_type": "mystical" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_semantic_search_without_embedder_is_503() {
        let (router, _state, _tmp) = setup().await;
        let key = create_key(&router, "searcher", &["search"]).await;

        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/searcher/search",
            Some(&key),
            Some(json!({ "query": "x", "search_type": "semantic" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_search_rate_limit() {
        std::env::set_var("FINDEX_TEST_ADMIN_KEY", ADMIN_KEY);
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.data_dir = tmp.path().join("data");
        config.server.admin_key_env = "FINDEX_TEST_ADMIN_KEY".to_string();
        config.rate_limit.search_per_minute = 2;

        let migrations_dir = FsPath::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        let state = AppState::build(config, &migrations_dir).await.unwrap();
        let router = build_router(state);

        let key = create_key(&router, "limited", &["search"]).await;
        let body = json!({ "query": "python" });

        for _ in 0..2 {
            let (status, _) = send(
                &router,
                "POST",
                "/api/v1/searcher/search",
                Some(&key),
                Some(body.clone()),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/searcher/search")
            .header("authorization", format!("Bearer {}", key))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("Retry-After"));
    }

    #[tokio::test]
    async fn test_invalid_limit_rejected() {
        let (router, _state, _tmp) = setup().await;
        let key = create_key(&router, "searcher", &["search"]).await;

        let (status, _) = send(
            &router,
            "POST",
            "/api/v1/searcher/search",
            Some(&key),
            Some(json!({ "query": "x", "limit": 500 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_unknown_directory_404() {
        let (router, _state, _tmp) = setup().await;
        let key = create_key(&router, "indexer", &["index"]).await;

        let (status, _) = send(
            &router,
            "GET",
            "/api/v1/directories/status/no/such/dir",
            Some(&key),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
