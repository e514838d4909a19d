//! HTTP surface: router assembly, the auth/rate gate, and error mapping.

pub mod routes;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthContext, AuthService, Permission, RateLimiter, RouteClass};
use crate::config::Config;
use crate::db::{migrate, Db};
use crate::embeddings::{create_embedder, Embedder};
use crate::error::{FindexError, Result};
use crate::extract::ExtractorRegistry;
use crate::index::LexicalIndex;
use crate::ledger::Ledger;
use crate::registry::DirectoryRegistry;
use crate::scheduler::IndexScheduler;
use crate::search::SearchEngine;
use crate::store::ChunkStore;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: DirectoryRegistry,
    pub scheduler: IndexScheduler,
    pub engine: Arc<SearchEngine>,
    pub store: ChunkStore,
    pub ledger: Ledger,
    pub auth: Arc<AuthService>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wire up every component against the configured data root.
    ///
    /// Opens the database, applies migrations, rebuilds the lexical index
    /// from the chunk store, and constructs the embedder once.
    pub async fn build(config: Config, migrations_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(&config.storage.data_dir)?;

        let db = Db::new(config.db_path());
        let dir = migrations_dir.to_path_buf();
        db.with_connection(move |conn| migrate::run_migrations(conn, &dir)).await?;

        let store = ChunkStore::new(db.clone());
        let ledger = Ledger::new(db.clone());
        let registry = DirectoryRegistry::new(db.clone());

        let interrupted = registry.reset_interrupted().await?;
        if interrupted > 0 {
            log::warn!("{} directories were mid-index at last shutdown", interrupted);
        }

        let lexical = Arc::new(LexicalIndex::new());
        let chunks = store.all_chunk_texts().await?;
        lexical.rebuild(&chunks);
        log::info!("Lexical index rebuilt over {} chunks", chunks.len());

        let embedder: Arc<dyn Embedder> = create_embedder(&config.embeddings)?;
        let extractors = Arc::new(ExtractorRegistry::new(config.indexing.max_file_size_bytes));

        let scheduler = IndexScheduler::new(
            store.clone(),
            ledger.clone(),
            registry.clone(),
            Arc::clone(&lexical),
            Arc::clone(&embedder),
            extractors,
            &config,
        );

        let engine = Arc::new(SearchEngine::new(
            store.clone(),
            ledger.clone(),
            lexical,
            embedder,
            config.search.clone(),
        ));

        let auth = Arc::new(AuthService::new(
            crate::auth::ApiKeyStore::new(db),
            config.admin_key(),
        ));
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));

        Ok(Self {
            config: Arc::new(config),
            registry,
            scheduler,
            engine,
            store,
            ledger,
            auth,
            limiter,
        })
    }

    /// Full gate for protected routes: bearer extraction, credential
    /// validation, permission check, then rate limiting keyed by the key id.
    pub async fn gate(
        &self,
        headers: &HeaderMap,
        permission: Permission,
        class: RouteClass,
    ) -> Result<AuthContext> {
        let bearer = bearer_token(headers)?;
        let ctx = self.auth.authenticate(bearer).await?;
        if !ctx.has_permission(permission) {
            return Err(FindexError::Forbidden(format!(
                "key {} lacks the required permission",
                ctx.key_name
            )));
        }
        self.limiter.check_request(&ctx.key_id, class)?;
        Ok(ctx)
    }

    /// Gate for key-lifecycle routes, rate-limited by caller address.
    pub async fn gate_admin(&self, headers: &HeaderMap) -> Result<()> {
        let bearer = bearer_token(headers)?;
        self.auth.require_admin(bearer).await?;
        self.limiter.check_request(&client_ip(headers), RouteClass::General)?;
        Ok(())
    }
}

/// Extract the bearer token from the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            FindexError::Unauthenticated(
                "missing Authorization header; use 'Authorization: Bearer <api-key>'".to_string(),
            )
        })?;

    value.strip_prefix("Bearer ").ok_or_else(|| {
        FindexError::Unauthenticated(
            "invalid Authorization header format; use 'Authorization: Bearer <api-key>'".to_string(),
        )
    })
}

/// Rate-limit identity for unauthenticated callers: the forwarded client
/// address when behind a proxy, otherwise a fixed local bucket.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "local".to_string())
}

/// Error wrapper implementing the HTTP status mapping.
pub struct ApiError(pub FindexError);

impl From<FindexError> for ApiError {
    fn from(err: FindexError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let (status, message) = match &err {
            FindexError::InvalidInput(m) => (StatusCode::BAD_REQUEST, m.clone()),
            FindexError::Unauthenticated(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            FindexError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            FindexError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            FindexError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            FindexError::RateLimited { retry_after_secs } => {
                let body = Json(serde_json::json!({
                    "success": false,
                    "message": "rate limit exceeded, please try again later",
                    "error": "rate_limited"
                }));
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                if let Ok(value) = retry_after_secs.to_string().parse() {
                    response.headers_mut().insert("Retry-After", value);
                }
                return response;
            }
            FindexError::EmbedderUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            // Internal details are logged, not surfaced
            other => {
                log::error!("internal error: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(serde_json::json!({
            "success": false,
            "message": message,
            "error": status.canonical_reason().unwrap_or("error"),
        }));
        (status, body).into_response()
    }
}

/// Assemble the router.
pub fn build_router(state: AppState) -> Router {
    let allowed_origins = state.config.server.allowed_origins.clone();

    let cors = if allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> =
            allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/info", get(routes::info))
        .route("/api/v1/auth/create-key", post(routes::create_key))
        .route("/api/v1/auth/list-keys", get(routes::list_keys))
        .route("/api/v1/auth/revoke-key/:key_id", delete(routes::revoke_key))
        .route("/api/v1/auth/validate-key", post(routes::validate_key))
        .route("/api/v1/auth/login", post(routes::login))
        .route("/api/v1/directories/add", post(routes::add_directory))
        .route("/api/v1/directories/list", get(routes::list_directories))
        .route("/api/v1/directories/status/*path", get(routes::directory_status))
        .route("/api/v1/directories/refresh/*path", post(routes::refresh_directory))
        .route("/api/v1/directories/remove/*path", delete(routes::remove_directory))
        .route("/api/v1/searcher/search", post(routes::search))
        .route("/api/v1/stats/system", get(routes::system_stats))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        FindexError::Config(format!("failed to bind {}: {}", addr, e))
    })?;

    log::info!("Serving HTTP API on http://{}", addr);
    axum::serve(listener, app)
        .await
        .map_err(|e| FindexError::Internal(format!("HTTP server error: {}", e)))?;

    Ok(())
}
