use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use kuma_core::{SyncResponse, SyncService, TimeEntry};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AccessTokenVerifier, AuthenticatedUser};
use crate::auth_proxy::AuthServiceProxy;
use crate::config::AppConfig;
use crate::error::AppError;

pub const REVISION_HEADER: HeaderName = HeaderName::from_static("x-kuma-revision");
const CORS_MAX_AGE: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    sync: SyncService,
    token_verifier: Arc<AccessTokenVerifier>,
    auth_proxy: Arc<AuthServiceProxy>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, sync: SyncService) -> Result<Self, AppError> {
        Ok(Self {
            token_verifier: Arc::new(AccessTokenVerifier::new(config.clone())?),
            auth_proxy: Arc::new(AuthServiceProxy::new(config.auth_service_url.clone())?),
            sync,
            config,
        })
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", post(sync_entries))
        .layer(DefaultBodyLimit::max(state.config.sync_max_body_bytes))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/auth/{*path}", get(proxy_auth).post(proxy_auth))
        .merge(protected_routes)
        .layer(SetResponseHeaderLayer::overriding(
            REVISION_HEADER,
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .expose_headers([CONTENT_LENGTH, REVISION_HEADER])
        .max_age(CORS_MAX_AGE)
        .allow_credentials(true)
}

async fn index() -> &'static str {
    "kuma sync server"
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state
        .token_verifier
        .verify_access_token(token)
        .await
        .map_err(|error| match error {
            // `/sync` answers 401 or 500 only; auth service outages count as 401.
            AppError::External(detail) => {
                AppError::unauthorized(format!("Could not verify credential: {detail}"))
            }
            other => other,
        })?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn proxy_auth(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    state.auth_proxy.forward(method, &uri, &headers, body).await
}

async fn sync_entries(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Bytes,
) -> Result<Json<SyncResponse>, AppError> {
    let incoming: Vec<TimeEntry> = serde_json::from_slice(&body).map_err(|error| {
        AppError::bad_request(format!(
            "body must be a JSON array of time entries: {error}"
        ))
    })?;

    let (outcome, entries) = state
        .sync
        .sync_with_outcome(&user.user_id, &incoming)
        .await?;

    tracing::info!(
        endpoint = "sync",
        user = user_fingerprint(user.user_id.as_str()),
        session = user.session_id.as_deref().unwrap_or("none"),
        received = incoming.len(),
        inserted = outcome.inserted,
        updated = outcome.updated,
        stale = outcome.stale,
        returned = entries.len(),
        "Synced time entries"
    );

    Ok(Json(SyncResponse {
        synced_ids: outcome.synced_ids,
        entries,
    }))
}

fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}
