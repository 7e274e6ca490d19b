use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use cardvault_core::models::{
    Collection, CollectionCard, CollectionDraft, CollectionId, SyncRequest, SyncResponse,
};

use crate::auth::{extract_bearer_token, AuthenticatedUser, TokenRegistry};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{
    user_fingerprint, EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot,
};
use crate::store::CollectionStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: Arc<CollectionStore>,
    tokens: Arc<TokenRegistry>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        Self {
            store: Arc::new(CollectionStore::new()),
            tokens: Arc::new(TokenRegistry::new(config.api_tokens.clone())),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            config,
        }
    }

    pub fn store(&self) -> &CollectionStore {
        &self.store
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/collections", post(create_collection))
        .route("/collections/bulk-sync", post(bulk_sync))
        .route(
            "/collections/{id}",
            put(update_collection).delete(delete_collection),
        )
        .route("/collections/{id}/cards", put(set_card))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.tokens.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn bulk_sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::BulkSync, &user.user_id)
        .await?;

    let response = state.store.bulk_sync(&user.user_id, &request).await;
    tracing::info!(
        endpoint = "bulk_sync",
        user = user_fingerprint(&user.user_id),
        claims = request.collections.len(),
        changed = response.collections.len(),
        removed = response.removed_collections.len(),
        "Served bulk sync"
    );
    Ok(Json(response))
}

async fn create_collection(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(draft): Json<CollectionDraft>,
) -> Result<(StatusCode, Json<Collection>), AppError> {
    check_mutation(&state, &user).await?;
    let collection = state.store.create_collection(&user.user_id, &draft).await?;
    tracing::info!(
        endpoint = "create_collection",
        user = user_fingerprint(&user.user_id),
        collection = %collection.id,
        "Created collection"
    );
    Ok((StatusCode::CREATED, Json(collection)))
}

async fn update_collection(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(draft): Json<CollectionDraft>,
) -> Result<Json<Collection>, AppError> {
    check_mutation(&state, &user).await?;
    let id = parse_collection_id(&id)?;
    let collection = state
        .store
        .update_collection(&user.user_id, &id, &draft)
        .await?;
    Ok(Json(collection))
}

async fn delete_collection(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    check_mutation(&state, &user).await?;
    let id = parse_collection_id(&id)?;
    state.store.delete_collection(&user.user_id, &id).await?;
    tracing::info!(
        endpoint = "delete_collection",
        user = user_fingerprint(&user.user_id),
        collection = %id,
        "Deleted collection"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn set_card(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(card): Json<CollectionCard>,
) -> Result<Json<Collection>, AppError> {
    check_mutation(&state, &user).await?;
    let id = parse_collection_id(&id)?;
    if card.collection_id != id {
        return Err(AppError::bad_request(
            "card collectionId does not match the request path",
        ));
    }
    let collection = state.store.set_card(&user.user_id, &card).await?;
    Ok(Json(collection))
}

async fn check_mutation(state: &AppState, user: &AuthenticatedUser) -> Result<(), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Mutation, &user.user_id)
        .await
}

fn parse_collection_id(raw: &str) -> Result<CollectionId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("'{raw}' is not a valid collection id")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_collection_id_rejects_garbage() {
        assert!(matches!(
            parse_collection_id("binder-1"),
            Err(AppError::BadRequest(_))
        ));
        let id = CollectionId::new();
        assert_eq!(parse_collection_id(&id.to_string()).unwrap(), id);
    }
}
