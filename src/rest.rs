//! REST API for the view configuration service (Axum).
//!
//! Handlers are thin: they extract, hop onto the blocking pool for sled and
//! bcrypt work, and let `ViewError` render the failure.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::auth::{self, IssuedKey};
use crate::catalog::{self, CatalogListing};
use crate::config::ServerConfig;
use crate::environments::{self, NewEnvironment};
use crate::error::{Result, ViewError};
use crate::expand::{expand, expand_view, ExpandedMenu, ExpandedSubMenu, ExpandedView};
use crate::gateway::get_secured_view;
use crate::importer::sync_from_source;
use crate::models::{
    Environment, KeyStatus, KeySummary, MenuDraft, MenuMaster, SubMenuDraft, SubMenuMaster, ViewDraft,
    ViewStatus, ViewSummary,
};
use crate::storage::Storage;
use crate::views::{self, CopyReport};

pub const TOKEN_HEADER: &str = "x-token";

/// Shared handler state.
pub struct AppState {
    pub storage: Storage,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(storage: Storage, config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            storage,
            config: Arc::new(config),
        })
    }
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Shape of every error body.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub status: u16,
}

#[derive(Deserialize, Debug, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueKeyRequest {
    pub created_by: Option<String>,
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct CreatedByParams {
    pub created_by: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct LookupRequest {
    pub secret: String,
}

#[derive(Deserialize, Debug, Default, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SecretParams {
    pub secret: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub env_id: Uuid,
    pub slug: String,
}

/// Environment id plus the nested view tree.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateViewRequest {
    pub env_id: Uuid,
    #[serde(flatten)]
    pub view: ViewDraft,
}

/// Same content with the tree under `viewData`.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WrappedViewRequest {
    pub env_id: Uuid,
    pub view_data: ViewDraft,
}

/// Accepted bodies for view creation.
#[derive(Serialize, Deserialize, Debug, ToSchema)]
#[serde(untagged)]
pub enum CreateViewBody {
    Wrapped(WrappedViewRequest),
    Flat(CreateViewRequest),
}

impl CreateViewBody {
    fn into_parts(self) -> (Uuid, ViewDraft) {
        match self {
            CreateViewBody::Wrapped(w) => (w.env_id, w.view_data),
            CreateViewBody::Flat(f) => (f.env_id, f.view),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CopyViewRequest {
    pub view_id: Uuid,
    pub env_ids: Vec<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncAccepted {
    pub message: String,
    pub env_id: Uuid,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        create_env_handler,
        list_envs_handler,
        get_env_handler,
        issue_key_handler,
        list_keys_handler,
        lookup_handler,
        key_action_handler,
        create_view_handler,
        get_view_handler,
        activate_view_handler,
        deactivate_view_handler,
        list_env_views_handler,
        copy_view_handler,
        catalog_handler,
        sync_handler,
        secure_view_handler,
    ),
    components(schemas(
        HealthResponse,
        ErrorBody,
        NewEnvironment,
        Environment,
        IssueKeyRequest,
        IssuedKey,
        KeySummary,
        KeyStatus,
        LookupRequest,
        LookupResponse,
        CreateViewRequest,
        WrappedViewRequest,
        CreateViewBody,
        ViewDraft,
        MenuDraft,
        SubMenuDraft,
        ViewSummary,
        ViewStatus,
        ExpandedView,
        ExpandedMenu,
        ExpandedSubMenu,
        CopyViewRequest,
        CopyReport,
        CatalogListing,
        MenuMaster,
        SubMenuMaster,
        SyncAccepted,
    )),
    tags((name = "view_config", description = "Multi-tenant view configuration API"))
)]
pub struct ApiDoc;

/// Build the router with all routes, docs and request tracing.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/envs", post(create_env_handler).get(list_envs_handler))
        .route("/envs/lookup", post(lookup_handler))
        .route("/envs/keys/:key_id/:action", post(key_action_handler))
        .route("/envs/:env_id", get(get_env_handler))
        .route("/envs/:env_id/keys", post(issue_key_handler).get(list_keys_handler))
        .route("/views", post(create_view_handler))
        .route("/views/", post(create_view_handler))
        .route("/views/copy", post(copy_view_handler))
        .route("/views/menus/all", get(catalog_handler))
        .route("/views/sync/:env_id", post(sync_handler))
        .route("/views/env/:env_id", get(list_env_views_handler))
        .route("/views/:view_id", get(get_view_handler))
        .route("/views/:view_id/activate", put(activate_view_handler))
        .route("/views/:view_id/deactivate", put(deactivate_view_handler))
        .route("/secure-views/:view_id", get(secure_view_handler))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run sled/bcrypt work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

#[utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)))]
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// --- Environments and keys ---

#[utoipa::path(
    post,
    path = "/envs",
    request_body = NewEnvironment,
    responses(
        (status = 201, body = Environment),
        (status = 400, body = ErrorBody),
        (status = 409, description = "Slug already taken", body = ErrorBody)
    )
)]
async fn create_env_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewEnvironment>,
) -> Result<(StatusCode, Json<Environment>)> {
    let storage = state.storage.clone();
    let env = blocking(move || environments::create_environment(&storage, payload)).await?;
    Ok((StatusCode::CREATED, Json(env)))
}

#[utoipa::path(get, path = "/envs", responses((status = 200, body = [Environment])))]
async fn list_envs_handler(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Environment>>> {
    let storage = state.storage.clone();
    Ok(Json(blocking(move || environments::list_environments(&storage)).await?))
}

#[utoipa::path(
    get,
    path = "/envs/{env_id}",
    params(("env_id" = Uuid, Path, description = "Environment id")),
    responses((status = 200, body = Environment), (status = 404, body = ErrorBody))
)]
async fn get_env_handler(
    State(state): State<Arc<AppState>>,
    Path(env_id): Path<Uuid>,
) -> Result<Json<Environment>> {
    let storage = state.storage.clone();
    Ok(Json(blocking(move || environments::get_environment(&storage, env_id)).await?))
}

/// The plaintext secret is in this response and nowhere else, ever.
#[utoipa::path(
    post,
    path = "/envs/{env_id}/keys",
    params(("env_id" = Uuid, Path, description = "Environment id"), CreatedByParams),
    request_body = IssueKeyRequest,
    responses((status = 201, body = IssuedKey), (status = 404, body = ErrorBody))
)]
async fn issue_key_handler(
    State(state): State<Arc<AppState>>,
    Path(env_id): Path<Uuid>,
    Query(params): Query<CreatedByParams>,
    body: Option<Json<IssueKeyRequest>>,
) -> Result<(StatusCode, Json<IssuedKey>)> {
    let created_by = body
        .and_then(|Json(b)| b.created_by)
        .or(params.created_by)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ViewError::Validation("createdBy is required".into()))?;

    let storage = state.storage.clone();
    let cost = state.config.secret_hash_cost;
    let issued = blocking(move || auth::issue_key(&storage, env_id, &created_by, cost)).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

#[utoipa::path(
    get,
    path = "/envs/{env_id}/keys",
    params(("env_id" = Uuid, Path, description = "Environment id")),
    responses((status = 200, body = [KeySummary]), (status = 404, body = ErrorBody))
)]
async fn list_keys_handler(
    State(state): State<Arc<AppState>>,
    Path(env_id): Path<Uuid>,
) -> Result<Json<Vec<KeySummary>>> {
    let storage = state.storage.clone();
    let keys = blocking(move || auth::list_keys(&storage, env_id)).await?;
    Ok(Json(keys.iter().map(KeySummary::from).collect()))
}

/// The secret may come in the JSON body or as `?secret=`.
#[utoipa::path(
    post,
    path = "/envs/lookup",
    params(SecretParams),
    request_body = LookupRequest,
    responses((status = 200, body = LookupResponse), (status = 401, body = ErrorBody))
)]
async fn lookup_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SecretParams>,
    body: Option<Json<LookupRequest>>,
) -> Result<Json<LookupResponse>> {
    let secret = body
        .map(|Json(b)| b.secret)
        .or(params.secret)
        .ok_or(ViewError::Unauthorized)?;
    let storage = state.storage.clone();
    let env = blocking(move || auth::resolve_secret(&storage, &secret)).await?;
    Ok(Json(LookupResponse {
        env_id: env.id,
        slug: env.slug,
    }))
}

#[utoipa::path(
    post,
    path = "/envs/keys/{key_id}/{action}",
    params(
        ("key_id" = Uuid, Path, description = "Key id"),
        ("action" = String, Path, description = "expire | pause | activate")
    ),
    responses(
        (status = 200, body = KeySummary),
        (status = 400, description = "Unknown action or revoked key", body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
async fn key_action_handler(
    State(state): State<Arc<AppState>>,
    Path((key_id, action)): Path<(Uuid, String)>,
) -> Result<Json<KeySummary>> {
    let status = match action.as_str() {
        "expire" => KeyStatus::Revoked,
        "pause" => KeyStatus::Inactive,
        "activate" => KeyStatus::Active,
        other => return Err(ViewError::Validation(format!("unknown key action '{}'", other))),
    };
    let storage = state.storage.clone();
    let key = blocking(move || auth::set_key_status(&storage, key_id, status)).await?;
    Ok(Json(KeySummary::from(&key)))
}

// --- Views ---

#[utoipa::path(
    post,
    path = "/views/",
    request_body = CreateViewBody,
    responses(
        (status = 201, body = ExpandedView),
        (status = 400, body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
async fn create_view_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateViewBody>,
) -> Result<(StatusCode, Json<ExpandedView>)> {
    let (env_id, draft) = payload.into_parts();
    let storage = state.storage.clone();
    let expanded = blocking(move || {
        let view = views::create_view_from_draft(&storage, env_id, &draft)?;
        expand(&storage, &view)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(expanded)))
}

#[utoipa::path(
    get,
    path = "/views/{view_id}",
    params(("view_id" = Uuid, Path, description = "View record id")),
    responses((status = 200, body = ExpandedView), (status = 404, body = ErrorBody))
)]
async fn get_view_handler(
    State(state): State<Arc<AppState>>,
    Path(view_id): Path<Uuid>,
) -> Result<Json<ExpandedView>> {
    let storage = state.storage.clone();
    Ok(Json(blocking(move || expand_view(&storage, view_id)).await?))
}

#[utoipa::path(
    put,
    path = "/views/{view_id}/activate",
    params(("view_id" = Uuid, Path, description = "View record id")),
    responses((status = 200, body = ViewSummary), (status = 404, body = ErrorBody))
)]
async fn activate_view_handler(
    State(state): State<Arc<AppState>>,
    Path(view_id): Path<Uuid>,
) -> Result<Json<ViewSummary>> {
    let storage = state.storage.clone();
    let view = blocking(move || views::activate_view(&storage, view_id)).await?;
    Ok(Json(ViewSummary::from(&view)))
}

#[utoipa::path(
    put,
    path = "/views/{view_id}/deactivate",
    params(("view_id" = Uuid, Path, description = "View record id")),
    responses(
        (status = 200, body = ViewSummary),
        (status = 400, description = "View is still a draft", body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
async fn deactivate_view_handler(
    State(state): State<Arc<AppState>>,
    Path(view_id): Path<Uuid>,
) -> Result<Json<ViewSummary>> {
    let storage = state.storage.clone();
    let view = blocking(move || views::deactivate_view(&storage, view_id)).await?;
    Ok(Json(ViewSummary::from(&view)))
}

#[utoipa::path(
    get,
    path = "/views/env/{env_id}",
    params(("env_id" = Uuid, Path, description = "Environment id")),
    responses((status = 200, body = [ViewSummary]), (status = 404, body = ErrorBody))
)]
async fn list_env_views_handler(
    State(state): State<Arc<AppState>>,
    Path(env_id): Path<Uuid>,
) -> Result<Json<Vec<ViewSummary>>> {
    let storage = state.storage.clone();
    let listed = blocking(move || views::list_views(&storage, env_id)).await?;
    Ok(Json(listed.iter().map(ViewSummary::from).collect()))
}

#[utoipa::path(
    post,
    path = "/views/copy",
    request_body = CopyViewRequest,
    responses((status = 200, body = CopyReport), (status = 404, body = ErrorBody))
)]
async fn copy_view_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CopyViewRequest>,
) -> Result<Json<CopyReport>> {
    let storage = state.storage.clone();
    let report = blocking(move || views::copy_view(&storage, payload.view_id, &payload.env_ids)).await?;
    Ok(Json(report))
}

#[utoipa::path(get, path = "/views/menus/all", responses((status = 200, body = CatalogListing)))]
async fn catalog_handler(State(state): State<Arc<AppState>>) -> Result<Json<CatalogListing>> {
    let storage = state.storage.clone();
    Ok(Json(blocking(move || catalog::list_catalog(&storage)).await?))
}

/// Fire-and-forget: the import outcome only reaches the logs.
#[utoipa::path(
    post,
    path = "/views/sync/{env_id}",
    params(("env_id" = Uuid, Path, description = "Environment to rebuild")),
    responses(
        (status = 202, body = SyncAccepted),
        (status = 400, description = "No source configured", body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
async fn sync_handler(
    State(state): State<Arc<AppState>>,
    Path(env_id): Path<Uuid>,
) -> Result<(StatusCode, Json<SyncAccepted>)> {
    if state.config.source_api_url.is_none() {
        return Err(ViewError::Validation("SOURCE_API_URL is not configured".into()));
    }
    let storage = state.storage.clone();
    blocking(move || environments::get_environment(&storage, env_id)).await?;

    let storage = state.storage.clone();
    let config = state.config.clone();
    tokio::spawn(async move {
        match sync_from_source(storage, config, env_id).await {
            Ok(report) => info!(env_id = %env_id, processed = report.views_processed, "Background sync completed"),
            Err(e) => error!(env_id = %env_id, error = %e, "Background sync failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(SyncAccepted {
            message: "View synchronization started".to_string(),
            env_id,
        }),
    ))
}

// --- Secured read ---

#[utoipa::path(
    get,
    path = "/secure-views/{view_id}",
    params(
        ("view_id" = String, Path, description = "Tenant view id or view name"),
        ("X-Token" = String, Header, description = "Environment secret")
    ),
    responses(
        (status = 200, body = ExpandedView),
        (status = 401, body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
async fn secure_view_handler(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ExpandedView>> {
    let secret = headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or(ViewError::Unauthorized)?;

    let storage = state.storage.clone();
    Ok(Json(blocking(move || get_secured_view(&storage, &identifier, &secret)).await?))
}
