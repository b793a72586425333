//! Driftboard document server
//!
//! Serves the document backend over HTTP. Every `/api` request is scoped to
//! the owner named by the `x-owner-id` header.
//!
//! ## Routes
//!
//! ```text
//! GET    /api/drawings               list active drawings, newest first
//! GET    /api/drawings/recent        id of the most recently updated drawing
//! GET    /api/drawings/{id}          fetch a drawing
//! PUT    /api/drawings/{id}          upsert drawing content
//! DELETE /api/drawings/{id}          soft-delete
//! PATCH  /api/drawings/{id}/name     rename
//! PUT    /api/drawings/{id}/folder   move into or out of a folder
//! GET    /api/folders                list folders
//! POST   /api/folders                create a folder
//! PATCH  /api/folders/{id}           rename a folder
//! DELETE /api/folders/{id}           soft-delete a folder and, later, its drawings
//! POST   /api/blobs                  store the request body as a blob
//! GET    /api/blobs/{ref}            read a blob
//! ```

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use bytes::Bytes;
use driftboard_core::Settings;
use driftboard_core::document::{BlobRef, Drawing, DrawingId, DrawingSummary, Folder, FolderId, NewFolder, OwnerId, SaveDrawing};
use driftboard_core::storage::{Backend, FileBackend, MemoryBackend, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Header carrying the signed-in user.
const OWNER_HEADER: &str = "x-owner-id";

/// Content type assumed for uploads without one.
const DEFAULT_BLOB_TYPE: &str = "application/octet-stream";

/// Shared application state
#[derive(Clone)]
struct AppState {
    backend: Arc<dyn Backend>,
}

/// The owner a request acts for.
struct Owner(OwnerId);

/// Read the owner from request headers.
fn owner_from_headers(headers: &HeaderMap) -> Result<OwnerId, StorageError> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(OwnerId::from)
        .ok_or(StorageError::Unauthenticated)
}

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        owner_from_headers(&parts.headers).map(Owner).map_err(ApiError)
    }
}

/// A backend error rendered as a JSON response.
#[derive(Debug)]
struct ApiError(StorageError);

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self(err)
    }
}

fn status_for(err: &StorageError) -> StatusCode {
    match err {
        StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
        StorageError::Validation(_) => StatusCode::BAD_REQUEST,
        StorageError::Permission(_) => StatusCode::FORBIDDEN,
        StorageError::Unauthenticated => StatusCode::UNAUTHORIZED,
        StorageError::Serialization(_) | StorageError::Io(_) | StorageError::Other(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Content of a drawing upsert. The id comes from the path.
#[derive(Debug, Deserialize)]
struct SaveBody {
    #[serde(default)]
    elements: Vec<Value>,
    #[serde(default)]
    app_state: Value,
    #[serde(default)]
    files: Option<BTreeMap<String, BlobRef>>,
}

#[derive(Debug, Deserialize)]
struct NameBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MoveBody {
    #[serde(default)]
    folder_id: Option<FolderId>,
}

#[derive(Debug, Serialize)]
struct Created<T> {
    id: T,
}

#[derive(Debug, Serialize)]
struct Recent {
    id: Option<DrawingId>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.server.log_filter.clone().into()),
        )
        .init();

    let backend = open_backend(&settings)?;
    spawn_scheduler(backend.clone(), &settings);

    let app = router(AppState { backend });

    let listener = tokio::net::TcpListener::bind(&settings.server.addr).await?;
    info!("Driftboard server listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

fn open_backend(settings: &Settings) -> Result<Arc<dyn Backend>, StorageError> {
    if settings.storage.in_memory {
        info!("Using in-memory storage");
        return Ok(Arc::new(MemoryBackend::new()));
    }
    let backend = match &settings.storage.data_dir {
        Some(dir) => FileBackend::new(dir.clone())?,
        None => FileBackend::default_location()?,
    };
    info!("Using file storage at {}", backend.base_path().display());
    Ok(Arc::new(backend))
}

/// Periodically run the backend's scheduled jobs.
fn spawn_scheduler(backend: Arc<dyn Backend>, settings: &Settings) {
    let period = settings.scheduler_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match backend.process_scheduled().await {
                Ok(0) => {}
                Ok(touched) => info!("Scheduled jobs touched {} records", touched),
                Err(e) => warn!("Scheduled jobs failed: {}", e),
            }
        }
    });
}

fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/drawings", get(list_drawings))
        .route("/drawings/recent", get(recent_drawing))
        .route(
            "/drawings/{id}",
            get(get_drawing).put(save_drawing).delete(delete_drawing),
        )
        .route("/drawings/{id}/name", patch(rename_drawing))
        .route("/drawings/{id}/folder", put(move_drawing))
        .route("/folders", get(list_folders).post(create_folder))
        .route("/folders/{id}", patch(rename_folder).delete(delete_folder))
        .route("/blobs", post(store_blob))
        .route("/blobs/{blob}", get(read_blob));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

async fn list_drawings(State(state): State<AppState>, Owner(owner): Owner) -> ApiResult<Json<Vec<DrawingSummary>>> {
    Ok(Json(state.backend.list_drawings(&owner).await?))
}

async fn recent_drawing(State(state): State<AppState>, Owner(owner): Owner) -> ApiResult<Json<Recent>> {
    let id = state.backend.most_recent_drawing_id(&owner).await?;
    Ok(Json(Recent { id }))
}

async fn get_drawing(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<Json<Drawing>> {
    let id = DrawingId::new(id);
    match state.backend.get_drawing(&owner, &id).await? {
        Some(drawing) => Ok(Json(drawing)),
        None => Err(StorageError::drawing_not_found(&id).into()),
    }
}

async fn save_drawing(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(body): Json<SaveBody>,
) -> ApiResult<StatusCode> {
    let save = SaveDrawing {
        id: DrawingId::new(id),
        elements: body.elements,
        app_state: body.app_state,
        files: body.files,
    };
    state.backend.save_drawing(&owner, save).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_drawing(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.backend.delete_drawing(&owner, &DrawingId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rename_drawing(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(body): Json<NameBody>,
) -> ApiResult<StatusCode> {
    state.backend.rename_drawing(&owner, &DrawingId::new(id), &body.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn move_drawing(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(body): Json<MoveBody>,
) -> ApiResult<StatusCode> {
    state
        .backend
        .move_drawing(&owner, &DrawingId::new(id), body.folder_id.as_ref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_folders(State(state): State<AppState>, Owner(owner): Owner) -> ApiResult<Json<Vec<Folder>>> {
    Ok(Json(state.backend.list_folders(&owner).await?))
}

async fn create_folder(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(folder): Json<NewFolder>,
) -> ApiResult<(StatusCode, Json<Created<FolderId>>)> {
    let id = state.backend.create_folder(&owner, folder).await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn rename_folder(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
    Json(body): Json<NameBody>,
) -> ApiResult<StatusCode> {
    state.backend.rename_folder(&owner, &FolderId::new(id), &body.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_folder(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.backend.delete_folder(&owner, &FolderId::new(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn store_blob(
    State(state): State<AppState>,
    Owner(owner): Owner,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Created<BlobRef>>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_BLOB_TYPE);
    let id = state.backend.store_blob(&owner, body.to_vec(), content_type).await?;
    Ok((StatusCode::CREATED, Json(Created { id })))
}

async fn read_blob(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(blob): Path<String>,
) -> ApiResult<Response> {
    let blob_ref = BlobRef::new(blob);
    let blob = state.backend.read_blob(&blob_ref).await?;
    // Blobs of other owners behave as if absent.
    if blob.owner != owner {
        return Err(StorageError::blob_not_found(&blob_ref).into());
    }
    let content_type = HeaderValue::from_str(&blob.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_BLOB_TYPE));
    Ok(([(header::CONTENT_TYPE, content_type)], blob.data).into_response())
}
