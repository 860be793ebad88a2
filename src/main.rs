//! uSpark Sync Server - Project Document Synchronization Engine
//!
//! A one-way synchronization service using:
//! - Automerge CRDT snapshots as the durable project document format
//! - Sled embedded database for records, links, and the sync audit log
//! - The GitHub Git Data API for commit construction without clones
//! - Axum for the HTTP control surface

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use uspark_sync::blob::{
    BlobStoreClient, BlobStoreConfig, BlobTokenConfig, BlobTokenIssuer, IssuedBlobToken,
};
use uspark_sync::github::GithubClient;
use uspark_sync::storage::{ProjectRecord, RepositoryLink, StorageConfig, SyncLogEntry, SyncStore};
use uspark_sync::sync::{
    hash_content, ProjectDocument, PushOutcome, RepoSyncStatus, SyncEngine, SyncEngineConfig,
    SyncError,
};

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    /// Push engine over the live GitHub and blob store clients
    engine: SyncEngine<GithubClient, BlobStoreClient>,
    /// Persistent store, shared with the engine
    store: SyncStore,
    /// Short-lived blob access token issuer
    token_issuer: BlobTokenIssuer,
    /// Server start time
    started_at: std::time::Instant,
}

impl AppState {
    pub fn new(store: SyncStore) -> Self {
        // Upstream collaborators come from the environment; the server
        // still boots without them and reports configuration errors on use.
        let github = match GithubClient::from_env() {
            Ok(client) => {
                info!("GitHub client configured from environment");
                client
            }
            Err(_) => {
                warn!("GITHUB_TOKEN not set - pushes will fail until configured");
                GithubClient::unconfigured()
            }
        };

        let blobs = match BlobStoreConfig::from_env().and_then(BlobStoreClient::new) {
            Ok(client) => {
                info!("Blob store configured from environment");
                client
            }
            Err(_) => {
                warn!("Blob store not configured - only inline content will sync");
                BlobStoreClient::unconfigured()
            }
        };

        let token_issuer = match BlobTokenConfig::from_env().and_then(BlobTokenIssuer::new) {
            Ok(issuer) => {
                info!("Blob token issuer configured from environment");
                issuer
            }
            Err(_) => {
                warn!("BLOB_TOKEN_SECRET not set - blob token endpoint disabled");
                BlobTokenIssuer::unconfigured()
            }
        };

        let mut config = SyncEngineConfig::default();
        if let Ok(branch) = std::env::var("SYNC_BRANCH") {
            config = config.with_branch(branch);
        }
        if let Some(secs) = std::env::var("SYNC_LOCK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config = config.with_lock_timeout(Duration::from_secs(secs));
        }

        let engine = SyncEngine::new(store.clone(), github, blobs, config);

        Self {
            engine,
            store,
            token_issuer,
            started_at: std::time::Instant::now(),
        }
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    projects: usize,
}

#[derive(Debug, Deserialize)]
struct CreateProjectRequest {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct CreateProjectResponse {
    project_id: String,
    user_id: String,
    version: i64,
    created_at: i64,
}

#[derive(Debug, Serialize)]
struct FileInfo {
    path: String,
    hash: String,
    mtime: i64,
}

#[derive(Debug, Serialize)]
struct FileListResponse {
    files: Vec<FileInfo>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct WriteFileRequest {
    user_id: String,
    path: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct WriteFileResponse {
    path: String,
    hash: String,
    size: u64,
    version: i64,
}

#[derive(Debug, Deserialize)]
struct LinkRepositoryRequest {
    user_id: String,
    installation_id: i64,
    repo_id: i64,
    repo_name: String,
}

#[derive(Debug, Serialize)]
struct LinkRepositoryResponse {
    project_id: String,
    repo_id: i64,
    repo_name: String,
    linked_at: i64,
}

#[derive(Debug, Serialize)]
struct UnlinkResponse {
    project_id: String,
    removed: bool,
}

#[derive(Debug, Deserialize)]
struct SyncRequest {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct SyncLogResponse {
    entries: Vec<SyncLogEntry>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct BlobTokenRequest {
    user_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

/// Map a sync error onto an HTTP status and JSON body
fn error_response(err: SyncError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &err {
        SyncError::NotFound(_) => StatusCode::NOT_FOUND,
        SyncError::Unauthorized(_) => StatusCode::FORBIDDEN,
        SyncError::Conflict(_) => StatusCode::CONFLICT,
        SyncError::EmptyInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SyncError::Upstream(_) => StatusCode::BAD_GATEWAY,
        SyncError::Config(_)
        | SyncError::Storage(_)
        | SyncError::Document(_)
        | SyncError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
            code: err.reason_code().to_string(),
        }),
    )
}

fn load_project(
    state: &AppState,
    project_id: &str,
) -> Result<ProjectRecord, (StatusCode, Json<ErrorBody>)> {
    state
        .store
        .get_project(project_id)
        .map_err(|e| error_response(e.into()))?
        .ok_or_else(|| error_response(SyncError::NotFound("Project not found".to_string())))
}

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.store.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        projects: stats.project_count,
    })
}

/// Create a new project with an empty document
async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateProjectRequest>,
) -> ApiResult<CreateProjectResponse> {
    let project_id = uuid::Uuid::new_v4().to_string();
    let record = ProjectRecord::new(&project_id, &payload.user_id);

    state
        .store
        .create_project(&record)
        .map_err(|e| error_response(e.into()))?;

    info!("Created project {} for user {}", project_id, payload.user_id);

    Ok(Json(CreateProjectResponse {
        project_id: record.id,
        user_id: record.user_id,
        version: record.version,
        created_at: record.created_at,
    }))
}

/// List the project's files from document metadata
async fn list_files(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<FileListResponse> {
    let record = load_project(&state, &project_id)?;
    let doc = ProjectDocument::decode(&record.ydoc_data).map_err(|e| error_response(e.into()))?;

    let files: Vec<FileInfo> = doc
        .list_files()
        .map_err(|e| error_response(e.into()))?
        .into_iter()
        .map(|(path, node)| FileInfo {
            path,
            hash: node.hash,
            mtime: node.mtime,
        })
        .collect();

    let total = files.len();
    Ok(Json(FileListResponse { files, total }))
}

/// Write one file through the document model
async fn write_file(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Json(payload): Json<WriteFileRequest>,
) -> ApiResult<WriteFileResponse> {
    let record = load_project(&state, &project_id)?;
    if record.user_id != payload.user_id {
        return Err(error_response(SyncError::Unauthorized(
            "Project does not belong to this user".to_string(),
        )));
    }

    let mut doc =
        ProjectDocument::decode(&record.ydoc_data).map_err(|e| error_response(e.into()))?;

    let hash = hash_content(payload.content.as_bytes());
    let size = payload.content.len() as u64;
    let mtime = chrono::Utc::now().timestamp_millis();

    doc.set_file(&payload.path, &hash, mtime)
        .map_err(|e| error_response(e.into()))?;
    doc.set_blob_info(&hash, size, Some(&payload.content))
        .map_err(|e| error_response(e.into()))?;

    let updated = state
        .store
        .update_project_doc(&project_id, doc.encode())
        .map_err(|e| error_response(e.into()))?;

    Ok(Json(WriteFileResponse {
        path: payload.path,
        hash,
        size,
        version: updated.version,
    }))
}

/// Raw CRDT snapshot bytes, the mirror's read endpoint
async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<Vec<u8>, (StatusCode, Json<ErrorBody>)> {
    let record = load_project(&state, &project_id)?;
    Ok(record.ydoc_data)
}

/// Link the project to a GitHub repository
async fn link_repository(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Json(payload): Json<LinkRepositoryRequest>,
) -> ApiResult<LinkRepositoryResponse> {
    let record = load_project(&state, &project_id)?;
    if record.user_id != payload.user_id {
        return Err(error_response(SyncError::Unauthorized(
            "Project does not belong to this user".to_string(),
        )));
    }

    let link = RepositoryLink::new(
        &project_id,
        payload.installation_id,
        payload.repo_id,
        &payload.repo_name,
    );
    state
        .store
        .upsert_link(&link)
        .map_err(|e| error_response(e.into()))?;

    info!("Linked project {} to {}", project_id, payload.repo_name);

    Ok(Json(LinkRepositoryResponse {
        project_id: link.project_id,
        repo_id: link.repo_id,
        repo_name: link.repo_name,
        linked_at: link.linked_at,
    }))
}

/// Remove the project's repository link
async fn unlink_repository(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<UnlinkResponse> {
    let removed = state
        .store
        .remove_link(&project_id)
        .map_err(|e| error_response(e.into()))?;

    if !removed {
        return Err(error_response(SyncError::NotFound(
            "Repository not linked to project".to_string(),
        )));
    }

    info!("Unlinked repository from project {}", project_id);

    Ok(Json(UnlinkResponse {
        project_id,
        removed,
    }))
}

/// Push the project to its linked repository
async fn sync_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Json(payload): Json<SyncRequest>,
) -> ApiResult<PushOutcome> {
    state
        .engine
        .push(&project_id, &payload.user_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Report drift between the sync pointer and the live branch head
async fn sync_status(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<RepoSyncStatus> {
    state
        .engine
        .status(&project_id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// The project's sync audit trail, oldest first
async fn sync_log(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<SyncLogResponse> {
    let entries = state
        .store
        .log_for_project(&project_id)
        .map_err(|e| error_response(e.into()))?;

    let total = entries.len();
    Ok(Json(SyncLogResponse { entries, total }))
}

/// Issue a short-lived blob access token scoped to the project
async fn issue_blob_token(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
    Json(payload): Json<BlobTokenRequest>,
) -> ApiResult<IssuedBlobToken> {
    let record = load_project(&state, &project_id)?;
    if record.user_id != payload.user_id {
        return Err(error_response(SyncError::Unauthorized(
            "Project does not belong to this user".to_string(),
        )));
    }

    state
        .token_issuer
        .issue(&project_id)
        .map(Json)
        .map_err(error_response)
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uspark_sync=info,tower_http=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize storage
    let storage_path =
        std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./data/uspark.sled".to_string());

    info!("Initializing storage at: {}", storage_path);

    let storage_config = StorageConfig::new(&storage_path);
    let store = SyncStore::open(storage_config).expect("Failed to open storage");

    info!("Storage initialized successfully");

    // Create application state
    let state = Arc::new(AppState::new(store));

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Project records and files
        .route("/api/projects", post(create_project))
        .route(
            "/api/projects/:project_id/files",
            get(list_files).post(write_file),
        )
        .route("/api/projects/:project_id/snapshot", get(get_snapshot))
        // Repository links and sync
        .route(
            "/api/projects/:project_id/repository",
            post(link_repository).delete(unlink_repository),
        )
        .route("/api/projects/:project_id/sync", post(sync_project))
        .route("/api/projects/:project_id/sync/status", get(sync_status))
        .route("/api/projects/:project_id/sync/log", get(sync_log))
        // Blob access tokens
        .route(
            "/api/projects/:project_id/blob-token",
            post(issue_blob_token),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("🚀 uSpark sync server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Listening on: http://{}", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app).await.expect("Server error");
}
