//! HTTP surface: axum router and thin handlers.
//!
//! Handlers resolve the repository through the registry, call the engine
//! (repository reads, index builders, ingestion pipeline) and shape the
//! response. No repository or index logic lives here.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path as AxumPath, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::index;
use crate::ingest::{self, IngestRequest};
use crate::registry::{RepoConfig, RepositoryRecord};
use crate::state::{AppState, SuccessResponse};
use crate::upstream::SIMPLE_JSON_MEDIA_TYPE;
use crate::validation::{self, validate_multipart_limits};
use crate::{sha256_hash, split_distribution_filename, validate_filename};

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route(
            "/api/repositories",
            post(create_repository).get(list_repositories),
        )
        .route("/api/repositories/{name}", delete(delete_repository))
        .route("/{repo}/simple/", get(simple_index))
        .route("/{repo}/simple/{project}/", get(project_index))
        .route(
            "/{repo}/packages/{project}/{version}/{filename}",
            get(download_file),
        )
        .route(
            "/{repo}/packages/{project}/{version}/{filename}/METADATA",
            get(release_metadata),
        )
        .route("/{repo}/upload", post(upload_package))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Whether the request asks for the machine-readable simple index.
fn wants_simple_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(SIMPLE_JSON_MEDIA_TYPE))
}

fn simple_json_response(value: serde_json::Value) -> Response {
    (
        [(header::CONTENT_TYPE, SIMPLE_JSON_MEDIA_TYPE)],
        value.to_string(),
    )
        .into_response()
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy"}))
}

/// Service status: repository names, types and package counts.
async fn status_handler(State(state): State<Arc<AppState>>) -> AppResult<Json<serde_json::Value>> {
    let mut repositories = Vec::new();
    for record in state.registry.list().await {
        let handle = state.registry.get(&record.name).await?;
        repositories.push(json!({
            "name": record.name,
            "type": record.config.type_name(),
            "package_type": record.package_type,
            "packages": handle.reader().package_count().await,
        }));
    }

    Ok(Json(json!({
        "status": "ok",
        "service": "pkg-depot",
        "version": env!("CARGO_PKG_VERSION"),
        "repositories": repositories,
    })))
}

/// Request body for repository creation. The configuration variant is
/// flattened, so clients send `{"name": "x", "type": "remote", "url": ...}`.
#[derive(Deserialize)]
struct CreateRepositoryRequest {
    name: String,
    #[serde(default = "default_package_type")]
    package_type: String,
    #[serde(flatten)]
    config: RepoConfig,
}

fn default_package_type() -> String {
    "pypi".to_string()
}

async fn create_repository(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRepositoryRequest>,
) -> AppResult<(StatusCode, Json<RepositoryRecord>)> {
    let record = state
        .registry
        .create(&request.name, &request.package_type, request.config)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_repositories(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<RepositoryRecord>> {
    Json(state.registry.list().await)
}

async fn delete_repository(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> AppResult<Json<SuccessResponse>> {
    state.registry.delete(&name).await?;
    Ok(Json(SuccessResponse {
        message: format!("Repository deleted: {name}"),
    }))
}

/// Project listing for one repository (PEP 503 HTML or PEP 691 JSON).
async fn simple_index(
    State(state): State<Arc<AppState>>,
    AxumPath(repo): AxumPath<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    info!(repo = %repo, "Generating simple index");
    let handle = state.registry.get(&repo).await?;
    let projects = handle.reader().list_projects().await?;

    if wants_simple_json(&headers) {
        return Ok(simple_json_response(index::project_listing_json(&projects)));
    }
    Ok(Html(index::project_listing_html(&projects)).into_response())
}

/// Per-project file listing (PEP 503 HTML or PEP 691 JSON).
async fn project_index(
    State(state): State<Arc<AppState>>,
    AxumPath((repo, project)): AxumPath<(String, String)>,
    headers: HeaderMap,
) -> AppResult<Response> {
    info!(repo = %repo, project = %project, "Generating project index");
    let handle = state.registry.get(&repo).await?;
    let entry = handle.reader().get_project(&project).await?;

    if wants_simple_json(&headers) {
        return Ok(simple_json_response(index::project_json(
            &state.server_addr,
            &repo,
            &entry,
        )));
    }
    Ok(Html(index::project_html(&state.server_addr, &repo, &entry)).into_response())
}

/// Serve one distribution file: local bytes or a redirect to the external
/// location.
async fn download_file(
    State(state): State<Arc<AppState>>,
    AxumPath((repo, project, version, filename)): AxumPath<(String, String, String, String)>,
) -> AppResult<Response> {
    validate_filename(&filename)?;
    debug!(repo = %repo, project = %project, version = %version, filename = %filename,
           "Serving distribution file");

    let handle = state.registry.get(&repo).await?;
    match handle
        .reader()
        .get_distribution_file(&project, &version, &filename)
        .await?
    {
        crate::repository::FileSource::Bytes(bytes) => Ok((
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response()),
        crate::repository::FileSource::Redirect(url) => {
            Ok(Redirect::temporary(&url).into_response())
        }
    }
}

/// Serve a release's metadata as a plain-text document.
async fn release_metadata(
    State(state): State<Arc<AppState>>,
    AxumPath((repo, project, version, _filename)): AxumPath<(String, String, String, String)>,
) -> AppResult<Response> {
    let handle = state.registry.get(&repo).await?;
    let metadata = handle
        .reader()
        .get_release_metadata(&project, &version)
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        index::render_metadata(&metadata),
    )
        .into_response())
}

/// Accept a multipart artifact upload into a local repository.
///
/// Expected fields: `content` (the file, with its filename), optional
/// `sha256_digest` (verified against the payload when present).
async fn upload_package(
    State(state): State<Arc<AppState>>,
    AxumPath(repo): AxumPath<String>,
    mut multipart: Multipart,
) -> AppResult<Json<SuccessResponse>> {
    info!(repo = %repo, "Processing package upload");

    let mut field_count = 0;
    let mut total_size = 0u64;
    let mut filename: Option<String> = None;
    let mut data: Option<Vec<u8>> = None;
    let mut declared_sha256: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        field_count += 1;
        if field_count > validation::MAX_MULTIPART_FIELDS {
            warn!(field_count = %field_count, "Too many multipart fields");
            return Err(AppError::UploadError(format!(
                "Too many multipart fields: {} (max: {})",
                field_count,
                validation::MAX_MULTIPART_FIELDS
            )));
        }

        let name = field.name().unwrap_or("").to_string();
        debug!(field_name = %name, "Processing multipart field");

        match name.as_str() {
            "content" => {
                let file_name = field
                    .file_name()
                    .ok_or_else(|| {
                        AppError::BadRequest("Missing filename in upload".to_string())
                    })?
                    .to_string();
                validate_filename(&file_name)?;

                let bytes = field.bytes().await?;
                total_size += bytes.len() as u64;
                validate_multipart_limits(field_count, total_size).map_err(|e| {
                    warn!(total_size = %total_size, "Multipart limits exceeded");
                    AppError::UploadError(format!("Multipart upload limits exceeded: {e}"))
                })?;
                validation::validate_file_size(
                    bytes.len() as u64,
                    Some(state.config.max_upload_size()),
                )
                .map_err(|e| AppError::UploadError(e.to_string()))?;

                filename = Some(file_name);
                data = Some(bytes.to_vec());
            }
            "sha256_digest" => {
                declared_sha256 = Some(field.text().await?.trim().to_lowercase());
            }
            other => {
                debug!(field_name = %other, "Ignoring unknown multipart field");
            }
        }
    }

    let filename = filename
        .ok_or_else(|| AppError::BadRequest("Missing 'content' field in upload".to_string()))?;
    let data =
        data.ok_or_else(|| AppError::BadRequest("Empty 'content' field in upload".to_string()))?;

    let (project, version) = split_distribution_filename(&filename).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Cannot derive project and version from filename: {filename}"
        ))
    })?;

    // A declared digest must match the payload; a mismatch means corruption
    // in transit or a bad client.
    let mut declared_hashes = None;
    if let Some(declared) = declared_sha256 {
        let actual = sha256_hash(&data);
        if declared != actual {
            warn!(filename = %filename, "Declared sha256 digest does not match payload");
            return Err(AppError::BadRequest(format!(
                "Declared sha256 digest does not match uploaded content for {filename}"
            )));
        }
        let mut hashes = std::collections::BTreeMap::new();
        hashes.insert("sha256".to_string(), declared);
        declared_hashes = Some(hashes);
    }

    let entry = ingest::ingest(
        &state.registry,
        &repo,
        IngestRequest {
            project,
            version,
            filename: filename.clone(),
            data,
            declared_hashes,
            metadata: None,
            overwrite: false,
        },
    )
    .await?;

    Ok(Json(SuccessResponse {
        message: format!("Package uploaded successfully: {}", entry.filename),
    }))
}
