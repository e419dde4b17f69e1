//! Ingestion Pipeline: validated, atomic upload commits into local
//! repositories.
//!
//! This is the single entry point for getting an artifact into the system.
//! It validates every input before touching storage, resolves the target
//! repository and rejects non-local targets, then hands off to the index
//! store's atomic commit. Either the full commit happens (rows and bytes) or
//! nothing does.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::registry::RepositoryRegistry;
use crate::store::FileEntry;
use crate::validation::{validate_file_size, validate_project_name, validate_version};
use crate::{normalize_project_name, validate_filename};

/// One validated upload, ready to commit.
pub struct IngestRequest {
    pub project: String,
    pub version: String,
    pub filename: String,
    pub data: Vec<u8>,
    /// Digests the uploader declared; sha256 is recomputed when absent.
    pub declared_hashes: Option<BTreeMap<String, String>>,
    /// Release metadata to merge (new keys win on re-ingestion).
    pub metadata: Option<BTreeMap<String, String>>,
    /// Replace an existing file row instead of rejecting it.
    pub overwrite: bool,
}

/// Commit one artifact into a named repository.
///
/// # Errors
///
/// * `BadRequest` for invalid names, versions or filenames, and for targets
///   that are not local repositories
/// * `NotFound` when the repository does not exist
/// * `Conflict` for a duplicate `(project, version, filename)` without
///   `overwrite`
/// * `UploadError` when the payload exceeds the size limit
pub async fn ingest(
    registry: &Arc<RepositoryRegistry>,
    repo_name: &str,
    request: IngestRequest,
) -> AppResult<FileEntry> {
    validate_project_name(&request.project)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    validate_version(&request.version).map_err(|e| AppError::BadRequest(e.to_string()))?;
    validate_filename(&request.filename)?;
    validate_file_size(request.data.len() as u64, None)
        .map_err(|e| AppError::UploadError(e.to_string()))?;

    let handle = registry.get(repo_name).await?;
    let local = handle.as_local().ok_or_else(|| {
        warn!(repo = %repo_name, repo_type = %handle.record().config.type_name(),
              "Rejecting upload to non-local repository");
        AppError::BadRequest(format!(
            "Repository is not a local repository: {repo_name}"
        ))
    })?;

    let project = normalize_project_name(&request.project);
    info!(repo = %repo_name, project = %project, version = %request.version,
          filename = %request.filename, size = request.data.len(), "Ingesting artifact");

    local
        .ingest(
            &project,
            &request.version,
            &request.filename,
            request.metadata,
            request.declared_hashes,
            &request.data,
            request.overwrite,
        )
        .await
}
