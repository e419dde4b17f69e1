//! Async file storage helpers used by local repositories and proxy caches.
//!
//! All distribution-file bytes and persisted index documents go through this
//! module, so size validation and parent-directory handling live in one place.

use crate::error::{AppError, AppResult};
use crate::validation;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

/// Save file content to the specified path, creating parent directories.
pub async fn save_file<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> AppResult<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
        debug!(parent = %parent.display(), "Created parent directory");
    }

    let content = content.as_ref();
    fs::write(path, content).await?;
    info!(
        path = %path.display(),
        size = content.len(),
        "File saved successfully"
    );
    Ok(())
}

/// Read file content from the specified path with size validation.
pub async fn read_file<P: AsRef<Path>>(path: P) -> AppResult<Vec<u8>> {
    let path = path.as_ref();

    if !path.exists() {
        warn!(path = %path.display(), "File not found");
        return Err(AppError::NotFound(format!(
            "File not found: {}",
            path.display()
        )));
    }

    let metadata = fs::metadata(path).await?;
    validation::validate_file_size(metadata.len(), None)
        .map_err(|e| AppError::InternalError(format!("File exceeds size limits: {e}")))?;

    Ok(fs::read(path).await?)
}

/// Read file content as a string with size validation.
pub async fn read_file_string<P: AsRef<Path>>(path: P) -> AppResult<String> {
    let bytes = read_file(path).await?;
    String::from_utf8(bytes)
        .map_err(|e| AppError::InternalError(format!("File is not valid UTF-8: {e}")))
}

/// Delete a file if it exists. Missing files are not an error; callers use
/// this for rollback paths where the write may not have happened.
pub async fn remove_file_if_exists<P: AsRef<Path>>(path: P) -> AppResult<()> {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "File removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Recursively delete a directory if it exists.
pub async fn remove_dir_if_exists<P: AsRef<Path>>(path: P) -> AppResult<()> {
    let path = path.as_ref();
    match fs::remove_dir_all(path).await {
        Ok(()) => {
            info!(path = %path.display(), "Directory removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
