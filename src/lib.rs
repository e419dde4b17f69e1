//! # Package Repository Server
//!
//! A package-repository server: a store-and-serve engine for versioned
//! software artifacts that exposes a standards-compliant simple index and
//! accepts uploads. A single logical registry endpoint can be backed by local
//! storage, by a transparent proxy cache over an upstream registry, or by a
//! virtual aggregation of other repositories — all three present an identical
//! package index.
//!
//! ## Key Modules
//!
//! - [`registry`]: repository lifecycle and name resolution
//! - [`repository`]: the shared capability trait and its local, remote and
//!   virtual implementations
//! - [`store`]: the per-repository package/release/file index
//! - [`ingest`]: atomic upload commits into local repositories
//! - [`index`]: pure builders for the protocol documents (HTML, JSON,
//!   METADATA text)
//! - [`upstream`]: HTTP client for upstream registries
//! - [`error`]: error taxonomy and standardized responses
//!
//! ## Usage
//!
//! The main entry point is the server binary, but this library exposes the
//! engine directly: build a [`registry::RepositoryRegistry`], create
//! repositories, and drive reads/ingestion through it.

// Module declarations
pub mod api;
pub mod cli;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod index;
pub mod ingest;
pub mod registry;
pub mod repository;
pub mod server;
pub mod state;
pub mod storage;
pub mod store;
pub mod upstream;
pub mod validation;

// Re-export key types for convenience
pub use config::Config;
pub use error::{ApiErrorResponse, AppError, AppResult, ErrorCode};
pub use registry::{RepoConfig, RepositoryRecord, RepositoryRegistry};
pub use repository::{FileSource, Repository};
pub use server::run_server;
pub use state::{AppState, SuccessResponse};
pub use upstream::{UpstreamClient, UpstreamConfig};
pub use validation::{
    validate_file_size, validate_hostname, validate_project_name, validate_repository_name,
    validate_version, ValidationError, ValidationResult, MAX_FILENAME_LENGTH,
    MAX_PROJECT_NAME_LENGTH, MAX_UPLOAD_SIZE, MAX_VERSION_LENGTH,
};

// Utility functions that are used across multiple modules

/// Normalize a project name according to PEP 503.
///
/// Converts the name to lowercase and replaces runs of `[-_.]+` with a single
/// `-` character, so `Django-REST-framework`, `django_rest_framework` and
/// `django.rest.framework` all resolve to the same normalized name.
///
/// # Examples
///
/// ```
/// # use pkg_depot::normalize_project_name;
/// assert_eq!(normalize_project_name("Django-REST-framework"), "django-rest-framework");
/// assert_eq!(normalize_project_name("some_package"), "some-package");
/// assert_eq!(normalize_project_name("package.name"), "package-name");
/// ```
pub fn normalize_project_name(name: &str) -> String {
    use regex::Regex;
    use std::sync::OnceLock;

    static PROJECT_NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let re = PROJECT_NAME_REGEX.get_or_init(|| {
        Regex::new(r"[-_.]+").unwrap_or_else(|e| {
            panic!("Failed to compile project name normalization regex: {}. This is a bug in the code - the regex pattern should be valid.", e)
        })
    });
    re.replace_all(&name.to_lowercase(), "-").to_string()
}

/// Calculate SHA256 hash of data.
///
/// Returns the digest as a lowercase hexadecimal string. Used for artifact
/// integrity verification and index checksum generation.
///
/// # Examples
///
/// ```
/// # use pkg_depot::sha256_hash;
/// let hash = sha256_hash(b"hello world");
/// assert_eq!(hash.len(), 64); // SHA256 produces 64 hex characters
/// ```
pub fn sha256_hash(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Split a distribution filename into `(project, version)`.
///
/// Handles wheels (`name-version-pyX-abi-platform.whl`) and source
/// distributions (`name-version.tar.gz`). The returned project name is
/// normalized.
///
/// # Examples
///
/// ```
/// # use pkg_depot::split_distribution_filename;
/// assert_eq!(
///     split_distribution_filename("requests-2.31.0-py3-none-any.whl"),
///     Some(("requests".to_string(), "2.31.0".to_string()))
/// );
/// assert_eq!(
///     split_distribution_filename("widget-1.0.0.tar.gz"),
///     Some(("widget".to_string(), "1.0.0".to_string()))
/// );
/// ```
pub fn split_distribution_filename(filename: &str) -> Option<(String, String)> {
    if let Some(stem) = filename.strip_suffix(".whl") {
        // Wheel filenames use '-' as a hard separator: name-version-tags.
        let mut parts = stem.splitn(3, '-');
        let name = parts.next()?;
        let version = parts.next()?;
        if name.is_empty() || version.is_empty() {
            return None;
        }
        return Some((normalize_project_name(name), version.to_string()));
    }

    let stem = filename
        .strip_suffix(".tar.gz")
        .or_else(|| filename.strip_suffix(".zip"))?;
    let dash_pos = stem.rfind('-')?;
    let (name, version) = (&stem[..dash_pos], &stem[dash_pos + 1..]);
    if name.is_empty() || !version.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((normalize_project_name(name), version.to_string()))
}

/// Validates a filename to prevent path traversal attacks and other security
/// issues.
///
/// # Errors
///
/// Returns an error if the filename:
/// - Is empty or too long (>255 characters)
/// - Contains `..` (parent directory references)
/// - Starts with `/` or `\` (absolute paths)
/// - Contains null bytes or control characters
/// - Contains a Windows drive letter
///
/// # Examples
///
/// ```
/// # use pkg_depot::validate_filename;
/// assert!(validate_filename("widget-1.0.0.tar.gz").is_ok());
/// assert!(validate_filename("../etc/passwd").is_err());
/// assert!(validate_filename("/absolute/path").is_err());
/// ```
pub fn validate_filename(filename: &str) -> Result<(), AppError> {
    if filename.is_empty() {
        tracing::warn!("Empty filename provided");
        return Err(AppError::BadRequest("Filename cannot be empty".to_string()));
    }

    if filename.len() > MAX_FILENAME_LENGTH {
        tracing::warn!(filename = %filename, length = %filename.len(), "Filename too long");
        return Err(AppError::BadRequest(format!(
            "Filename too long: {} characters (max: {})",
            filename.len(),
            MAX_FILENAME_LENGTH
        )));
    }

    if filename.contains('\0') {
        tracing::warn!(filename = %filename, "Null byte detected in filename");
        return Err(AppError::BadRequest(
            "Filename contains null byte".to_string(),
        ));
    }

    if filename.chars().any(|c| c.is_control()) {
        tracing::warn!(filename = %filename, "Control character detected in filename");
        return Err(AppError::BadRequest(
            "Filename contains control characters".to_string(),
        ));
    }

    if filename.contains("..") {
        tracing::warn!(filename = %filename, "Path traversal attempt detected (..)");
        return Err(AppError::BadRequest(
            "Filename contains parent directory reference (..)".to_string(),
        ));
    }

    if filename.starts_with('/') || filename.starts_with('\\') {
        tracing::warn!(filename = %filename, "Absolute path detected");
        return Err(AppError::BadRequest(
            "Filename cannot be an absolute path".to_string(),
        ));
    }

    if filename.contains('/') || filename.contains('\\') {
        tracing::warn!(filename = %filename, "Path separator detected in filename");
        return Err(AppError::BadRequest(
            "Filename cannot contain path separators".to_string(),
        ));
    }

    if filename.len() >= 2 && filename.chars().nth(1) == Some(':') {
        if let Some(first_char) = filename.chars().next() {
            if first_char.is_ascii_alphabetic() {
                tracing::warn!(filename = %filename, "Windows drive letter detected");
                return Err(AppError::BadRequest(
                    "Filename cannot contain drive letter".to_string(),
                ));
            }
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_project_name() {
        assert_eq!(normalize_project_name("Widget"), "widget");
        assert_eq!(normalize_project_name("A__b..c--d"), "a-b-c-d");
    }

    #[test]
    fn test_split_distribution_filename() {
        assert_eq!(
            split_distribution_filename("some_package-1.0.0-py3-none-any.whl"),
            Some(("some-package".to_string(), "1.0.0".to_string()))
        );
        assert_eq!(
            split_distribution_filename("numpy-1.24.0.tar.gz"),
            Some(("numpy".to_string(), "1.24.0".to_string()))
        );
        assert_eq!(split_distribution_filename("no-extension"), None);
        assert_eq!(split_distribution_filename("noversion.tar.gz"), None);
    }

    mod filename_validation_tests {
        use super::*;

        #[test]
        fn test_valid_filenames_pass() {
            let valid_filenames = [
                "widget-1.0.0.tar.gz",
                "package_name-2.1-py3-none-any.whl",
                "file.with.dots.txt",
                "a",
                &"a".repeat(255),
            ];

            for filename in &valid_filenames {
                assert!(
                    validate_filename(filename).is_ok(),
                    "Valid filename '{}' should pass validation",
                    filename
                );
            }
        }

        #[test]
        fn test_path_traversal_attacks_blocked() {
            let malicious_filenames = [
                "../etc/passwd",
                "../../etc/passwd",
                "file../../../etc/passwd",
                "normalfile..suspicious",
            ];

            for filename in &malicious_filenames {
                assert!(
                    validate_filename(filename).is_err(),
                    "Path traversal attack '{}' should be blocked",
                    filename
                );
            }
        }

        #[test]
        fn test_null_byte_and_control_chars_blocked() {
            for filename in ["file\0name", "file\x01name", "file\nname", "file\tname"] {
                assert!(
                    validate_filename(filename).is_err(),
                    "Injection should be blocked: {:?}",
                    filename
                );
            }
        }

        #[test]
        fn test_absolute_and_separator_paths_blocked() {
            for filename in ["/etc/passwd", "\\windows\\cmd.exe", "dir/file.txt", "C:\\x"] {
                assert!(
                    validate_filename(filename).is_err(),
                    "Unsafe path '{}' should be blocked",
                    filename
                );
            }
        }

        #[test]
        fn test_oversized_and_empty_filenames_blocked() {
            assert!(validate_filename(&"a".repeat(256)).is_err());
            assert!(validate_filename("").is_err());
        }
    }
}
