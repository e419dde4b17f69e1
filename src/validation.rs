//! # Input Validation Utilities
//!
//! Security-focused validation helpers for the inputs the repository server
//! accepts from the network: project names, version strings, hostnames and
//! upload sizes. All functions follow a security-first approach to prevent
//! injection attacks and resource exhaustion.

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum allowed file size for uploads (100 MB)
pub const MAX_UPLOAD_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum allowed number of multipart fields
pub const MAX_MULTIPART_FIELDS: usize = 10;

/// Maximum allowed project name length
pub const MAX_PROJECT_NAME_LENGTH: usize = 214;

/// Maximum allowed version string length
pub const MAX_VERSION_LENGTH: usize = 64;

/// Maximum allowed filename length
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Regex for validating hostnames (RFC 1123 compliant)
static HOSTNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$")
        .expect("Hostname regex should compile - this is a static RFC 1123 pattern")
});

/// Error types for validation failures
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Input too long: {actual} exceeds maximum {max}")]
    TooLong { actual: usize, max: usize },

    #[error("Input too short: {actual} is below minimum {min}")]
    TooShort { actual: usize, min: usize },

    #[error("Invalid characters in input: {input}")]
    InvalidCharacters { input: String },

    #[error("File size exceeds limit: {actual} > {max}")]
    FileTooLarge { actual: u64, max: u64 },

    #[error("Null bytes detected in input")]
    NullBytes,

    #[error("Control characters detected in input")]
    ControlCharacters,

    #[error("Invalid format: {reason}")]
    InvalidFormat { reason: String },
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a project name.
///
/// Project names follow the PyPI rules: ASCII letters, digits, dots, hyphens
/// and underscores, starting and ending with a letter or digit. The caller is
/// expected to normalize the name separately before using it as a lookup key.
///
/// # Arguments
///
/// * `name` - The project name to validate
///
/// # Returns
///
/// `Ok(String)` with the validated name, `Err(ValidationError)` if invalid
pub fn validate_project_name(name: &str) -> ValidationResult<String> {
    if name.is_empty() {
        return Err(ValidationError::TooShort { actual: 0, min: 1 });
    }

    if name.len() > MAX_PROJECT_NAME_LENGTH {
        return Err(ValidationError::TooLong {
            actual: name.len(),
            max: MAX_PROJECT_NAME_LENGTH,
        });
    }

    if name.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(ValidationError::ControlCharacters);
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(ValidationError::InvalidCharacters {
            input: name.to_string(),
        });
    }

    let first = name.chars().next();
    let last = name.chars().last();
    if !first.is_some_and(|c| c.is_ascii_alphanumeric())
        || !last.is_some_and(|c| c.is_ascii_alphanumeric())
    {
        return Err(ValidationError::InvalidFormat {
            reason: "project names must start and end with a letter or digit".to_string(),
        });
    }

    Ok(name.to_string())
}

/// Validate a version string.
///
/// Versions are opaque strings for protocol purposes (compared by
/// byte-equality, never ordered semantically), but they still have to be safe
/// to embed in paths and URLs.
///
/// # Arguments
///
/// * `version` - The version string to validate
///
/// # Returns
///
/// `Ok(String)` with the validated version, `Err(ValidationError)` if invalid
pub fn validate_version(version: &str) -> ValidationResult<String> {
    if version.is_empty() {
        return Err(ValidationError::TooShort { actual: 0, min: 1 });
    }

    if version.len() > MAX_VERSION_LENGTH {
        return Err(ValidationError::TooLong {
            actual: version.len(),
            max: MAX_VERSION_LENGTH,
        });
    }

    if version.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    if version.chars().any(|c| c.is_control()) {
        return Err(ValidationError::ControlCharacters);
    }

    if !version
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+' | '!'))
    {
        return Err(ValidationError::InvalidCharacters {
            input: version.to_string(),
        });
    }

    Ok(version.to_string())
}

/// Validate a repository name.
///
/// Repository names identify registry endpoints in URLs, so the accepted
/// alphabet is deliberately narrow: lowercase letters, digits and hyphens.
pub fn validate_repository_name(name: &str) -> ValidationResult<String> {
    if name.is_empty() {
        return Err(ValidationError::TooShort { actual: 0, min: 1 });
    }

    if name.len() > 64 {
        return Err(ValidationError::TooLong {
            actual: name.len(),
            max: 64,
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ValidationError::InvalidCharacters {
            input: name.to_string(),
        });
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(ValidationError::InvalidFormat {
            reason: "repository names cannot start or end with a hyphen".to_string(),
        });
    }

    Ok(name.to_string())
}

/// Validate file size against limits.
///
/// # Arguments
///
/// * `size` - The file size in bytes
/// * `max_size` - Optional custom maximum size (defaults to MAX_UPLOAD_SIZE)
pub fn validate_file_size(size: u64, max_size: Option<u64>) -> ValidationResult<()> {
    let limit = max_size.unwrap_or(MAX_UPLOAD_SIZE);

    if size > limit {
        return Err(ValidationError::FileTooLarge {
            actual: size,
            max: limit,
        });
    }

    Ok(())
}

/// Validate and sanitize hostnames for network operations.
///
/// Hostnames are validated according to RFC 1123 so they are safe to embed
/// in bind addresses and generated URLs.
pub fn validate_hostname(hostname: &str) -> ValidationResult<String> {
    if hostname.is_empty() {
        return Err(ValidationError::TooShort { actual: 0, min: 1 });
    }

    if hostname.len() > 253 {
        return Err(ValidationError::TooLong {
            actual: hostname.len(),
            max: 253,
        });
    }

    // Bind-all and IP addresses are accepted as-is
    if hostname.parse::<std::net::IpAddr>().is_ok() {
        return Ok(hostname.to_string());
    }

    if !HOSTNAME_REGEX.is_match(hostname) {
        return Err(ValidationError::InvalidCharacters {
            input: hostname.to_string(),
        });
    }

    Ok(hostname.to_string())
}

/// Validate multipart upload limits to prevent resource exhaustion.
///
/// # Arguments
///
/// * `field_count` - Number of multipart fields seen so far
/// * `total_size` - Total bytes read across all fields so far
pub fn validate_multipart_limits(field_count: usize, total_size: u64) -> ValidationResult<()> {
    if field_count > MAX_MULTIPART_FIELDS {
        return Err(ValidationError::InvalidFormat {
            reason: format!(
                "too many multipart fields: {} (max: {})",
                field_count, MAX_MULTIPART_FIELDS
            ),
        });
    }

    validate_file_size(total_size, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_project_names() {
        for name in ["requests", "Django-REST-framework", "zope.interface", "a1"] {
            assert!(
                validate_project_name(name).is_ok(),
                "'{}' should be a valid project name",
                name
            );
        }
    }

    #[test]
    fn test_invalid_project_names() {
        assert!(validate_project_name("").is_err());
        assert!(validate_project_name("-leading").is_err());
        assert!(validate_project_name("trailing-").is_err());
        assert!(validate_project_name("has space").is_err());
        assert!(validate_project_name("null\0byte").is_err());
        assert!(validate_project_name(&"a".repeat(215)).is_err());
    }

    #[test]
    fn test_valid_versions() {
        for version in ["1.0.0", "2.0", "1.0.0rc1", "1.0.post1", "1!2.0", "0.1-dev_3+local"] {
            assert!(
                validate_version(version).is_ok(),
                "'{}' should be a valid version",
                version
            );
        }
    }

    #[test]
    fn test_invalid_versions() {
        assert!(validate_version("").is_err());
        assert!(validate_version("1.0/../../etc").is_err());
        assert!(validate_version("1.0\0").is_err());
        assert!(validate_version(&"9".repeat(65)).is_err());
    }

    #[test]
    fn test_repository_names() {
        assert!(validate_repository_name("pypi-local").is_ok());
        assert!(validate_repository_name("all").is_ok());
        assert!(validate_repository_name("UPPER").is_err());
        assert!(validate_repository_name("-x").is_err());
        assert!(validate_repository_name("x-").is_err());
        assert!(validate_repository_name("").is_err());
        assert!(validate_repository_name("with/slash").is_err());
    }

    #[test]
    fn test_hostname_validation() {
        assert!(validate_hostname("localhost").is_ok());
        assert!(validate_hostname("0.0.0.0").is_ok());
        assert!(validate_hostname("my-server.local").is_ok());
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("bad host").is_err());
        assert!(validate_hostname(&"a".repeat(254)).is_err());
    }

    #[test]
    fn test_file_size_limits() {
        assert!(validate_file_size(1024, None).is_ok());
        assert!(validate_file_size(MAX_UPLOAD_SIZE, None).is_ok());
        assert!(validate_file_size(MAX_UPLOAD_SIZE + 1, None).is_err());
        assert!(validate_file_size(11, Some(10)).is_err());
    }

    #[test]
    fn test_multipart_limits() {
        assert!(validate_multipart_limits(1, 100).is_ok());
        assert!(validate_multipart_limits(MAX_MULTIPART_FIELDS + 1, 100).is_err());
        assert!(validate_multipart_limits(1, MAX_UPLOAD_SIZE + 1).is_err());
    }
}
