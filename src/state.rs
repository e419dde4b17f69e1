//! # Application State Management
//!
//! Shared runtime state for the HTTP layer. The [`AppState`] is created
//! during server initialization and shared across all request handlers
//! behind an `Arc`.

use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::registry::RepositoryRegistry;

/// Application state containing shared configuration and resources.
///
/// # Fields
///
/// * `registry` - Owner of all repositories; handlers resolve names through it
/// * `server_addr` - Full server address (scheme://host:port) used for
///   generating file URLs
/// * `config` - Application configuration including upload limits
#[derive(Clone)]
pub struct AppState {
    /// Repository registry shared across handlers
    pub registry: Arc<RepositoryRegistry>,
    /// Full server address including scheme, host, and port (e.g., "http://localhost:3080")
    pub server_addr: String,
    /// Application configuration
    pub config: Arc<Config>,
}

/// Standardized success response for API consistency.
///
/// # JSON Format
///
/// Serializes to: `{"message": "Operation completed successfully"}`
#[derive(Serialize)]
pub struct SuccessResponse {
    /// Human-readable success message describing the completed operation
    pub message: String,
}
