//! Repository capability abstraction.
//!
//! Every repository variant — local, remote proxy-cache, virtual aggregate —
//! implements the same read contract, so the index builder and the HTTP
//! layer never care which kind of repository answered. Reads return the
//! index-store row types directly; they are the read contract.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::store::PackageEntry;

pub mod local;
pub mod remote;
pub mod virtual_repo;

pub use local::LocalRepository;
pub use remote::RemoteRepository;
pub use virtual_repo::VirtualRepository;

/// Byte-source descriptor for one distribution file.
///
/// A file is served either from bytes the repository holds (local storage or
/// a filled cache) or by redirecting the client to an external URL.
#[derive(Debug, Clone)]
pub enum FileSource {
    Bytes(bytes::Bytes),
    Redirect(String),
}

/// The shared capability set of every repository variant.
///
/// `list_projects` never fails for an empty repository — an empty listing is
/// valid. The three lookup operations surface `NotFound` for absent
/// project/version/file keys; remote repositories may additionally surface
/// `UpstreamUnavailable` when the upstream cannot be reached and no usable
/// cache entry exists.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Repository name identifier.
    fn name(&self) -> &str;

    /// Sorted project names this repository exposes.
    async fn list_projects(&self) -> AppResult<Vec<String>>;

    /// Full project entry: releases in insertion order with their files.
    async fn get_project(&self, project: &str) -> AppResult<PackageEntry>;

    /// Byte-source descriptor for one distribution file.
    async fn get_distribution_file(
        &self,
        project: &str,
        version: &str,
        filename: &str,
    ) -> AppResult<FileSource>;

    /// Metadata map for one release. Absent metadata is `NotFound`, not an
    /// empty map.
    async fn get_release_metadata(
        &self,
        project: &str,
        version: &str,
    ) -> AppResult<BTreeMap<String, String>>;

    /// Number of packages this repository currently indexes (for status
    /// reporting; cached packages count for remote repositories).
    async fn package_count(&self) -> usize;
}
