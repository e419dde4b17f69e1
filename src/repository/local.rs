//! Local repository: the only variant that owns packages, releases and
//! distribution-file bytes. Reads are direct index-store lookups scoped to
//! this repository's directory; no network calls.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::repository::{FileSource, Repository};
use crate::store::{FileEntry, IndexStore, PackageEntry};

pub struct LocalRepository {
    name: String,
    store: IndexStore,
}

impl LocalRepository {
    /// Open a local repository over its storage directory, creating the
    /// directory and an empty index on first use.
    pub async fn open<P: AsRef<Path>>(name: &str, root: P) -> AppResult<Self> {
        let store = IndexStore::open(root).await?;
        debug!(repo = %name, root = %store.root().display(), "Opened local repository");
        Ok(Self {
            name: name.to_string(),
            store,
        })
    }

    /// Direct access to the underlying index store. Used by the ingestion
    /// pipeline and by remote repositories that embed a local repository as
    /// their private cache.
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Commit one uploaded artifact into this repository. See
    /// [`IndexStore::commit_artifact`] for the atomicity contract.
    #[allow(clippy::too_many_arguments)]
    pub async fn ingest(
        &self,
        project: &str,
        version: &str,
        filename: &str,
        metadata: Option<BTreeMap<String, String>>,
        declared_hashes: Option<BTreeMap<String, String>>,
        data: &[u8],
        overwrite: bool,
    ) -> AppResult<FileEntry> {
        self.store
            .commit_artifact(
                project,
                version,
                filename,
                metadata,
                declared_hashes,
                data,
                overwrite,
            )
            .await
    }
}

#[async_trait]
impl Repository for LocalRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_projects(&self) -> AppResult<Vec<String>> {
        Ok(self.store.list_projects().await)
    }

    async fn get_project(&self, project: &str) -> AppResult<PackageEntry> {
        self.store.get_project(project).await.ok_or_else(|| {
            AppError::NotFound(format!("Project not found: {project}"))
        })
    }

    async fn get_distribution_file(
        &self,
        project: &str,
        version: &str,
        filename: &str,
    ) -> AppResult<FileSource> {
        let entry = self
            .store
            .find_file(project, version, filename)
            .await
            .ok_or_else(|| {
                AppError::NotFound(format!("File not found: {project}-{version}/{filename}"))
            })?;

        // `path` takes precedence over `url` when both are set.
        if entry.path.is_some() {
            let bytes = self.store.read_file_bytes(&entry).await?;
            return Ok(FileSource::Bytes(bytes.into()));
        }
        if let Some(url) = entry.url {
            return Ok(FileSource::Redirect(url));
        }
        Err(AppError::NotFound(format!(
            "File has no byte source: {filename}"
        )))
    }

    async fn get_release_metadata(
        &self,
        project: &str,
        version: &str,
    ) -> AppResult<BTreeMap<String, String>> {
        self.store
            .get_release_metadata(project, version)
            .await
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No metadata for release: {project}-{version}"
                ))
            })
    }

    async fn package_count(&self) -> usize {
        self.store.package_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_repo() -> (LocalRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let repo = LocalRepository::open("pypi-local", temp_dir.path().join("repo"))
            .await
            .unwrap();
        (repo, temp_dir)
    }

    #[tokio::test]
    async fn test_empty_repository_lists_nothing() {
        let (repo, _tmp) = open_repo().await;
        assert!(repo.list_projects().await.unwrap().is_empty());
        assert_eq!(repo.package_count().await, 0);
    }

    #[tokio::test]
    async fn test_ingest_then_read_contract() {
        let (repo, _tmp) = open_repo().await;

        repo.ingest(
            "widget",
            "1.0.0",
            "widget-1.0.0.tar.gz",
            None,
            None,
            b"WHEEL-CONTENT",
            false,
        )
        .await
        .unwrap();

        assert_eq!(repo.list_projects().await.unwrap(), vec!["widget"]);

        let project = repo.get_project("widget").await.unwrap();
        assert_eq!(project.releases.len(), 1);
        assert_eq!(project.releases[0].files[0].filename, "widget-1.0.0.tar.gz");

        match repo
            .get_distribution_file("widget", "1.0.0", "widget-1.0.0.tar.gz")
            .await
            .unwrap()
        {
            FileSource::Bytes(bytes) => assert_eq!(bytes.as_ref(), b"WHEEL-CONTENT"),
            FileSource::Redirect(url) => panic!("Expected bytes, got redirect to {url}"),
        }
    }

    #[tokio::test]
    async fn test_missing_lookups_are_not_found() {
        let (repo, _tmp) = open_repo().await;

        assert!(matches!(
            repo.get_project("ghost").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            repo.get_distribution_file("ghost", "1.0", "g.tar.gz").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            repo.get_release_metadata("ghost", "1.0").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_release_without_metadata_is_not_found() {
        let (repo, _tmp) = open_repo().await;
        repo.ingest("widget", "1.0", "w.tar.gz", None, None, b"x", false)
            .await
            .unwrap();

        assert!(matches!(
            repo.get_release_metadata("widget", "1.0").await,
            Err(AppError::NotFound(_))
        ));
    }
}
