//! Repository lifecycle: creation with typed configuration validation,
//! name resolution, deletion with storage cleanup.
//!
//! The registry is the single owner of every repository instance. All
//! validation runs before any side effect, so a rejected creation leaves no
//! storage directory and no catalog entry behind. The catalog is persisted as
//! JSON under the data directory and reloaded at startup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::repository::{LocalRepository, RemoteRepository, Repository, VirtualRepository};
use crate::storage;
use crate::upstream::UpstreamClient;
use crate::validation::validate_repository_name;

/// Catalog file name under the data directory.
const CATALOG_FILE: &str = "repositories.json";

/// Typed per-repository configuration.
///
/// Exactly one variant applies to a repository for its whole lifetime; the
/// variants carry only the fields their type needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RepoConfig {
    /// Locally stored packages, accepts uploads.
    Local,
    /// Fetch-through proxy cache over an upstream registry.
    Remote { url: String },
    /// Ordered aggregation of other repositories by name.
    Virtual { members: Vec<String> },
}

impl RepoConfig {
    /// Short type label for status reporting and logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            RepoConfig::Local => "local",
            RepoConfig::Remote { .. } => "remote",
            RepoConfig::Virtual { .. } => "virtual",
        }
    }
}

/// One catalog entry: identity plus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: Uuid,
    pub name: String,
    /// Package format this repository serves (currently always "pypi").
    pub package_type: String,
    pub config: RepoConfig,
}

enum Backend {
    Local(Arc<LocalRepository>),
    Remote(Arc<RemoteRepository>),
    Virtual(Arc<VirtualRepository>),
}

/// A resolved repository: its record plus the live backend.
pub struct RepositoryHandle {
    record: RepositoryRecord,
    backend: Backend,
}

impl RepositoryHandle {
    pub fn record(&self) -> &RepositoryRecord {
        &self.record
    }

    /// The backend as the shared read contract.
    pub fn reader(&self) -> Arc<dyn Repository> {
        match &self.backend {
            Backend::Local(repo) => repo.clone(),
            Backend::Remote(repo) => repo.clone(),
            Backend::Virtual(repo) => repo.clone(),
        }
    }

    /// The backend as a local repository, if it is one. Ingestion is only
    /// valid against local repositories.
    pub fn as_local(&self) -> Option<Arc<LocalRepository>> {
        match &self.backend {
            Backend::Local(repo) => Some(repo.clone()),
            _ => None,
        }
    }
}

/// Owner of all repositories: catalog, backends and lifecycle operations.
pub struct RepositoryRegistry {
    data_dir: PathBuf,
    upstream: Arc<UpstreamClient>,
    cache_ttl: Duration,
    repos: RwLock<HashMap<String, Arc<RepositoryHandle>>>,
}

impl RepositoryRegistry {
    /// Create an empty registry rooted at `data_dir`. Existing catalog
    /// entries are restored separately via [`load_existing`](Self::load_existing).
    pub fn new(data_dir: PathBuf, upstream: Arc<UpstreamClient>, cache_ttl: Duration) -> Self {
        Self {
            data_dir,
            upstream,
            cache_ttl,
            repos: RwLock::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    fn repo_dir(&self, id: &Uuid) -> PathBuf {
        self.data_dir.join("repos").join(id.to_string())
    }

    fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(CATALOG_FILE)
    }

    async fn build_backend(
        self: &Arc<Self>,
        record: &RepositoryRecord,
    ) -> AppResult<Backend> {
        match &record.config {
            RepoConfig::Local => {
                let repo =
                    LocalRepository::open(&record.name, self.repo_dir(&record.id)).await?;
                Ok(Backend::Local(Arc::new(repo)))
            }
            RepoConfig::Remote { url } => {
                let repo = RemoteRepository::open(
                    &record.name,
                    url,
                    self.upstream.clone(),
                    self.repo_dir(&record.id),
                    self.cache_ttl,
                )
                .await?;
                Ok(Backend::Remote(Arc::new(repo)))
            }
            RepoConfig::Virtual { members } => Ok(Backend::Virtual(Arc::new(
                VirtualRepository::new(&record.name, members.clone(), Arc::downgrade(self)),
            ))),
        }
    }

    /// Validate a configuration against the current catalog. Runs before any
    /// side effect.
    async fn validate_config(&self, name: &str, config: &RepoConfig) -> AppResult<()> {
        validate_repository_name(name)
            .map_err(|e| AppError::InvalidConfiguration(e.to_string()))?;

        let repos = self.repos.read().await;
        if repos.contains_key(name) {
            return Err(AppError::Conflict(format!(
                "Repository already exists: {name}"
            )));
        }

        match config {
            RepoConfig::Local => {}
            RepoConfig::Remote { url } => {
                if url.trim().is_empty() {
                    return Err(AppError::InvalidConfiguration(
                        "Remote repository requires an upstream URL".to_string(),
                    ));
                }
                url::Url::parse(url).map_err(|e| {
                    AppError::InvalidConfiguration(format!("Invalid upstream URL {url}: {e}"))
                })?;
            }
            RepoConfig::Virtual { members } => {
                if members.is_empty() {
                    return Err(AppError::InvalidConfiguration(
                        "Virtual repository requires at least one member".to_string(),
                    ));
                }
                for member in members {
                    if member == name {
                        return Err(AppError::InvalidConfiguration(format!(
                            "Virtual repository cannot reference itself: {name}"
                        )));
                    }
                    if !repos.contains_key(member.as_str()) {
                        return Err(AppError::InvalidConfiguration(format!(
                            "Virtual member does not exist: {member}"
                        )));
                    }
                }
                // Deletion tolerates dangling members, so a deleted-then-
                // recreated repository could close a reference loop. Walk
                // member chains to reject that.
                let mut stack: Vec<&str> = members.iter().map(String::as_str).collect();
                let mut seen: Vec<&str> = Vec::new();
                while let Some(current) = stack.pop() {
                    if current == name {
                        return Err(AppError::InvalidConfiguration(format!(
                            "Virtual repository membership cycle through: {current}"
                        )));
                    }
                    if seen.contains(&current) {
                        continue;
                    }
                    seen.push(current);
                    if let Some(handle) = repos.get(current) {
                        if let RepoConfig::Virtual { members } = &handle.record.config {
                            stack.extend(members.iter().map(String::as_str));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn persist_catalog(&self, repos: &HashMap<String, Arc<RepositoryHandle>>) -> AppResult<()> {
        let mut records: Vec<&RepositoryRecord> =
            repos.values().map(|h| &h.record).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        let json = serde_json::to_string_pretty(&records)?;
        storage::save_file(&self.catalog_path(), json.as_bytes()).await
    }

    /// Restore repositories from the persisted catalog, if one exists.
    pub async fn load_existing(self: &Arc<Self>) -> AppResult<()> {
        let path = self.catalog_path();
        let raw = match storage::read_file_string(&path).await {
            Ok(raw) => raw,
            Err(AppError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let records: Vec<RepositoryRecord> = serde_json::from_str(&raw)?;

        let mut repos = self.repos.write().await;
        for record in records {
            if repos.contains_key(&record.name) {
                continue;
            }
            let backend = self.build_backend(&record).await?;
            info!(repo = %record.name, repo_type = %record.config.type_name(),
                  "Restored repository from catalog");
            repos.insert(
                record.name.clone(),
                Arc::new(RepositoryHandle { record, backend }),
            );
        }
        Ok(())
    }

    /// Create a repository. Validation is complete before any storage is
    /// touched; a rejected creation leaves nothing behind.
    pub async fn create(
        self: &Arc<Self>,
        name: &str,
        package_type: &str,
        config: RepoConfig,
    ) -> AppResult<RepositoryRecord> {
        self.validate_config(name, &config).await?;

        let record = RepositoryRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            package_type: package_type.to_string(),
            config,
        };
        let backend = self.build_backend(&record).await?;

        let mut repos = self.repos.write().await;
        // Re-check under the write lock; validation ran under a read lock.
        if repos.contains_key(name) {
            return Err(AppError::Conflict(format!(
                "Repository already exists: {name}"
            )));
        }
        repos.insert(
            name.to_string(),
            Arc::new(RepositoryHandle {
                record: record.clone(),
                backend,
            }),
        );
        self.persist_catalog(&repos).await?;

        info!(repo = %name, repo_type = %record.config.type_name(), id = %record.id,
              "Created repository");
        Ok(record)
    }

    /// Resolve a repository by name.
    pub async fn get(&self, name: &str) -> AppResult<Arc<RepositoryHandle>> {
        self.repos
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Repository not found: {name}")))
    }

    /// Delete a repository, removing its rows and storage directory.
    ///
    /// Virtual repositories referencing the deleted name keep their member
    /// list; lookups skip the dangling member.
    pub async fn delete(&self, name: &str) -> AppResult<()> {
        let mut repos = self.repos.write().await;
        let handle = repos
            .remove(name)
            .ok_or_else(|| AppError::NotFound(format!("Repository not found: {name}")))?;
        self.persist_catalog(&repos).await?;
        drop(repos);

        let dir = self.repo_dir(&handle.record.id);
        if let Err(e) = storage::remove_dir_if_exists(&dir).await {
            warn!(repo = %name, dir = %dir.display(), error = %e,
                  "Failed to remove repository storage directory");
        }
        info!(repo = %name, "Deleted repository");
        Ok(())
    }

    /// All catalog records, sorted by name.
    pub async fn list(&self) -> Vec<RepositoryRecord> {
        let repos = self.repos.read().await;
        let mut records: Vec<RepositoryRecord> =
            repos.values().map(|h| h.record.clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_registry;

    #[tokio::test]
    async fn test_create_and_lookup() {
        let (registry, _tmp) = create_test_registry();

        let record = registry
            .create("pypi-local", "pypi", RepoConfig::Local)
            .await
            .unwrap();
        assert_eq!(record.name, "pypi-local");
        assert_eq!(record.config, RepoConfig::Local);

        let handle = registry.get("pypi-local").await.unwrap();
        assert_eq!(handle.record().name, "pypi-local");
        assert!(handle.as_local().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_conflict() {
        let (registry, _tmp) = create_test_registry();

        registry
            .create("pypi-local", "pypi", RepoConfig::Local)
            .await
            .unwrap();
        assert!(matches!(
            registry.create("pypi-local", "pypi", RepoConfig::Local).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_configs_rejected_without_side_effects() {
        let (registry, _tmp) = create_test_registry();

        assert!(matches!(
            registry
                .create("bad-remote", "pypi", RepoConfig::Remote { url: "".to_string() })
                .await,
            Err(AppError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            registry
                .create(
                    "bad-remote",
                    "pypi",
                    RepoConfig::Remote {
                        url: "not a url".to_string()
                    }
                )
                .await,
            Err(AppError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            registry
                .create("bad-virtual", "pypi", RepoConfig::Virtual { members: vec![] })
                .await,
            Err(AppError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            registry
                .create(
                    "bad-virtual",
                    "pypi",
                    RepoConfig::Virtual {
                        members: vec!["ghost".to_string()]
                    }
                )
                .await,
            Err(AppError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            registry
                .create(
                    "self-ref",
                    "pypi",
                    RepoConfig::Virtual {
                        members: vec!["self-ref".to_string()]
                    }
                )
                .await,
            Err(AppError::InvalidConfiguration(_))
        ));

        // No storage directories created for any rejected configuration.
        let repos_dir = registry.data_dir().join("repos");
        assert!(!repos_dir.exists() || repos_dir.read_dir().unwrap().next().is_none());
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_membership_cycle_rejected() {
        let (registry, _tmp) = create_test_registry();

        registry
            .create("base", "pypi", RepoConfig::Local)
            .await
            .unwrap();
        registry
            .create(
                "v-one",
                "pypi",
                RepoConfig::Virtual {
                    members: vec!["base".to_string()],
                },
            )
            .await
            .unwrap();
        registry
            .create(
                "v-two",
                "pypi",
                RepoConfig::Virtual {
                    members: vec!["v-one".to_string()],
                },
            )
            .await
            .unwrap();

        // Deleting v-one leaves v-two with a dangling member; recreating
        // v-one over v-two would close the loop.
        registry.delete("v-one").await.unwrap();
        assert!(matches!(
            registry
                .create(
                    "v-one",
                    "pypi",
                    RepoConfig::Virtual {
                        members: vec!["v-two".to_string()]
                    }
                )
                .await,
            Err(AppError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades_storage() {
        let (registry, _tmp) = create_test_registry();

        let record = registry
            .create("pypi-local", "pypi", RepoConfig::Local)
            .await
            .unwrap();
        let handle = registry.get("pypi-local").await.unwrap();
        handle
            .as_local()
            .unwrap()
            .ingest("widget", "1.0.0", "widget-1.0.0.tar.gz", None, None, b"x", false)
            .await
            .unwrap();

        let dir = registry.data_dir().join("repos").join(record.id.to_string());
        assert!(dir.exists());

        registry.delete("pypi-local").await.unwrap();
        assert!(!dir.exists());
        assert!(matches!(
            registry.get("pypi-local").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_catalog_survives_restart() {
        let (registry, tmp) = create_test_registry();
        registry
            .create("pypi-local", "pypi", RepoConfig::Local)
            .await
            .unwrap();
        let handle = registry.get("pypi-local").await.unwrap();
        handle
            .as_local()
            .unwrap()
            .ingest("widget", "1.0.0", "widget-1.0.0.tar.gz", None, None, b"x", false)
            .await
            .unwrap();
        drop(registry);

        let upstream = Arc::new(
            UpstreamClient::new(crate::upstream::UpstreamConfig::default()).unwrap(),
        );
        let restored = Arc::new(RepositoryRegistry::new(
            tmp.path().to_path_buf(),
            upstream,
            Duration::from_secs(300),
        ));
        restored.load_existing().await.unwrap();

        let handle = restored.get("pypi-local").await.unwrap();
        let projects = handle.reader().list_projects().await.unwrap();
        assert_eq!(projects, vec!["widget"]);
    }
}
