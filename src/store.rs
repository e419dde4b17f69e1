//! # Package Index Store
//!
//! Persists packages, releases and distribution files scoped to a single
//! repository, and enforces the uniqueness and ordering invariants:
//!
//! - one package row per normalized project name,
//! - one release row per `(package, version)`, releases kept in insertion
//!   order (versions are opaque strings, never ordered semantically),
//! - one distribution-file row per `(release, filename)`.
//!
//! The store is the unit of mutual exclusion for ingestion: all mutations run
//! under a single write lock, so concurrent ingestions targeting the same
//! `(project, version, filename)` key are serialized and the second writer
//! observes a conflict instead of corrupting state. The index is persisted as
//! a JSON document under the repository's storage directory; distribution
//! bytes live next to it under `files/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::{normalize_project_name, sha256_hash, storage};

/// Name of the persisted index document inside a repository directory.
const INDEX_FILE: &str = "index.json";

/// One physical artifact belonging to a release.
///
/// Exactly one of `url` / `path` is authoritative for byte retrieval; `path`
/// (relative to the repository directory) takes precedence when present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub filename: String,
    /// External retrieval URL (upstream location for cache-listed files).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Local byte storage reference, relative to the repository directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Algorithm -> lowercase hex digest (e.g. "sha256" -> "ab12...").
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

/// One version of a package, with its files in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseEntry {
    pub version: String,
    /// Flat metadata map (`Requires-Python`, `Summary`, ...). An empty map
    /// means no metadata is known for this release.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl ReleaseEntry {
    pub fn find_file(&self, filename: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.filename == filename)
    }
}

/// A named project and its releases inside one repository's index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageEntry {
    /// Normalized project name.
    pub name: String,
    /// Releases in insertion order.
    #[serde(default)]
    pub releases: Vec<ReleaseEntry>,
    /// When this entry was last filled from an upstream registry. `None` for
    /// packages that were ingested directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl PackageEntry {
    pub fn find_release(&self, version: &str) -> Option<&ReleaseEntry> {
        self.releases.iter().find(|r| r.version == version)
    }

    fn find_release_mut(&mut self, version: &str) -> Option<&mut ReleaseEntry> {
        self.releases.iter_mut().find(|r| r.version == version)
    }
}

/// Serialized shape of the whole per-repository index.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PackageIndex {
    /// Normalized project name -> package entry.
    packages: BTreeMap<String, PackageEntry>,
}

/// Per-repository package index with JSON persistence.
///
/// All mutating operations take the write lock, mutate in memory, persist the
/// document and roll the in-memory state back if persistence fails, so reads
/// that start after a completed mutation always observe it (read-after-write
/// consistency scoped to one repository).
pub struct IndexStore {
    root: PathBuf,
    index: RwLock<PackageIndex>,
}

impl IndexStore {
    /// Open (or initialize) the index under the given repository directory.
    pub async fn open<P: AsRef<Path>>(root: P) -> AppResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let raw = storage::read_file(&index_path).await?;
            serde_json::from_slice(&raw)?
        } else {
            PackageIndex::default()
        };

        debug!(root = %root.display(), "Opened package index store");
        Ok(Self {
            root,
            index: RwLock::new(index),
        })
    }

    /// The repository directory this store persists into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sorted list of all project names in this index. Empty is valid.
    pub async fn list_projects(&self) -> Vec<String> {
        self.index.read().await.packages.keys().cloned().collect()
    }

    /// Number of packages in this index.
    pub async fn package_count(&self) -> usize {
        self.index.read().await.packages.len()
    }

    /// Look up a project by (raw or normalized) name.
    pub async fn get_project(&self, project: &str) -> Option<PackageEntry> {
        let key = normalize_project_name(project);
        self.index.read().await.packages.get(&key).cloned()
    }

    /// Look up a single distribution file row.
    pub async fn find_file(
        &self,
        project: &str,
        version: &str,
        filename: &str,
    ) -> Option<FileEntry> {
        let key = normalize_project_name(project);
        let index = self.index.read().await;
        index
            .packages
            .get(&key)?
            .find_release(version)?
            .find_file(filename)
            .cloned()
    }

    /// Metadata map for one release. Returns `None` when the project or
    /// version is absent, or when no metadata is known for the release.
    pub async fn get_release_metadata(
        &self,
        project: &str,
        version: &str,
    ) -> Option<BTreeMap<String, String>> {
        let key = normalize_project_name(project);
        let index = self.index.read().await;
        let metadata = &index.packages.get(&key)?.find_release(version)?.metadata;
        if metadata.is_empty() {
            None
        } else {
            Some(metadata.clone())
        }
    }

    /// Resolve a file row's bytes from local storage.
    pub async fn read_file_bytes(&self, entry: &FileEntry) -> AppResult<Vec<u8>> {
        let rel = entry.path.as_deref().ok_or_else(|| {
            AppError::NotFound(format!("No local bytes for file: {}", entry.filename))
        })?;
        storage::read_file(self.root.join(rel)).await
    }

    /// Commit one uploaded artifact as a single atomic unit.
    ///
    /// Get-or-creates the package and release rows, merges supplied release
    /// metadata (new keys win on conflict), rejects a duplicate filename
    /// unless `overwrite` is set, writes the bytes, computes missing hashes
    /// and persists the index. If persistence fails the written bytes are
    /// removed and the in-memory rows restored — no orphan rows, no orphan
    /// bytes.
    pub async fn commit_artifact(
        &self,
        project: &str,
        version: &str,
        filename: &str,
        metadata: Option<BTreeMap<String, String>>,
        declared_hashes: Option<BTreeMap<String, String>>,
        data: &[u8],
        overwrite: bool,
    ) -> AppResult<FileEntry> {
        let key = normalize_project_name(project);
        let mut index = self.index.write().await;

        // Snapshot for rollback: only this package can change below.
        let snapshot = index.packages.get(&key).cloned();

        let package = index
            .packages
            .entry(key.clone())
            .or_insert_with(|| PackageEntry {
                name: key.clone(),
                releases: Vec::new(),
                fetched_at: None,
            });

        let release_idx = match package.releases.iter().position(|r| r.version == version) {
            Some(idx) => idx,
            None => {
                package.releases.push(ReleaseEntry {
                    version: version.to_string(),
                    metadata: BTreeMap::new(),
                    files: Vec::new(),
                });
                package.releases.len() - 1
            }
        };
        let release = &mut package.releases[release_idx];

        // Metadata enrichment on re-ingestion: merge, new keys win.
        if let Some(new_metadata) = metadata {
            for (k, v) in new_metadata {
                release.metadata.insert(k, v);
            }
        }

        if release.find_file(filename).is_some() {
            if !overwrite {
                warn!(project = %key, version = %version, filename = %filename,
                      "Rejecting duplicate artifact");
                // Restore the metadata-merge side effect too: duplicates must
                // leave the first artifact and its release untouched.
                match snapshot {
                    Some(entry) => {
                        index.packages.insert(key.clone(), entry);
                    }
                    None => {
                        index.packages.remove(&key);
                    }
                }
                return Err(AppError::Conflict(format!(
                    "File already exists: {}-{}/{}",
                    key, version, filename
                )));
            }
            release.files.retain(|f| f.filename != filename);
        }

        let rel_path = format!("files/{}/{}/{}", key, version, filename);
        let abs_path = self.root.join(&rel_path);

        let mut hashes = declared_hashes.unwrap_or_default();
        hashes
            .entry("sha256".to_string())
            .or_insert_with(|| sha256_hash(data));

        let entry = FileEntry {
            filename: filename.to_string(),
            url: None,
            path: Some(rel_path),
            hashes,
        };
        release.files.push(entry.clone());

        // Bytes before the index document; either failure rolls the staged
        // rows back, so no orphan rows and no orphan bytes survive.
        if let Err(e) = storage::save_file(&abs_path, data).await {
            Self::restore(&mut index, &key, snapshot);
            return Err(e);
        }

        if let Err(e) = self.persist(&index).await {
            storage::remove_file_if_exists(&abs_path).await.ok();
            Self::restore(&mut index, &key, snapshot);
            return Err(e);
        }

        info!(project = %key, version = %version, filename = %filename,
              size = data.len(), "Artifact committed");
        Ok(entry)
    }

    /// Replace a whole package entry with freshly fetched upstream rows,
    /// stamping the fetch time. Used by the proxy-cache fill path.
    pub async fn cache_project(&self, mut entry: PackageEntry) -> AppResult<PackageEntry> {
        entry.name = normalize_project_name(&entry.name);
        entry.fetched_at = Some(Utc::now());

        let mut index = self.index.write().await;
        let snapshot = index.packages.insert(entry.name.clone(), entry.clone());
        if let Err(e) = self.persist(&index).await {
            Self::restore(&mut index, &entry.name.clone(), snapshot);
            return Err(e);
        }
        debug!(project = %entry.name, "Cached project index from upstream");
        Ok(entry)
    }

    /// Store fetched bytes for a cache-listed file and switch its row from
    /// URL retrieval to local-path retrieval.
    pub async fn cache_file_bytes(
        &self,
        project: &str,
        version: &str,
        filename: &str,
        data: &[u8],
    ) -> AppResult<FileEntry> {
        let key = normalize_project_name(project);
        let mut index = self.index.write().await;
        let snapshot = index.packages.get(&key).cloned();

        let release = index
            .packages
            .get_mut(&key)
            .and_then(|p| p.find_release_mut(version))
            .ok_or_else(|| {
                AppError::NotFound(format!("No cached release: {}-{}", key, version))
            })?;
        let file = release
            .files
            .iter_mut()
            .find(|f| f.filename == filename)
            .ok_or_else(|| AppError::NotFound(format!("No cached file row: {}", filename)))?;

        let rel_path = format!("files/{}/{}/{}", key, version, filename);
        let abs_path = self.root.join(&rel_path);
        storage::save_file(&abs_path, data).await?;

        file.path = Some(rel_path);
        file.hashes
            .entry("sha256".to_string())
            .or_insert_with(|| sha256_hash(data));
        let entry = file.clone();

        if let Err(e) = self.persist(&index).await {
            storage::remove_file_if_exists(&abs_path).await.ok();
            Self::restore(&mut index, &key, snapshot);
            return Err(e);
        }

        debug!(project = %key, filename = %filename, "Cached file bytes from upstream");
        Ok(entry)
    }

    fn restore(index: &mut PackageIndex, key: &str, snapshot: Option<PackageEntry>) {
        match snapshot {
            Some(entry) => {
                index.packages.insert(key.to_string(), entry);
            }
            None => {
                index.packages.remove(key);
            }
        }
    }

    async fn persist(&self, index: &PackageIndex) -> AppResult<()> {
        let raw = serde_json::to_vec_pretty(index)?;
        storage::save_file(self.root.join(INDEX_FILE), raw).await
    }
}
