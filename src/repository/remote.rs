//! Remote repository: a fetch-through proxy cache over an upstream registry.
//!
//! Reads check the private cache (an embedded local repository) first; on a
//! miss or an expired entry the upstream is consulted, the result is written
//! into the cache, and only then returned. When the upstream cannot be
//! reached the cache's stale entry is served if one exists, otherwise the
//! failure surfaces as `UpstreamUnavailable`.
//!
//! Concurrent requests for the same upstream key are coalesced through a
//! single-flight lock scoped to the key, so unrelated projects fetch
//! independently while duplicate fetches for one key never happen.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::coalesce::Coalescer;
use crate::error::{AppError, AppResult};
use crate::repository::{FileSource, LocalRepository, Repository};
use crate::store::{FileEntry, PackageEntry, ReleaseEntry};
use crate::upstream::{UpstreamClient, UpstreamProject};
use crate::{normalize_project_name, split_distribution_filename};

pub struct RemoteRepository {
    name: String,
    upstream_url: String,
    client: Arc<UpstreamClient>,
    /// Private cache; holds this repository's fetched rows and bytes.
    cache: LocalRepository,
    /// How long a cached project listing stays fresh.
    cache_ttl: Duration,
    project_flights: Coalescer<PackageEntry>,
    file_flights: Coalescer<bytes::Bytes>,
}

impl RemoteRepository {
    /// Open a remote repository with its private cache rooted at `root`.
    pub async fn open<P: AsRef<Path>>(
        name: &str,
        upstream_url: &str,
        client: Arc<UpstreamClient>,
        root: P,
        cache_ttl: Duration,
    ) -> AppResult<Self> {
        let cache = LocalRepository::open(name, root).await?;
        Ok(Self {
            name: name.to_string(),
            upstream_url: upstream_url.trim_end_matches('/').to_string(),
            client,
            cache,
            cache_ttl,
            project_flights: Coalescer::new(),
            file_flights: Coalescer::new(),
        })
    }

    /// The upstream registry URL this repository fronts.
    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    fn is_fresh(&self, entry: &PackageEntry) -> bool {
        entry.fetched_at.is_some_and(|fetched| {
            let age = Utc::now().signed_duration_since(fetched);
            age.to_std().is_ok_and(|age| age < self.cache_ttl)
        })
    }

    /// Translate an upstream listing into cache rows: files grouped into
    /// releases by the version parsed from their filename, upstream URLs and
    /// hashes kept, `Requires-Python` lifted into release metadata. Files
    /// whose version cannot be derived are skipped.
    fn rows_from_listing(listing: UpstreamProject) -> PackageEntry {
        let mut entry = PackageEntry {
            name: normalize_project_name(&listing.name),
            releases: Vec::new(),
            fetched_at: None,
        };

        for file in listing.files {
            let Some((_, version)) = split_distribution_filename(&file.filename) else {
                warn!(filename = %file.filename, "Skipping upstream file with unparseable version");
                continue;
            };

            let idx = match entry.releases.iter().position(|r| r.version == version) {
                Some(idx) => idx,
                None => {
                    entry.releases.push(ReleaseEntry {
                        version: version.clone(),
                        metadata: BTreeMap::new(),
                        files: Vec::new(),
                    });
                    entry.releases.len() - 1
                }
            };
            let release = &mut entry.releases[idx];

            if let Some(requires_python) = &file.requires_python {
                release
                    .metadata
                    .entry("Requires-Python".to_string())
                    .or_insert_with(|| requires_python.clone());
            }

            release.files.push(FileEntry {
                filename: file.filename,
                url: Some(file.url),
                path: None,
                hashes: file.hashes,
            });
        }

        entry
    }

    /// Resolve a project entry: fresh cache, else coalesced upstream fetch
    /// with cache fill, else stale cache fallback.
    async fn resolve_project(&self, project: &str) -> AppResult<PackageEntry> {
        let key = normalize_project_name(project);

        if let Some(entry) = self.cache.store().get_project(&key).await {
            if self.is_fresh(&entry) {
                debug!(repo = %self.name, project = %key, "Serving project from fresh cache");
                return Ok(entry);
            }
        }

        let fetched = self
            .project_flights
            .coalesce(&key, || async {
                let listing = self
                    .client
                    .fetch_project_index(&self.upstream_url, &key)
                    .await?;
                let rows = Self::rows_from_listing(listing);
                self.cache.store().cache_project(rows).await
            })
            .await;

        match fetched {
            Ok(entry) => Ok(entry),
            Err(AppError::UpstreamUnavailable(msg)) => {
                // Stale entries beat an unreachable upstream.
                if let Some(stale) = self.cache.store().get_project(&key).await {
                    info!(repo = %self.name, project = %key,
                          "Upstream unavailable, serving stale cache entry");
                    return Ok(stale);
                }
                Err(AppError::UpstreamUnavailable(msg))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Repository for RemoteRepository {
    fn name(&self) -> &str {
        &self.name
    }

    /// Project names this proxy has cached so far. The upstream's full
    /// project universe is not enumerated; the listing grows as projects are
    /// requested through the cache.
    async fn list_projects(&self) -> AppResult<Vec<String>> {
        self.cache.list_projects().await
    }

    async fn get_project(&self, project: &str) -> AppResult<PackageEntry> {
        self.resolve_project(project).await
    }

    async fn get_distribution_file(
        &self,
        project: &str,
        version: &str,
        filename: &str,
    ) -> AppResult<FileSource> {
        let key = normalize_project_name(project);

        // Filled cache first: bytes already on disk need no upstream call.
        if let Some(entry) = self.cache.store().find_file(&key, version, filename).await {
            if entry.path.is_some() {
                let bytes = self.cache.store().read_file_bytes(&entry).await?;
                return Ok(FileSource::Bytes(bytes.into()));
            }
        }

        // Make sure the listing rows exist (fetches upstream on miss).
        let entry = self.resolve_project(&key).await?;
        let file = entry
            .find_release(version)
            .and_then(|r| r.find_file(filename))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!("File not found: {key}-{version}/{filename}"))
            })?;

        if file.path.is_some() {
            let bytes = self.cache.store().read_file_bytes(&file).await?;
            return Ok(FileSource::Bytes(bytes.into()));
        }

        let url = file.url.clone().ok_or_else(|| {
            AppError::NotFound(format!("File has no byte source: {filename}"))
        })?;

        let flight_key = format!("{key}/{version}/{filename}");
        let bytes = self
            .file_flights
            .coalesce(&flight_key, || async {
                let data = self.client.fetch_file(&url).await?;
                self.cache
                    .store()
                    .cache_file_bytes(&key, version, filename, &data)
                    .await?;
                Ok(data)
            })
            .await?;

        Ok(FileSource::Bytes(bytes))
    }

    async fn get_release_metadata(
        &self,
        project: &str,
        version: &str,
    ) -> AppResult<BTreeMap<String, String>> {
        let entry = self.resolve_project(project).await?;
        let release = entry.find_release(version).ok_or_else(|| {
            AppError::NotFound(format!("Release not found: {project}-{version}"))
        })?;
        if release.metadata.is_empty() {
            return Err(AppError::NotFound(format!(
                "No metadata for release: {project}-{version}"
            )));
        }
        Ok(release.metadata.clone())
    }

    async fn package_count(&self) -> usize {
        self.cache.package_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamFile;

    #[test]
    fn test_rows_from_listing_groups_files_into_releases() {
        let listing = UpstreamProject {
            name: "Widget".to_string(),
            files: vec![
                UpstreamFile {
                    filename: "widget-1.0.0.tar.gz".to_string(),
                    url: "https://files.example/widget-1.0.0.tar.gz".to_string(),
                    hashes: BTreeMap::from([("sha256".to_string(), "aa".to_string())]),
                    requires_python: Some(">=3.8".to_string()),
                },
                UpstreamFile {
                    filename: "widget-1.0.0-py3-none-any.whl".to_string(),
                    url: "https://files.example/widget-1.0.0-py3-none-any.whl".to_string(),
                    hashes: BTreeMap::new(),
                    requires_python: None,
                },
                UpstreamFile {
                    filename: "widget-2.0.tar.gz".to_string(),
                    url: "https://files.example/widget-2.0.tar.gz".to_string(),
                    hashes: BTreeMap::new(),
                    requires_python: None,
                },
                UpstreamFile {
                    filename: "garbage".to_string(),
                    url: "https://files.example/garbage".to_string(),
                    hashes: BTreeMap::new(),
                    requires_python: None,
                },
            ],
        };

        let entry = RemoteRepository::rows_from_listing(listing);
        assert_eq!(entry.name, "widget");
        assert_eq!(entry.releases.len(), 2);

        let release = entry.find_release("1.0.0").unwrap();
        assert_eq!(release.files.len(), 2);
        assert_eq!(release.metadata["Requires-Python"], ">=3.8");
        assert_eq!(
            release.files[0].url.as_deref(),
            Some("https://files.example/widget-1.0.0.tar.gz")
        );
        assert!(release.files[0].path.is_none());

        assert!(entry.find_release("2.0").unwrap().metadata.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_with_cold_cache_is_unavailable() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let client = Arc::new(
            UpstreamClient::new(crate::upstream::UpstreamConfig {
                timeout: Duration::from_millis(200),
                ..Default::default()
            })
            .unwrap(),
        );
        let repo = RemoteRepository::open(
            "pypi-remote",
            "http://192.0.2.1:9/simple",
            client,
            temp_dir.path().join("cache"),
            Duration::from_secs(300),
        )
        .await
        .unwrap();

        assert!(matches!(
            repo.get_project("widget").await,
            Err(AppError::UpstreamUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_serves_stale_cache() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let client = Arc::new(
            UpstreamClient::new(crate::upstream::UpstreamConfig {
                timeout: Duration::from_millis(200),
                ..Default::default()
            })
            .unwrap(),
        );
        // Zero TTL: every cached entry is immediately stale, forcing the
        // upstream path on each read.
        let repo = RemoteRepository::open(
            "pypi-remote",
            "http://192.0.2.1:9/simple",
            client,
            temp_dir.path().join("cache"),
            Duration::from_secs(0),
        )
        .await
        .unwrap();

        // Warm the cache directly, as a successful earlier fetch would have.
        repo.cache
            .store()
            .cache_project(PackageEntry {
                name: "widget".to_string(),
                releases: vec![ReleaseEntry {
                    version: "1.0.0".to_string(),
                    metadata: BTreeMap::new(),
                    files: Vec::new(),
                }],
                fetched_at: None,
            })
            .await
            .unwrap();

        let entry = repo.get_project("widget").await.unwrap();
        assert_eq!(entry.name, "widget");
        assert_eq!(entry.releases[0].version, "1.0.0");
    }
}
