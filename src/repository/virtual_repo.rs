//! Virtual repository: an ordered aggregate over other repositories.
//!
//! A virtual repository owns no storage. Lookups ask each member in
//! configured order and the first member that answers wins; later members are
//! not consulted, even if they also hold the key. A member's failure is
//! treated as "no answer from this member" and the walk continues, so one
//! broken remote does not take down the aggregate.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::registry::RepositoryRegistry;
use crate::repository::{FileSource, Repository};
use crate::store::PackageEntry;

pub struct VirtualRepository {
    name: String,
    members: Vec<String>,
    /// Weak because the registry owns this repository; member resolution
    /// happens per read so membership follows registry changes.
    registry: Weak<RepositoryRegistry>,
}

impl VirtualRepository {
    pub fn new(name: &str, members: Vec<String>, registry: Weak<RepositoryRegistry>) -> Self {
        Self {
            name: name.to_string(),
            members,
            registry,
        }
    }

    /// Member names in resolution order.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    fn registry(&self) -> AppResult<Arc<RepositoryRegistry>> {
        self.registry.upgrade().ok_or_else(|| {
            AppError::InternalError("Repository registry has been dropped".to_string())
        })
    }

    /// Walk members in order applying `op`; first success wins.
    ///
    /// `NotFound` from a member means "keep walking". Any other member error
    /// is logged, remembered and the walk continues; if no member answers the
    /// final error is `UpstreamUnavailable` when any member failed that way,
    /// otherwise `NotFound`.
    async fn first_match<T, F>(&self, what: &str, op: F) -> AppResult<T>
    where
        F: Fn(Arc<dyn Repository>) -> BoxFuture<'static, AppResult<T>>,
    {
        let registry = self.registry()?;
        let mut saw_unavailable = false;

        for member in &self.members {
            let handle = match registry.get(member).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(repo = %self.name, member = %member, error = %e,
                          "Skipping unresolvable virtual member");
                    continue;
                }
            };

            match op(handle.reader()).await {
                Ok(value) => {
                    debug!(repo = %self.name, member = %member, what = %what,
                           "Virtual lookup answered by member");
                    return Ok(value);
                }
                Err(AppError::NotFound(_)) => continue,
                Err(e) => {
                    warn!(repo = %self.name, member = %member, what = %what, error = %e,
                          "Virtual member failed, trying next");
                    saw_unavailable = true;
                }
            }
        }

        if saw_unavailable {
            Err(AppError::UpstreamUnavailable(format!(
                "No virtual member could answer for {what} and at least one member failed"
            )))
        } else {
            Err(AppError::NotFound(format!("Not found in any member: {what}")))
        }
    }
}

#[async_trait]
impl Repository for VirtualRepository {
    fn name(&self) -> &str {
        &self.name
    }

    /// Sorted union of every member's listing. A member that cannot list is
    /// skipped with a warning rather than failing the union.
    async fn list_projects(&self) -> AppResult<Vec<String>> {
        let registry = self.registry()?;
        let mut union = BTreeSet::new();

        for member in &self.members {
            let handle = match registry.get(member).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(repo = %self.name, member = %member, error = %e,
                          "Skipping unresolvable virtual member");
                    continue;
                }
            };
            match handle.reader().list_projects().await {
                Ok(projects) => union.extend(projects),
                Err(e) => {
                    warn!(repo = %self.name, member = %member, error = %e,
                          "Virtual member failed to list projects");
                }
            }
        }

        Ok(union.into_iter().collect())
    }

    async fn get_project(&self, project: &str) -> AppResult<PackageEntry> {
        let project = project.to_string();
        self.first_match(&format!("project {project}"), move |repo| {
            let project = project.clone();
            Box::pin(async move { repo.get_project(&project).await })
        })
        .await
    }

    async fn get_distribution_file(
        &self,
        project: &str,
        version: &str,
        filename: &str,
    ) -> AppResult<FileSource> {
        let (project, version, filename) =
            (project.to_string(), version.to_string(), filename.to_string());
        let what = format!("file {project}-{version}/{filename}");
        self.first_match(&what, move |repo| {
            let (project, version, filename) =
                (project.clone(), version.clone(), filename.clone());
            Box::pin(async move {
                repo.get_distribution_file(&project, &version, &filename)
                    .await
            })
        })
        .await
    }

    async fn get_release_metadata(
        &self,
        project: &str,
        version: &str,
    ) -> AppResult<BTreeMap<String, String>> {
        let (project, version) = (project.to_string(), version.to_string());
        let what = format!("metadata {project}-{version}");
        self.first_match(&what, move |repo| {
            let (project, version) = (project.clone(), version.clone());
            Box::pin(async move { repo.get_release_metadata(&project, &version).await })
        })
        .await
    }

    /// Number of distinct projects across members.
    async fn package_count(&self) -> usize {
        self.list_projects().await.map(|p| p.len()).unwrap_or(0)
    }
}
