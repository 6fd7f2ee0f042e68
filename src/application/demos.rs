//! Demo administration: deploy, upload, update, delete and read-side queries.

use std::path::PathBuf;
use std::sync::Arc;

use metrics::{counter, histogram};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;
use vetrina_api_types::{DeployDemoRequest, UpdateDemoRequest};

use crate::application::audit::{AuditService, DemoAction};
use crate::application::auth::Principal;
use crate::application::repos::{
    CreateDemoParams, DemoAccessRepo, DemosRepo, ProjectDemoState, ProjectsRepo, RepoError,
    UpdateDemoParams,
};
use crate::domain::demos::{
    PasswordDigest, demo_url, ensure_own_upload_dir, is_manual_status, overlapping_path,
    transition, validate_local_path, validate_name,
};
use crate::domain::entities::{DemoAccessRecord, DemoRecord, ProjectRecord};
use crate::domain::error::DomainError;
use crate::domain::slug::{SlugAsyncError, SlugError, generate_unique_slug};
use crate::domain::types::{BuildType, DemoStatus};
use crate::infra::demo_storage::{DemoStorage, DemoStorageError, InstalledSite, StagedArchive};
use crate::infra::telemetry::{
    METRIC_DEMO_EXTRACT_MS, METRIC_DEMO_UPLOAD_FAILURES, METRIC_DEMO_UPLOADS,
};

pub const DEFAULT_ACCESS_LOG_LIMIT: u32 = 50;
pub const MAX_ACCESS_LOG_LIMIT: u32 = 200;

#[derive(Debug, Error)]
pub enum DemoServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("demo not found")]
    DemoNotFound,
    #[error("project `{0}` not found")]
    ProjectNotFound(Uuid),
    #[error("project `{0}` already has a demo")]
    AlreadyDeployed(Uuid),
    #[error("local path overlaps `{0}`, which another demo serves")]
    PathInUse(String),
    #[error("not permitted to view this project")]
    Forbidden,
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Storage(#[from] DemoStorageError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<SlugAsyncError<RepoError>> for DemoServiceError {
    fn from(err: SlugAsyncError<RepoError>) -> Self {
        match err {
            SlugAsyncError::Slug(err) => Self::Slug(err),
            SlugAsyncError::Predicate(err) => Self::Repo(err),
        }
    }
}

/// Outcome of a successful archive upload.
#[derive(Debug, Clone)]
pub struct UploadedDemo {
    pub demo: DemoRecord,
    pub site: InstalledSite,
}

/// Orphaned paths found under the demos root, and whether they were removed.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub orphans: Vec<PathBuf>,
    pub removed: usize,
}

#[derive(Clone)]
pub struct DemoService {
    projects: Arc<dyn ProjectsRepo>,
    demos: Arc<dyn DemosRepo>,
    access: Arc<dyn DemoAccessRepo>,
    storage: Arc<DemoStorage>,
    audit: AuditService,
}

impl DemoService {
    pub fn new(
        projects: Arc<dyn ProjectsRepo>,
        demos: Arc<dyn DemosRepo>,
        access: Arc<dyn DemoAccessRepo>,
        storage: Arc<DemoStorage>,
        audit: AuditService,
    ) -> Self {
        Self {
            projects,
            demos,
            access,
            storage,
            audit,
        }
    }

    pub fn storage(&self) -> &Arc<DemoStorage> {
        &self.storage
    }

    /// Register an already-built directory under the demos root as the
    /// project's demo.
    pub async fn deploy(
        &self,
        actor: &Principal,
        request: DeployDemoRequest,
    ) -> Result<DemoRecord, DemoServiceError> {
        let name = validate_name(&request.demo_name)?;
        let local_path = validate_local_path(&request.local_path)?;
        ensure_own_upload_dir(&local_path, request.project_id)?;
        let project = self.require_project(request.project_id).await?;

        if self.demos.find_by_project(project.id).await?.is_some() {
            return Err(DemoServiceError::AlreadyDeployed(project.id));
        }
        let claimed = self.demos.list_local_paths().await?;
        if let Some(owner) = overlapping_path(&local_path, &claimed) {
            return Err(DemoServiceError::PathInUse(owner.to_string()));
        }

        let demo = self
            .create_building(actor, &project, &name, request.build_type, local_path)
            .await?;

        let status = if self.storage.has_index(&demo.local_path).await? {
            DemoStatus::Ready
        } else {
            DemoStatus::Error
        };
        let demo = self.move_to(&demo, status).await?;
        self.projects
            .set_demo_state(project.id, ProjectDemoState::live(demo.url.clone(), status))
            .await?;

        self.audit
            .demo(
                &actor.actor_label(),
                DemoAction::Deploy,
                &demo.slug,
                &json!({
                    "project_id": project.id,
                    "build_type": demo.build_type,
                    "local_path": demo.local_path,
                    "status": demo.status,
                }),
            )
            .await?;

        info!(
            target = "vetrina::demos",
            project_id = %project.id,
            slug = %demo.slug,
            status = %demo.status,
            "demo deployed"
        );
        Ok(demo)
    }

    /// Install a staged archive as the project's demo, creating the record on
    /// first upload and overwriting the tree on later ones.
    pub async fn upload(
        &self,
        actor: &Principal,
        project_id: Uuid,
        staged: StagedArchive,
    ) -> Result<UploadedDemo, DemoServiceError> {
        let project = match self.require_project(project_id).await {
            Ok(project) => project,
            Err(err) => {
                self.storage.discard(staged).await;
                return Err(err);
            }
        };

        let (demo, previous_status) = match self.begin_rebuild(actor, &project).await {
            Ok(rebuild) => rebuild,
            Err(err) => {
                self.storage.discard(staged).await;
                return Err(err);
            }
        };
        if let Err(err) = self
            .projects
            .set_demo_state(
                project.id,
                ProjectDemoState::live(demo.url.clone(), DemoStatus::Building),
            )
            .await
        {
            counter!(METRIC_DEMO_UPLOAD_FAILURES).increment(1);
            self.storage.discard(staged).await;
            self.settle_failed_upload(&demo, previous_status).await;
            return Err(err.into());
        }

        let archive_bytes = staged.size_bytes;
        let site = match self.storage.install_archive(staged, project.id).await {
            Ok(site) => site,
            Err(err) => {
                counter!(METRIC_DEMO_UPLOAD_FAILURES).increment(1);
                self.settle_failed_upload(&demo, previous_status).await;
                return Err(err.into());
            }
        };
        histogram!(METRIC_DEMO_EXTRACT_MS).record(site.elapsed_ms as f64);

        let demo = if demo.local_path != site.local_path {
            self.demos
                .update_demo(
                    demo.id,
                    UpdateDemoParams {
                        local_path: Some(site.local_path.clone()),
                        ..UpdateDemoParams::default()
                    },
                )
                .await?
        } else {
            demo
        };
        let demo = self.move_to(&demo, DemoStatus::Ready).await?;
        self.projects
            .set_demo_state(
                project.id,
                ProjectDemoState::live(demo.url.clone(), DemoStatus::Ready),
            )
            .await?;
        counter!(METRIC_DEMO_UPLOADS).increment(1);

        self.audit
            .demo(
                &actor.actor_label(),
                DemoAction::Upload,
                &demo.slug,
                &json!({
                    "project_id": project.id,
                    "archive_bytes": archive_bytes,
                    "files": site.files,
                    "extracted_bytes": site.extracted_bytes,
                }),
            )
            .await?;

        info!(
            target = "vetrina::demos",
            project_id = %project.id,
            slug = %demo.slug,
            files = site.files,
            extracted_bytes = site.extracted_bytes,
            elapsed_ms = site.elapsed_ms as u64,
            "demo archive installed"
        );
        Ok(UploadedDemo { demo, site })
    }

    pub async fn update(
        &self,
        actor: &Principal,
        slug: &str,
        request: UpdateDemoRequest,
    ) -> Result<DemoRecord, DemoServiceError> {
        let demo = self.require_demo(slug).await?;

        let mut params = UpdateDemoParams::default();
        if let Some(name) = request.demo_name.as_deref() {
            params.name = Some(validate_name(name)?);
        }
        if let Some(password) = request.password.as_deref() {
            params.password = Some(if password.is_empty() {
                None
            } else {
                let digest = PasswordDigest::create(password)?;
                Some((digest.salt, digest.hash))
            });
        }
        params.require_login = request.require_login;

        let next_status = match request.status {
            Some(status) if !is_manual_status(status) => {
                return Err(DomainError::validation(format!(
                    "status may only be set to `ready` or `disabled`, not `{status}`"
                ))
                .into());
            }
            Some(status) if status != demo.status => {
                Some(transition(Some(demo.status), status)?)
            }
            _ => None,
        };

        let has_column_changes = params.name.is_some()
            || params.password.is_some()
            || params.require_login.is_some();
        let mut updated = if has_column_changes {
            self.demos.update_demo(demo.id, params.clone()).await?
        } else {
            demo.clone()
        };
        if let Some(status) = next_status {
            updated = self.demos.update_status(updated.id, status).await?;
            self.projects
                .set_demo_state(
                    updated.project_id,
                    ProjectDemoState::live(updated.url.clone(), status),
                )
                .await?;
        }

        self.audit
            .demo(
                &actor.actor_label(),
                DemoAction::Update,
                &updated.slug,
                &json!({
                    "demo_name": params.name,
                    "status": next_status,
                    "password_changed": params.password.is_some(),
                    "require_login": params.require_login,
                }),
            )
            .await?;

        Ok(updated)
    }

    /// Delete the record first, then the tree. A tree that cannot be removed
    /// is left behind for `reconcile`.
    pub async fn delete(&self, actor: &Principal, slug: &str) -> Result<(), DemoServiceError> {
        let demo = self.require_demo(slug).await?;

        self.demos.delete_demo(demo.id).await?;
        self.projects
            .set_demo_state(demo.project_id, ProjectDemoState::cleared())
            .await?;

        match self.storage.remove_site(&demo.local_path).await {
            Ok(removed) => {
                if !removed {
                    warn!(
                        target = "vetrina::demos",
                        slug = %demo.slug,
                        local_path = %demo.local_path,
                        "demo tree was already missing"
                    );
                }
            }
            Err(err) => {
                warn!(
                    target = "vetrina::demos",
                    slug = %demo.slug,
                    local_path = %demo.local_path,
                    error = %err,
                    "demo record deleted but its files could not be removed"
                );
            }
        }

        self.audit
            .demo(
                &actor.actor_label(),
                DemoAction::Delete,
                &demo.slug,
                &json!({ "project_id": demo.project_id }),
            )
            .await?;

        info!(target = "vetrina::demos", slug = %demo.slug, "demo deleted");
        Ok(())
    }

    /// Demo metadata for an admin, the project's client or an access grantee.
    pub async fn get(
        &self,
        principal: &Principal,
        slug: &str,
    ) -> Result<DemoRecord, DemoServiceError> {
        let demo = self.require_demo(slug).await?;
        if !can_view_project(self.projects.as_ref(), principal, demo.project_id).await? {
            return Err(DemoServiceError::Forbidden);
        }
        Ok(demo)
    }

    pub async fn access_log(
        &self,
        slug: &str,
        limit: Option<u32>,
    ) -> Result<(DemoRecord, Vec<DemoAccessRecord>), DemoServiceError> {
        let demo = self.require_demo(slug).await?;
        let limit = limit
            .unwrap_or(DEFAULT_ACCESS_LOG_LIMIT)
            .clamp(1, MAX_ACCESS_LOG_LIMIT);
        let entries = self.access.list_recent(demo.id, limit).await?;
        Ok((demo, entries))
    }

    /// Find directories under the demos root that no demo references,
    /// optionally removing them.
    pub async fn reconcile(&self, apply: bool) -> Result<ReconcileReport, DemoServiceError> {
        let referenced = self.demos.list_local_paths().await?;
        let orphans = self.storage.orphans(&referenced).await?;

        let mut removed = 0;
        if apply {
            for path in &orphans {
                match self.storage.remove_orphan(path).await {
                    Ok(()) => removed += 1,
                    Err(err) => warn!(
                        target = "vetrina::demos",
                        path = %path.display(),
                        error = %err,
                        "failed to remove orphaned demo path"
                    ),
                }
            }
        }

        Ok(ReconcileReport { orphans, removed })
    }

    async fn require_project(&self, project_id: Uuid) -> Result<ProjectRecord, DemoServiceError> {
        self.projects
            .find_project(project_id)
            .await?
            .ok_or(DemoServiceError::ProjectNotFound(project_id))
    }

    async fn require_demo(&self, slug: &str) -> Result<DemoRecord, DemoServiceError> {
        self.demos
            .find_by_slug(slug)
            .await?
            .ok_or(DemoServiceError::DemoNotFound)
    }

    async fn create_building(
        &self,
        actor: &Principal,
        project: &ProjectRecord,
        name: &str,
        build_type: BuildType,
        local_path: String,
    ) -> Result<DemoRecord, DemoServiceError> {
        transition(None, DemoStatus::Building)?;
        let demos = self.demos.clone();
        let slug = generate_unique_slug(name, |candidate| {
            let demos = demos.clone();
            let candidate = candidate.to_string();
            async move { demos.slug_exists(&candidate).await.map(|exists| !exists) }
        })
        .await?;

        self.demos
            .create_demo(CreateDemoParams {
                project_id: project.id,
                name: name.to_string(),
                slug,
                url: demo_url(project.id),
                build_type,
                local_path,
                deployed_by: actor.email.clone(),
            })
            .await
            .map_err(|err| match err {
                RepoError::Duplicate { constraint } if constraint.contains("project") => {
                    DemoServiceError::AlreadyDeployed(project.id)
                }
                other => other.into(),
            })
    }

    /// Move the project's demo to `building`, creating it on first upload.
    /// Returns the status it had before, if it existed.
    async fn begin_rebuild(
        &self,
        actor: &Principal,
        project: &ProjectRecord,
    ) -> Result<(DemoRecord, Option<DemoStatus>), DemoServiceError> {
        match self.demos.find_by_project(project.id).await? {
            Some(existing) => {
                let previous = existing.status;
                let demo = self.move_to(&existing, DemoStatus::Building).await?;
                Ok((demo, Some(previous)))
            }
            None => {
                let name = validate_name(&project.name)?;
                let demo = self
                    .create_building(
                        actor,
                        project,
                        &name,
                        BuildType::Static,
                        project.id.to_string(),
                    )
                    .await?;
                Ok((demo, None))
            }
        }
    }

    async fn move_to(
        &self,
        demo: &DemoRecord,
        requested: DemoStatus,
    ) -> Result<DemoRecord, DemoServiceError> {
        let status = transition(Some(demo.status), requested)?;
        Ok(self.demos.update_status(demo.id, status).await?)
    }

    /// A rejected archive never touches the installed tree, so a demo that
    /// was serving before goes back to `ready`; anything else lands in `error`.
    async fn settle_failed_upload(&self, demo: &DemoRecord, previous: Option<DemoStatus>) {
        let outcome = async {
            let was_serving = previous == Some(DemoStatus::Ready)
                && self.storage.has_index(&demo.local_path).await?;
            let status = if was_serving {
                DemoStatus::Ready
            } else {
                DemoStatus::Error
            };
            let settled = self.move_to(demo, status).await?;
            self.projects
                .set_demo_state(
                    settled.project_id,
                    ProjectDemoState::live(settled.url.clone(), status),
                )
                .await?;
            Ok::<_, DemoServiceError>(())
        }
        .await;

        if let Err(err) = outcome {
            error!(
                target = "vetrina::demos",
                slug = %demo.slug,
                error = %err,
                "failed to record demo upload failure"
            );
        }
    }
}

/// Admins see everything; others need to be the project's client or hold an
/// access grant.
pub async fn can_view_project(
    projects: &dyn ProjectsRepo,
    principal: &Principal,
    project_id: Uuid,
) -> Result<bool, RepoError> {
    if principal.is_admin {
        return Ok(true);
    }
    projects.has_access(project_id, principal.user_id).await
}
