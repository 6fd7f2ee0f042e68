//! Read path for served demos: status and access gates, document loading and
//! access recording.

use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::application::auth::Principal;
use crate::application::demos::can_view_project;
use crate::application::repos::{
    DemoAccessRepo, DemosRepo, NewAccessParams, ProjectsRepo, RepoError,
};
use crate::application::rewrite::{RewriteError, inject_base_href};
use crate::domain::demos::{
    INDEX_FILE, PasswordDigest, demo_url, unlock_token, verify_unlock_token,
};
use crate::domain::entities::DemoRecord;
use crate::domain::types::DemoStatus;
use crate::infra::demo_storage::{DemoStorage, DemoStorageError};
use crate::infra::telemetry::METRIC_DEMO_VIEWS;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("demo not found")]
    NotFound,
    #[error("demo is still building")]
    Building,
    #[error("login required")]
    LoginRequired,
    #[error("not permitted to view this demo")]
    Forbidden,
    #[error(transparent)]
    Storage(#[from] DemoStorageError),
    #[error(transparent)]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Who is looking at a demo, as recorded in the access log.
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub principal: Option<Principal>,
    pub client_addr: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct DemoViewer {
    projects: Arc<dyn ProjectsRepo>,
    demos: Arc<dyn DemosRepo>,
    access: Arc<dyn DemoAccessRepo>,
    storage: Arc<DemoStorage>,
}

impl DemoViewer {
    pub fn new(
        projects: Arc<dyn ProjectsRepo>,
        demos: Arc<dyn DemosRepo>,
        access: Arc<dyn DemoAccessRepo>,
        storage: Arc<DemoStorage>,
    ) -> Self {
        Self {
            projects,
            demos,
            access,
            storage,
        }
    }

    /// Resolve the project's demo and apply the status and login gates.
    ///
    /// Password gating is left to the caller because it depends on cookies
    /// and form input.
    pub async fn open(
        &self,
        project_id: Uuid,
        principal: Option<&Principal>,
    ) -> Result<DemoRecord, ViewError> {
        let demo = self
            .demos
            .find_by_project(project_id)
            .await?
            .ok_or(ViewError::NotFound)?;

        match demo.status {
            DemoStatus::Ready => {}
            DemoStatus::Building => return Err(ViewError::Building),
            DemoStatus::Error | DemoStatus::Disabled => return Err(ViewError::NotFound),
        }

        if !self.storage.has_index(&demo.local_path).await? {
            return Err(ViewError::NotFound);
        }

        if demo.require_login {
            let principal = principal.ok_or(ViewError::LoginRequired)?;
            if !can_view_project(self.projects.as_ref(), principal, demo.project_id).await? {
                return Err(ViewError::Forbidden);
            }
        }

        Ok(demo)
    }

    /// Whether the viewer still has to supply the demo password.
    pub fn is_locked(&self, demo: &DemoRecord, unlock_cookie: Option<&str>) -> bool {
        let Some(hash) = demo.password_hash.as_deref() else {
            return false;
        };
        !unlock_cookie.is_some_and(|token| verify_unlock_token(demo.id, hash, token))
    }

    /// Check a submitted password, returning the unlock cookie value when it
    /// matches. Demos without a password never produce one.
    pub fn unlock(&self, demo: &DemoRecord, candidate: &str) -> Option<String> {
        let salt = demo.password_salt.as_deref()?;
        let hash = demo.password_hash.as_deref()?;
        PasswordDigest::verify(salt, hash, candidate).then(|| unlock_token(demo.id, hash))
    }

    /// Load `index.html` with the demo's `<base href>` injected.
    pub async fn index_document(&self, demo: &DemoRecord) -> Result<String, ViewError> {
        let bytes = self
            .storage
            .read_asset(&demo.local_path, INDEX_FILE)
            .await?
            .ok_or(ViewError::NotFound)?;
        let html = String::from_utf8_lossy(&bytes);
        Ok(inject_base_href(&html, &demo_url(demo.project_id))?)
    }

    pub async fn asset(&self, demo: &DemoRecord, path: &str) -> Result<Bytes, ViewError> {
        match self.storage.read_asset(&demo.local_path, path).await {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) | Err(DemoStorageError::InvalidPath) => Err(ViewError::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Append an access log row and bump the counter. Failures are logged and
    /// swallowed so a view is never refused over bookkeeping.
    pub async fn record_view(&self, demo: &DemoRecord, viewer: Viewer) {
        counter!(METRIC_DEMO_VIEWS).increment(1);
        let params = NewAccessParams {
            demo_id: demo.id,
            viewer_id: viewer.principal.as_ref().map(|principal| principal.user_id),
            client_addr: viewer.client_addr,
            user_agent: viewer.user_agent,
            accessed_at: OffsetDateTime::now_utc(),
        };
        if let Err(err) = self.access.record_access(params).await {
            warn!(
                target = "vetrina::viewer",
                demo_id = %demo.id,
                error = %err,
                "failed to record demo access"
            );
        }
    }
}
