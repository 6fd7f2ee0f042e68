#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;
use zip::write::SimpleFileOptions;

use vetrina::application::audit::AuditService;
use vetrina::application::auth::AuthService;
use vetrina::application::demos::DemoService;
use vetrina::application::repos::{
    AuditRepo, CreateDemoParams, CreateSessionParams, DemoAccessRepo, DemosRepo, HealthRepo,
    NewAccessParams, ProfilesRepo, ProjectDemoState, ProjectsRepo, RepoError, SessionsRepo,
    UpdateDemoParams,
};
use vetrina::application::viewer::DemoViewer;
use vetrina::domain::entities::{
    AuditLogRecord, DemoAccessRecord, DemoRecord, ProfileRecord, ProjectRecord, SessionRecord,
};
use vetrina::domain::types::{DemoStatus, UserRole};
use vetrina::infra::demo_storage::{DemoStorage, ExtractLimits};
use vetrina::infra::http::{HttpState, PasswordRateLimiter, build_router};

pub const SESSION_COOKIE: &str = "vetrina_session";
pub const ADMIN_EMAIL: &str = "ops@agency.test";

/// Every repository trait over plain maps.
#[derive(Default)]
pub struct MemoryRepos {
    profiles: Mutex<HashMap<Uuid, ProfileRecord>>,
    sessions: Mutex<HashMap<String, SessionRecord>>,
    projects: Mutex<HashMap<Uuid, ProjectRecord>>,
    grants: Mutex<Vec<(Uuid, Uuid)>>,
    demos: Mutex<HashMap<Uuid, DemoRecord>>,
    access: Mutex<Vec<DemoAccessRecord>>,
    audit: Mutex<Vec<AuditLogRecord>>,
    refuse_building_state: AtomicBool,
}

impl MemoryRepos {
    /// Make project updates to `building` fail, as a lost database would.
    pub fn refuse_building_state(&self) {
        self.refuse_building_state.store(true, Ordering::SeqCst);
    }

    pub async fn add_project(&self, name: &str, client_id: Option<Uuid>) -> Uuid {
        let record = ProjectRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            client_id,
            has_demo: false,
            demo_url: None,
            demo_status: None,
            updated_at: OffsetDateTime::now_utc(),
        };
        let id = record.id;
        self.projects.lock().await.insert(id, record);
        id
    }

    pub async fn grant_access(&self, project_id: Uuid, user_id: Uuid) {
        self.grants.lock().await.push((project_id, user_id));
    }

    pub async fn project(&self, id: Uuid) -> ProjectRecord {
        self.projects
            .lock()
            .await
            .get(&id)
            .cloned()
            .expect("project exists")
    }

    pub async fn demo_for(&self, project_id: Uuid) -> Option<DemoRecord> {
        self.demos
            .lock()
            .await
            .values()
            .find(|demo| demo.project_id == project_id)
            .cloned()
    }

    pub async fn force_status(&self, project_id: Uuid, status: DemoStatus) {
        let mut demos = self.demos.lock().await;
        let demo = demos
            .values_mut()
            .find(|demo| demo.project_id == project_id)
            .expect("demo exists");
        demo.status = status;
    }

    pub async fn audit_actions(&self) -> Vec<String> {
        self.audit
            .lock()
            .await
            .iter()
            .map(|record| record.action.clone())
            .collect()
    }

    pub async fn access_rows(&self) -> usize {
        self.access.lock().await.len()
    }
}

#[async_trait]
impl ProfilesRepo for MemoryRepos {
    async fn find_profile(&self, id: Uuid) -> Result<Option<ProfileRecord>, RepoError> {
        Ok(self.profiles.lock().await.get(&id).cloned())
    }

    async fn upsert_profile(
        &self,
        email: &str,
        role: UserRole,
    ) -> Result<ProfileRecord, RepoError> {
        let mut profiles = self.profiles.lock().await;
        if let Some(existing) = profiles.values_mut().find(|p| p.email == email) {
            existing.role = role;
            return Ok(existing.clone());
        }
        let record = ProfileRecord {
            id: Uuid::new_v4(),
            email: email.to_string(),
            role,
            created_at: OffsetDateTime::now_utc(),
        };
        profiles.insert(record.id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl SessionsRepo for MemoryRepos {
    async fn find_by_prefix(&self, prefix: &str) -> Result<Option<SessionRecord>, RepoError> {
        Ok(self.sessions.lock().await.get(prefix).cloned())
    }

    async fn create_session(
        &self,
        params: CreateSessionParams,
    ) -> Result<SessionRecord, RepoError> {
        let record = SessionRecord {
            id: Uuid::new_v4(),
            user_id: params.user_id,
            prefix: params.prefix.clone(),
            hashed_secret: params.hashed_secret,
            expires_at: params.expires_at,
            revoked_at: None,
            last_used_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.sessions
            .lock()
            .await
            .insert(params.prefix, record.clone());
        Ok(record)
    }

    async fn revoke_session(&self, prefix: &str, at: OffsetDateTime) -> Result<(), RepoError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(prefix).ok_or(RepoError::NotFound)?;
        session.revoked_at = Some(at);
        Ok(())
    }

    async fn touch_session(&self, id: Uuid, at: OffsetDateTime) -> Result<(), RepoError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.values_mut().find(|s| s.id == id) {
            session.last_used_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectsRepo for MemoryRepos {
    async fn find_project(&self, id: Uuid) -> Result<Option<ProjectRecord>, RepoError> {
        Ok(self.projects.lock().await.get(&id).cloned())
    }

    async fn has_access(&self, project_id: Uuid, user_id: Uuid) -> Result<bool, RepoError> {
        let is_client = self
            .projects
            .lock()
            .await
            .get(&project_id)
            .is_some_and(|project| project.client_id == Some(user_id));
        if is_client {
            return Ok(true);
        }
        Ok(self
            .grants
            .lock()
            .await
            .iter()
            .any(|grant| *grant == (project_id, user_id)))
    }

    async fn set_demo_state(
        &self,
        project_id: Uuid,
        state: ProjectDemoState,
    ) -> Result<(), RepoError> {
        if state.demo_status == Some(DemoStatus::Building)
            && self.refuse_building_state.load(Ordering::SeqCst)
        {
            return Err(RepoError::Timeout);
        }
        let mut projects = self.projects.lock().await;
        let project = projects.get_mut(&project_id).ok_or(RepoError::NotFound)?;
        project.has_demo = state.has_demo;
        project.demo_url = state.demo_url;
        project.demo_status = state.demo_status;
        project.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[async_trait]
impl DemosRepo for MemoryRepos {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<DemoRecord>, RepoError> {
        Ok(self
            .demos
            .lock()
            .await
            .values()
            .find(|demo| demo.slug == slug)
            .cloned())
    }

    async fn find_by_project(&self, project_id: Uuid) -> Result<Option<DemoRecord>, RepoError> {
        Ok(self.demo_for(project_id).await)
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, RepoError> {
        Ok(self
            .demos
            .lock()
            .await
            .values()
            .any(|demo| demo.slug == slug))
    }

    async fn create_demo(&self, params: CreateDemoParams) -> Result<DemoRecord, RepoError> {
        let mut demos = self.demos.lock().await;
        if demos.values().any(|demo| demo.project_id == params.project_id) {
            return Err(RepoError::Duplicate {
                constraint: "demos_project_id_key".to_string(),
            });
        }
        if demos.values().any(|demo| demo.slug == params.slug) {
            return Err(RepoError::Duplicate {
                constraint: "demos_slug_key".to_string(),
            });
        }

        let now = OffsetDateTime::now_utc();
        let record = DemoRecord {
            id: Uuid::new_v4(),
            project_id: params.project_id,
            name: params.name,
            slug: params.slug,
            url: params.url,
            build_type: params.build_type,
            status: DemoStatus::Building,
            local_path: params.local_path,
            password_salt: None,
            password_hash: None,
            require_login: false,
            access_count: 0,
            last_accessed_at: None,
            deployed_by: params.deployed_by,
            created_at: now,
            updated_at: now,
        };
        demos.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_status(&self, id: Uuid, status: DemoStatus) -> Result<DemoRecord, RepoError> {
        let mut demos = self.demos.lock().await;
        let demo = demos.get_mut(&id).ok_or(RepoError::NotFound)?;
        demo.status = status;
        demo.updated_at = OffsetDateTime::now_utc();
        Ok(demo.clone())
    }

    async fn update_demo(
        &self,
        id: Uuid,
        params: UpdateDemoParams,
    ) -> Result<DemoRecord, RepoError> {
        let mut demos = self.demos.lock().await;
        let demo = demos.get_mut(&id).ok_or(RepoError::NotFound)?;
        if let Some(name) = params.name {
            demo.name = name;
        }
        if let Some(local_path) = params.local_path {
            demo.local_path = local_path;
        }
        match params.password {
            Some(Some((salt, hash))) => {
                demo.password_salt = Some(salt);
                demo.password_hash = Some(hash);
            }
            Some(None) => {
                demo.password_salt = None;
                demo.password_hash = None;
            }
            None => {}
        }
        if let Some(require_login) = params.require_login {
            demo.require_login = require_login;
        }
        demo.updated_at = OffsetDateTime::now_utc();
        Ok(demo.clone())
    }

    async fn delete_demo(&self, id: Uuid) -> Result<(), RepoError> {
        self.demos
            .lock()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)?;
        self.access.lock().await.retain(|row| row.demo_id != id);
        Ok(())
    }

    async fn list_local_paths(&self) -> Result<Vec<String>, RepoError> {
        let mut paths: Vec<String> = self
            .demos
            .lock()
            .await
            .values()
            .map(|demo| demo.local_path.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl DemoAccessRepo for MemoryRepos {
    async fn record_access(&self, params: NewAccessParams) -> Result<(), RepoError> {
        {
            let mut demos = self.demos.lock().await;
            let demo = demos.get_mut(&params.demo_id).ok_or(RepoError::NotFound)?;
            demo.access_count += 1;
            demo.last_accessed_at = Some(params.accessed_at);
        }
        self.access.lock().await.push(DemoAccessRecord {
            id: Uuid::new_v4(),
            demo_id: params.demo_id,
            viewer_id: params.viewer_id,
            client_addr: params.client_addr,
            user_agent: params.user_agent,
            accessed_at: params.accessed_at,
        });
        Ok(())
    }

    async fn list_recent(
        &self,
        demo_id: Uuid,
        limit: u32,
    ) -> Result<Vec<DemoAccessRecord>, RepoError> {
        Ok(self
            .access
            .lock()
            .await
            .iter()
            .rev()
            .filter(|row| row.demo_id == demo_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuditRepo for MemoryRepos {
    async fn append_log(&self, record: AuditLogRecord) -> Result<(), RepoError> {
        self.audit.lock().await.push(record);
        Ok(())
    }
}

#[async_trait]
impl HealthRepo for MemoryRepos {
    async fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub repos: Arc<MemoryRepos>,
    pub auth: Arc<AuthService>,
    pub demos_dir: TempDir,
    pub admin_token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_limits(ExtractLimits {
            max_upload_bytes: 1024 * 1024,
            max_extracted_bytes: 4 * 1024 * 1024,
            max_entries: 64,
        })
        .await
    }

    pub async fn with_limits(limits: ExtractLimits) -> Self {
        let repos = Arc::new(MemoryRepos::default());
        let demos_dir = tempfile::tempdir().expect("temp demos dir");
        let storage = Arc::new(
            DemoStorage::new(demos_dir.path().to_path_buf(), limits).expect("demo storage"),
        );

        let auth = Arc::new(AuthService::new(
            repos.clone(),
            repos.clone(),
            &[ADMIN_EMAIL.to_string()],
        ));
        let demos = Arc::new(DemoService::new(
            repos.clone(),
            repos.clone(),
            repos.clone(),
            storage.clone(),
            AuditService::new(repos.clone()),
        ));
        let viewer = Arc::new(DemoViewer::new(
            repos.clone(),
            repos.clone(),
            repos.clone(),
            storage,
        ));

        let state = HttpState {
            auth: auth.clone(),
            demos,
            viewer,
            health: repos.clone(),
            password_limiter: Arc::new(PasswordRateLimiter::new(
                std::time::Duration::from_secs(60),
                3,
            )),
            session_cookie: Arc::from(SESSION_COOKIE),
            trusted_proxies: Arc::from(Vec::new()),
            upload_limit_bytes: limits.max_upload_bytes,
        };

        let admin_token = auth
            .issue(ADMIN_EMAIL, UserRole::Client, None)
            .await
            .expect("admin token")
            .token;

        Self {
            router: build_router(state),
            repos,
            auth,
            demos_dir,
            admin_token,
        }
    }

    /// Issue a token for a non-admin user, returning it with the profile id.
    pub async fn client_token(&self, email: &str) -> (String, Uuid) {
        let issued = self
            .auth
            .issue(email, UserRole::Client, None)
            .await
            .expect("client token");
        (issued.token, issued.profile.id)
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn upload(&self, token: &str, project_id: Uuid, archive: Vec<u8>) -> TestResponse {
        self.send(upload_request(Some(token), &project_id.to_string(), archive))
            .await
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("json body")
    }

    pub fn set_cookie(&self) -> Option<String> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or_default().to_string())
    }
}

/// Build a zip archive from `(path, contents)` pairs.
pub fn zip_site(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(contents).expect("write entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

pub fn upload_request(token: Option<&str>, project_id: &str, archive: Vec<u8>) -> Request<Body> {
    const BOUNDARY: &str = "vetrina-test-boundary";

    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"projectId\"\r\n\r\n{project_id}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"site.zip\"\r\nContent-Type: application/zip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&archive);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/demo-upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).expect("request")
}

pub fn json_request(
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .expect("request")
}

pub fn password_form(uri: &str, password: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("password={password}")))
        .expect("request")
}
