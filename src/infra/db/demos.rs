use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{CreateDemoParams, DemosRepo, RepoError, UpdateDemoParams},
    domain::{
        entities::DemoRecord,
        types::{BuildType, DemoStatus},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

const DEMO_COLUMNS: &str = "id, project_id, name, slug, url, build_type, status, local_path, \
     password_salt, password_hash, require_login, access_count, last_accessed_at, \
     deployed_by, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct DemoRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    slug: String,
    url: String,
    build_type: BuildType,
    status: DemoStatus,
    local_path: String,
    password_salt: Option<Vec<u8>>,
    password_hash: Option<Vec<u8>>,
    require_login: bool,
    access_count: i64,
    last_accessed_at: Option<OffsetDateTime>,
    deployed_by: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<DemoRow> for DemoRecord {
    fn from(row: DemoRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            slug: row.slug,
            url: row.url,
            build_type: row.build_type,
            status: row.status,
            local_path: row.local_path,
            password_salt: row.password_salt,
            password_hash: row.password_hash,
            require_login: row.require_login,
            access_count: row.access_count,
            last_accessed_at: row.last_accessed_at,
            deployed_by: row.deployed_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl PostgresRepositories {
    async fn find_demo_where<T>(
        &self,
        column: &'static str,
        value: T,
    ) -> Result<Option<DemoRecord>, RepoError>
    where
        T: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + 'static,
    {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(DEMO_COLUMNS);
        qb.push(" FROM demos WHERE ");
        qb.push(column);
        qb.push(" = ");
        qb.push_bind(value);

        let row = qb
            .build_query_as::<DemoRow>()
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl DemosRepo for PostgresRepositories {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<DemoRecord>, RepoError> {
        self.find_demo_where("slug", slug.to_string()).await
    }

    async fn find_by_project(&self, project_id: Uuid) -> Result<Option<DemoRecord>, RepoError> {
        self.find_demo_where("project_id", project_id).await
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, RepoError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM demos WHERE slug = $1)")
            .bind(slug)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn create_demo(&self, params: CreateDemoParams) -> Result<DemoRecord, RepoError> {
        let row = sqlx::query_as::<_, DemoRow>(&format!(
            "INSERT INTO demos (id, project_id, name, slug, url, build_type, status, local_path, \
             require_login, access_count, deployed_by, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, 0, $9, now(), now()) \
             RETURNING {DEMO_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.project_id)
        .bind(params.name)
        .bind(params.slug)
        .bind(params.url)
        .bind(params.build_type)
        .bind(DemoStatus::Building)
        .bind(params.local_path)
        .bind(params.deployed_by)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn update_status(&self, id: Uuid, status: DemoStatus) -> Result<DemoRecord, RepoError> {
        let row = sqlx::query_as::<_, DemoRow>(&format!(
            "UPDATE demos SET status = $2, updated_at = now() WHERE id = $1 \
             RETURNING {DEMO_COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn update_demo(
        &self,
        id: Uuid,
        params: UpdateDemoParams,
    ) -> Result<DemoRecord, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE demos SET updated_at = now()");

        if let Some(name) = params.name {
            qb.push(", name = ");
            qb.push_bind(name);
        }
        if let Some(local_path) = params.local_path {
            qb.push(", local_path = ");
            qb.push_bind(local_path);
        }
        match params.password {
            Some(Some((salt, hash))) => {
                qb.push(", password_salt = ");
                qb.push_bind(salt);
                qb.push(", password_hash = ");
                qb.push_bind(hash);
            }
            Some(None) => {
                qb.push(", password_salt = NULL, password_hash = NULL");
            }
            None => {}
        }
        if let Some(require_login) = params.require_login {
            qb.push(", require_login = ");
            qb.push_bind(require_login);
        }

        qb.push(" WHERE id = ");
        qb.push_bind(id);
        qb.push(" RETURNING ");
        qb.push(DEMO_COLUMNS);

        let row = qb
            .build_query_as::<DemoRow>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn delete_demo(&self, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM demos WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn list_local_paths(&self) -> Result<Vec<String>, RepoError> {
        sqlx::query_scalar::<_, String>("SELECT local_path FROM demos ORDER BY local_path")
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)
    }
}
