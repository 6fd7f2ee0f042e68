use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{ProjectDemoState, ProjectsRepo, RepoError},
    domain::{entities::ProjectRecord, types::DemoStatus},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    name: String,
    client_id: Option<Uuid>,
    has_demo: bool,
    demo_url: Option<String>,
    demo_status: Option<DemoStatus>,
    updated_at: OffsetDateTime,
}

impl From<ProjectRow> for ProjectRecord {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            client_id: row.client_id,
            has_demo: row.has_demo,
            demo_url: row.demo_url,
            demo_status: row.demo_status,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl ProjectsRepo for PostgresRepositories {
    async fn find_project(&self, id: Uuid) -> Result<Option<ProjectRecord>, RepoError> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT id, name, client_id, has_demo, demo_url, demo_status, updated_at
            FROM projects
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn has_access(&self, project_id: Uuid, user_id: Uuid) -> Result<bool, RepoError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM projects WHERE id = $1 AND client_id = $2
                UNION ALL
                SELECT 1 FROM project_access WHERE project_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn set_demo_state(
        &self,
        project_id: Uuid,
        state: ProjectDemoState,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET has_demo = $2, demo_url = $3, demo_status = $4, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(project_id)
        .bind(state.has_demo)
        .bind(state.demo_url)
        .bind(state.demo_status)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
