use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{DemoAccessRepo, NewAccessParams, RepoError},
    domain::entities::DemoAccessRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct AccessRow {
    id: Uuid,
    demo_id: Uuid,
    viewer_id: Option<Uuid>,
    client_addr: Option<String>,
    user_agent: Option<String>,
    accessed_at: OffsetDateTime,
}

impl From<AccessRow> for DemoAccessRecord {
    fn from(row: AccessRow) -> Self {
        Self {
            id: row.id,
            demo_id: row.demo_id,
            viewer_id: row.viewer_id,
            client_addr: row.client_addr,
            user_agent: row.user_agent,
            accessed_at: row.accessed_at,
        }
    }
}

#[async_trait]
impl DemoAccessRepo for PostgresRepositories {
    async fn record_access(&self, params: NewAccessParams) -> Result<(), RepoError> {
        let mut tx = self.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            INSERT INTO demo_access_logs (id, demo_id, viewer_id, client_addr, user_agent, accessed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(params.demo_id)
        .bind(params.viewer_id)
        .bind(params.client_addr)
        .bind(params.user_agent)
        .bind(params.accessed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            UPDATE demos
            SET access_count = access_count + 1, last_accessed_at = $2
            WHERE id = $1
            "#,
        )
        .bind(params.demo_id)
        .bind(params.accessed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn list_recent(
        &self,
        demo_id: Uuid,
        limit: u32,
    ) -> Result<Vec<DemoAccessRecord>, RepoError> {
        let rows = sqlx::query_as::<_, AccessRow>(
            r#"
            SELECT id, demo_id, viewer_id, client_addr, user_agent, accessed_at
            FROM demo_access_logs
            WHERE demo_id = $1
            ORDER BY accessed_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(demo_id)
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
