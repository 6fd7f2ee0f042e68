use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{ProfilesRepo, RepoError},
    domain::{entities::ProfileRecord, types::UserRole},
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    email: String,
    role: UserRole,
    created_at: OffsetDateTime,
}

impl From<ProfileRow> for ProfileRecord {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            role: row.role,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl ProfilesRepo for PostgresRepositories {
    async fn find_profile(&self, id: Uuid) -> Result<Option<ProfileRecord>, RepoError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, email, role, created_at FROM profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(Into::into))
    }

    async fn upsert_profile(
        &self,
        email: &str,
        role: UserRole,
    ) -> Result<ProfileRecord, RepoError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            INSERT INTO profiles (id, email, role, created_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
            RETURNING id, email, role, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(role)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }
}
