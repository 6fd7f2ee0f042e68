use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{AuditRepo, RepoError};
use crate::domain::entities::AuditLogRecord;

const DEMO_ENTITY: &str = "demo";

/// Mutations that leave an audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoAction {
    Deploy,
    Upload,
    Update,
    Delete,
}

impl DemoAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deploy => "demo.deploy",
            Self::Upload => "demo.upload",
            Self::Update => "demo.update",
            Self::Delete => "demo.delete",
        }
    }
}

#[derive(Clone)]
pub struct AuditService {
    repo: Arc<dyn AuditRepo>,
}

impl AuditService {
    pub fn new(repo: Arc<dyn AuditRepo>) -> Self {
        Self { repo }
    }

    /// Append an entry for a demo, keyed by its slug, with the payload stored
    /// as JSON text.
    pub async fn demo<S>(
        &self,
        actor: &str,
        action: DemoAction,
        slug: &str,
        payload: &S,
    ) -> Result<(), RepoError>
    where
        S: Serialize + ?Sized,
    {
        let payload_text = serde_json::to_string(payload).map_err(RepoError::from_persistence)?;

        self.repo
            .append_log(AuditLogRecord {
                id: Uuid::new_v4(),
                actor: actor.to_string(),
                action: action.as_str().to_string(),
                entity_type: DEMO_ENTITY.to_string(),
                entity_id: Some(slug.to_string()),
                payload_text: Some(payload_text),
                created_at: OffsetDateTime::now_utc(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AuditLogRecord>>);

    #[async_trait]
    impl AuditRepo for Recorder {
        async fn append_log(&self, record: AuditLogRecord) -> Result<(), RepoError> {
            self.0.lock().await.push(record);
            Ok(())
        }
    }

    #[tokio::test]
    async fn demo_entries_carry_slug_and_json_payload() {
        let recorder = Arc::new(Recorder::default());
        let audit = AuditService::new(recorder.clone());

        audit
            .demo(
                "ops@agency.test",
                DemoAction::Delete,
                "landing-page",
                &json!({ "project_id": "p1" }),
            )
            .await
            .expect("recorded");

        let records = recorder.0.lock().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "demo.delete");
        assert_eq!(records[0].entity_type, "demo");
        assert_eq!(records[0].entity_id.as_deref(), Some("landing-page"));
        assert_eq!(
            records[0].payload_text.as_deref(),
            Some(r#"{"project_id":"p1"}"#)
        );
    }
}
