//! Conversions from domain records to wire types.

use vetrina_api_types::{AccessLogEntry, AccessLogResponse, DemoResponse};

use crate::domain::entities::{DemoAccessRecord, DemoRecord};

pub fn demo_response(demo: &DemoRecord) -> DemoResponse {
    DemoResponse {
        id: demo.id,
        project_id: demo.project_id,
        name: demo.name.clone(),
        slug: demo.slug.clone(),
        url: demo.url.clone(),
        build_type: demo.build_type,
        status: demo.status,
        password_protected: demo.is_password_protected(),
        require_login: demo.require_login,
        access_count: demo.access_count,
        last_accessed_at: demo.last_accessed_at,
        created_at: demo.created_at,
        updated_at: demo.updated_at,
    }
}

pub fn access_log_response(demo: &DemoRecord, entries: Vec<DemoAccessRecord>) -> AccessLogResponse {
    AccessLogResponse {
        demo_id: demo.id,
        access_count: demo.access_count,
        entries: entries
            .into_iter()
            .map(|entry| AccessLogEntry {
                id: entry.id,
                viewer_id: entry.viewer_id,
                client_addr: entry.client_addr,
                user_agent: entry.user_agent,
                accessed_at: entry.accessed_at,
            })
            .collect(),
    }
}
