//! JSON and multipart handlers for demo administration.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum_extra::extract::Multipart;
use futures::StreamExt;
use serde::Deserialize;
use uuid::Uuid;
use vetrina_api_types::{
    DeployDemoRequest, DeployDemoResponse, UpdateDemoRequest, UploadDemoResponse,
};

use crate::infra::demo_storage::{DemoStorageError, StagedArchive};
use crate::infra::http::HttpState;

use super::error::{ApiError, demo_to_api, storage_to_api};
use super::extract::{RequireAdmin, RequireUser};
use super::models::{access_log_response, demo_response};

#[derive(Debug, Deserialize)]
pub struct AccessLogQuery {
    pub limit: Option<u32>,
}

pub async fn deploy_demo(
    State(state): State<HttpState>,
    RequireAdmin(principal): RequireAdmin,
    payload: Result<Json<DeployDemoRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(json_rejection)?;

    let demo = state
        .demos
        .deploy(&principal, request)
        .await
        .map_err(demo_to_api)?;

    let response = DeployDemoResponse {
        demo_id: demo.id,
        demo_url: demo.url,
        slug: demo.slug,
        status: demo.status,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn upload_demo(
    State(state): State<HttpState>,
    RequireAdmin(principal): RequireAdmin,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut project_id: Option<String> = None;
    let mut staged: Option<StagedArchive> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                if let Some(staged) = staged.take() {
                    state.demos.storage().discard(staged).await;
                }
                return Err(if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    storage_to_api(DemoStorageError::PayloadTooLarge {
                        limit: state.upload_limit_bytes,
                    })
                } else {
                    ApiError::bad_request("invalid multipart payload", Some(err.to_string()))
                });
            }
        };

        match field.name() {
            Some("projectId") => {
                match field.text().await {
                    Ok(value) => project_id = Some(value.trim().to_string()),
                    Err(err) => {
                        if let Some(staged) = staged.take() {
                            state.demos.storage().discard(staged).await;
                        }
                        return Err(ApiError::bad_request(
                            "invalid multipart payload",
                            Some(err.to_string()),
                        ));
                    }
                }
            }
            Some("file") if staged.is_none() => {
                let limit = state.upload_limit_bytes;
                let stream = field.map(move |chunk| {
                    chunk.map_err(|err| {
                        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
                            DemoStorageError::PayloadTooLarge { limit }
                        } else {
                            DemoStorageError::PayloadStream {
                                source: Box::new(err),
                            }
                        }
                    })
                });
                let archive = state
                    .demos
                    .storage()
                    .stage_archive(stream)
                    .await
                    .map_err(storage_to_api)?;
                staged = Some(archive);
            }
            _ => {}
        }
    }

    let staged = staged.ok_or_else(|| ApiError::bad_request("missing file", None))?;
    let project_id = match project_id.as_deref().map(Uuid::parse_str) {
        Some(Ok(id)) => id,
        Some(Err(err)) => {
            state.demos.storage().discard(staged).await;
            return Err(ApiError::bad_request(
                "invalid projectId",
                Some(err.to_string()),
            ));
        }
        None => {
            state.demos.storage().discard(staged).await;
            return Err(ApiError::bad_request("missing projectId", None));
        }
    };

    let uploaded = state
        .demos
        .upload(&principal, project_id, staged)
        .await
        .map_err(demo_to_api)?;

    let response = UploadDemoResponse {
        demo_id: uploaded.demo.id,
        project_id: uploaded.demo.project_id,
        demo_url: uploaded.demo.url,
        status: uploaded.demo.status,
        files: uploaded.site.files,
        extracted_bytes: uploaded.site.extracted_bytes,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_demo(
    State(state): State<HttpState>,
    RequireUser(principal): RequireUser,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let demo = state
        .demos
        .get(&principal, &slug)
        .await
        .map_err(demo_to_api)?;
    Ok(Json(demo_response(&demo)))
}

pub async fn update_demo(
    State(state): State<HttpState>,
    RequireAdmin(principal): RequireAdmin,
    Path(slug): Path<String>,
    payload: Result<Json<UpdateDemoRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(json_rejection)?;
    let demo = state
        .demos
        .update(&principal, &slug, request)
        .await
        .map_err(demo_to_api)?;
    Ok(Json(demo_response(&demo)))
}

pub async fn delete_demo(
    State(state): State<HttpState>,
    RequireAdmin(principal): RequireAdmin,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .demos
        .delete(&principal, &slug)
        .await
        .map_err(demo_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn demo_access_log(
    State(state): State<HttpState>,
    RequireAdmin(_principal): RequireAdmin,
    Path(slug): Path<String>,
    Query(query): Query<AccessLogQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (demo, entries) = state
        .demos
        .access_log(&slug, query.limit)
        .await
        .map_err(demo_to_api)?;
    Ok(Json(access_log_response(&demo, entries)))
}

fn json_rejection(rejection: JsonRejection) -> ApiError {
    ApiError::bad_request("invalid JSON body", Some(rejection.body_text()))
}
