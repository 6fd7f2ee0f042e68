//! Public demo serving under `/demos/{project_id}`.

use axum::{
    Form, Router,
    body::Body,
    extract::{Path, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER},
    },
    response::{Html, IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use bytes::Bytes;
use metrics::counter;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::application::auth::Principal;
use crate::application::error::HttpError;
use crate::application::viewer::{ViewError, Viewer};
use crate::domain::demos::unlock_cookie_name;
use crate::domain::entities::DemoRecord;
use crate::infra::demo_storage::is_site_index;
use crate::infra::telemetry::METRIC_PASSWORD_THROTTLED;
use crate::presentation::views::{PasswordPromptTemplate, render_template_response};

use super::HttpState;
use super::api::extract::{ClientMeta, MaybeUser};

const BUILDING_RETRY_AFTER_SECS: u64 = 30;

pub fn build_public_router() -> Router<HttpState> {
    Router::new()
        .route("/demos/{project_id}", get(serve_index).post(unlock_demo))
        .route("/demos/{project_id}/", get(serve_index).post(unlock_demo))
        .route("/demos/{project_id}/{*path}", get(serve_asset))
}

#[derive(Debug, Deserialize)]
pub struct UnlockForm {
    #[serde(default)]
    pub password: String,
}

async fn serve_index(
    State(state): State<HttpState>,
    Path(project_id): Path<String>,
    MaybeUser(principal): MaybeUser,
    client: ClientMeta,
    jar: CookieJar,
) -> Response {
    let demo = match open_demo(&state, &project_id, principal.as_ref()).await {
        Ok(demo) => demo,
        Err(response) => return response,
    };

    let cookie = jar.get(&unlock_cookie_name(demo.project_id));
    if state
        .viewer
        .is_locked(&demo, cookie.map(|cookie| cookie.value()))
    {
        return password_prompt(&demo, StatusCode::OK, None);
    }

    serve_document(&state, &demo, principal, client).await
}

async fn unlock_demo(
    State(state): State<HttpState>,
    Path(project_id): Path<String>,
    MaybeUser(principal): MaybeUser,
    client: ClientMeta,
    jar: CookieJar,
    Form(form): Form<UnlockForm>,
) -> Response {
    let demo = match open_demo(&state, &project_id, principal.as_ref()).await {
        Ok(demo) => demo,
        Err(response) => return response,
    };
    if !demo.is_password_protected() {
        return serve_document(&state, &demo, principal, client).await;
    }

    let project_key = demo.project_id.to_string();
    if !state
        .password_limiter
        .allow(client.throttle_key(), &project_key)
    {
        counter!(METRIC_PASSWORD_THROTTLED).increment(1);
        let mut response = password_prompt(
            &demo,
            StatusCode::TOO_MANY_REQUESTS,
            Some("Too many attempts. Please wait a minute and try again."),
        );
        response.headers_mut().insert(
            RETRY_AFTER,
            HeaderValue::from(state.password_limiter.retry_after_secs()),
        );
        return response;
    }

    let Some(token) = state.viewer.unlock(&demo, &form.password) else {
        return password_prompt(
            &demo,
            StatusCode::UNAUTHORIZED,
            Some("Incorrect password."),
        );
    };
    state
        .password_limiter
        .reset(client.throttle_key(), &project_key);

    let cookie = Cookie::build((unlock_cookie_name(demo.project_id), token))
        .path(format!("/demos/{}", demo.project_id))
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    let response = serve_document(&state, &demo, principal, client).await;
    (jar.add(cookie), response).into_response()
}

async fn serve_asset(
    State(state): State<HttpState>,
    Path((project_id, path)): Path<(String, String)>,
    MaybeUser(principal): MaybeUser,
    client: ClientMeta,
    jar: CookieJar,
) -> Response {
    const SOURCE: &str = "infra::http::public::serve_asset";

    let demo = match open_demo(&state, &project_id, principal.as_ref()).await {
        Ok(demo) => demo,
        Err(response) => return response,
    };

    let cookie = jar.get(&unlock_cookie_name(demo.project_id));
    let locked = state
        .viewer
        .is_locked(&demo, cookie.map(|cookie| cookie.value()));

    if is_site_index(&path) {
        if locked {
            return password_prompt(&demo, StatusCode::OK, None);
        }
        return serve_document(&state, &demo, principal, client).await;
    }
    if locked {
        return HttpError::new(
            SOURCE,
            StatusCode::UNAUTHORIZED,
            "Demo is password protected",
            "asset requested before the demo was unlocked",
        )
        .into_response();
    }

    match state.viewer.asset(&demo, &path).await {
        Ok(bytes) => build_asset_response(&path, bytes),
        Err(err) => view_error_response(SOURCE, err),
    }
}

async fn open_demo(
    state: &HttpState,
    raw_project_id: &str,
    principal: Option<&Principal>,
) -> Result<DemoRecord, Response> {
    const SOURCE: &str = "infra::http::public::open_demo";

    let project_id = Uuid::parse_str(raw_project_id)
        .map_err(|_| view_error_response(SOURCE, ViewError::NotFound))?;
    state
        .viewer
        .open(project_id, principal)
        .await
        .map_err(|err| view_error_response(SOURCE, err))
}

async fn serve_document(
    state: &HttpState,
    demo: &DemoRecord,
    principal: Option<Principal>,
    client: ClientMeta,
) -> Response {
    const SOURCE: &str = "infra::http::public::serve_document";

    let document = match state.viewer.index_document(demo).await {
        Ok(document) => document,
        Err(err) => return view_error_response(SOURCE, err),
    };

    state
        .viewer
        .record_view(
            demo,
            Viewer {
                principal,
                client_addr: client.addr,
                user_agent: client.user_agent,
            },
        )
        .await;

    let mut response = Html(document).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn password_prompt(demo: &DemoRecord, status: StatusCode, error: Option<&str>) -> Response {
    let mut template =
        PasswordPromptTemplate::new(demo.name.clone(), format!("/demos/{}", demo.project_id));
    if let Some(message) = error {
        template = template.with_error(message);
    }
    let mut response = render_template_response(template, status);
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn view_error_response(source: &'static str, err: ViewError) -> Response {
    match err {
        ViewError::NotFound => HttpError::new(
            source,
            StatusCode::NOT_FOUND,
            "Demo not found",
            "no servable demo for this path",
        )
        .into_response(),
        ViewError::Building => HttpError::new(
            source,
            StatusCode::SERVICE_UNAVAILABLE,
            "Demo is being prepared, please retry shortly",
            "demo is still building",
        )
        .retry_after(BUILDING_RETRY_AFTER_SECS)
        .into_response(),
        ViewError::LoginRequired => HttpError::new(
            source,
            StatusCode::UNAUTHORIZED,
            "Please sign in to view this demo",
            "demo requires login",
        )
        .into_response(),
        ViewError::Forbidden => HttpError::new(
            source,
            StatusCode::FORBIDDEN,
            "You do not have access to this demo",
            "viewer lacks access to the project",
        )
        .into_response(),
        err => {
            error!(target = "vetrina::http::public", source = source, error = %err, "failed to serve demo");
            HttpError::from_error(
                source,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load demo",
                &err,
            )
            .into_response()
        }
    }
}

fn build_asset_response(path: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("private, max-age=300"));

    response
}
