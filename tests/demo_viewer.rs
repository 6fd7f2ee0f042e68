mod support;

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Method, StatusCode, header};
use serde_json::json;
use uuid::Uuid;

use vetrina::domain::types::DemoStatus;

use support::{TestApp, get, get_with_cookie, json_request, password_form, zip_site};

const INDEX: &[u8] = b"<html><head><title>Preview</title></head><body>storefront preview</body></html>";

async fn ready_demo(app: &TestApp, name: &str, client_id: Option<Uuid>) -> Uuid {
    let project_id = app.repos.add_project(name, client_id).await;
    let response = app
        .upload(
            &app.admin_token,
            project_id,
            zip_site(&[("index.html", INDEX), ("app.js", b"console.log(1)")]),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.text());
    project_id
}

async fn patch(app: &TestApp, slug: &str, body: serde_json::Value) {
    let response = app
        .send(json_request(
            Method::PATCH,
            &format!("/demo/{slug}"),
            Some(&app.admin_token),
            Some(body),
        ))
        .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());
}

#[tokio::test]
async fn password_protected_demo_prompts_then_unlocks() {
    let app = TestApp::new().await;
    let project_id = ready_demo(&app, "Acme Storefront", None).await;
    let slug = app
        .repos
        .demo_for(project_id)
        .await
        .map(|demo| demo.slug)
        .expect("demo record");
    assert_eq!(slug, "acme-storefront");
    patch(&app, &slug, json!({ "password": "hunter22" })).await;

    let index_uri = format!("/demos/{project_id}/");
    let prompt = app.send(get(&index_uri)).await;
    assert_eq!(prompt.status, StatusCode::OK);
    assert!(prompt.text().contains("name=\"password\""));
    assert!(!prompt.text().contains("storefront preview"));
    assert_eq!(prompt.headers[header::CACHE_CONTROL], "no-store");

    let asset = app.send(get(&format!("/demos/{project_id}/app.js"))).await;
    assert_eq!(asset.status, StatusCode::UNAUTHORIZED);

    let wrong = app.send(password_form(&index_uri, "hunter2")).await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert!(wrong.text().contains("Incorrect password"));
    assert!(wrong.set_cookie().is_none());

    let unlocked = app.send(password_form(&index_uri, "hunter22")).await;
    assert_eq!(unlocked.status, StatusCode::OK);
    assert!(unlocked.text().contains("storefront preview"));
    let cookie = unlocked.set_cookie().expect("unlock cookie");
    assert!(cookie.starts_with("vetrina_demo_"));

    let page = app.send(get_with_cookie(&index_uri, &cookie)).await;
    assert!(page.text().contains("storefront preview"));
    let asset = app
        .send(get_with_cookie(
            &format!("/demos/{project_id}/app.js"),
            &cookie,
        ))
        .await;
    assert_eq!(asset.status, StatusCode::OK);

    let forged = format!("vetrina_demo_{}=deadbeef", project_id.simple());
    let page = app.send(get_with_cookie(&index_uri, &forged)).await;
    assert!(page.text().contains("name=\"password\""));

    patch(&app, &slug, json!({ "password": "" })).await;
    let page = app.send(get(&index_uri)).await;
    assert!(page.text().contains("storefront preview"));
}

#[tokio::test]
async fn changing_the_password_invalidates_unlock_cookies() {
    let app = TestApp::new().await;
    let project_id = ready_demo(&app, "Rotation", None).await;
    patch(&app, "rotation", json!({ "password": "first-secret" })).await;

    let index_uri = format!("/demos/{project_id}");
    let unlocked = app.send(password_form(&index_uri, "first-secret")).await;
    let cookie = unlocked.set_cookie().expect("unlock cookie");

    patch(&app, "rotation", json!({ "password": "second-secret" })).await;
    let page = app.send(get_with_cookie(&index_uri, &cookie)).await;
    assert!(page.text().contains("name=\"password\""));
}

#[tokio::test]
async fn repeated_wrong_passwords_are_throttled() {
    let app = TestApp::new().await;
    let project_id = ready_demo(&app, "Throttle", None).await;
    patch(&app, "throttle", json!({ "password": "correct-horse" })).await;

    let index_uri = format!("/demos/{project_id}/");
    for _ in 0..3 {
        let response = app.send(password_form(&index_uri, "nope")).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    let throttled = app.send(password_form(&index_uri, "correct-horse")).await;
    assert_eq!(throttled.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(throttled.headers[header::RETRY_AFTER], "60");
    assert!(throttled.set_cookie().is_none());
}

#[tokio::test]
async fn forwarded_for_header_does_not_reset_the_throttle() {
    let app = TestApp::new().await;
    let project_id = ready_demo(&app, "Spoofed", None).await;
    patch(&app, "spoofed", json!({ "password": "correct-horse" })).await;

    let index_uri = format!("/demos/{project_id}/");
    let peer: SocketAddr = "203.0.113.9:51000".parse().expect("socket addr");
    let mut statuses = Vec::new();
    for hop in 0..6 {
        let mut request = password_form(&index_uri, "nope");
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_str(&format!("198.51.100.{hop}")).expect("header"),
        );
        request.extensions_mut().insert(ConnectInfo(peer));
        statuses.push(app.send(request).await.status);
    }

    assert_eq!(&statuses[..3], &[StatusCode::UNAUTHORIZED; 3]);
    assert!(
        statuses[3..]
            .iter()
            .all(|status| *status == StatusCode::TOO_MANY_REQUESTS),
        "{statuses:?}"
    );
}

#[tokio::test]
async fn login_required_demo_checks_project_access() {
    let app = TestApp::new().await;
    let (client, client_id) = app.client_token("client@example.com").await;
    let (stranger, _) = app.client_token("stranger@example.com").await;
    let project_id = ready_demo(&app, "Members", Some(client_id)).await;
    patch(&app, "members", json!({ "require_login": true })).await;

    let index_uri = format!("/demos/{project_id}/");
    let anonymous = app.send(get(&index_uri)).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);

    let response = app
        .send(json_request(Method::GET, &index_uri, Some(&stranger), None))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = app
        .send(json_request(Method::GET, &index_uri, Some(&client), None))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.text().contains("storefront preview"));

    let response = app
        .send(json_request(
            Method::GET,
            &format!("/demos/{project_id}/app.js"),
            Some(&app.admin_token),
            None,
        ))
        .await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn session_cookie_authenticates_viewers() {
    let app = TestApp::new().await;
    let (client, client_id) = app.client_token("client@example.com").await;
    let project_id = ready_demo(&app, "Cookie", Some(client_id)).await;
    patch(&app, "cookie", json!({ "require_login": true })).await;

    let response = app
        .send(get_with_cookie(
            &format!("/demos/{project_id}/"),
            &format!("{}={client}", support::SESSION_COOKIE),
        ))
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let demo = app.repos.demo_for(project_id).await.expect("demo");
    assert_eq!(demo.access_count, 1);
}

#[tokio::test]
async fn stale_session_cookie_falls_back_to_bearer_token() {
    let app = TestApp::new().await;
    let (client, client_id) = app.client_token("client@example.com").await;
    let project_id = ready_demo(&app, "Fallback", Some(client_id)).await;
    patch(&app, "fallback", json!({ "require_login": true })).await;

    let stale = format!("{}=vt_gone_0000", support::SESSION_COOKIE);
    let mut request = json_request(
        Method::GET,
        &format!("/demos/{project_id}/"),
        Some(&client),
        None,
    );
    request.headers_mut().insert(
        header::COOKIE,
        HeaderValue::from_str(&stale).expect("cookie header"),
    );
    let response = app.send(request).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.text());

    let response = app
        .send(get_with_cookie(&format!("/demos/{project_id}/"), &stale))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn single_top_level_folder_is_flattened() {
    let app = TestApp::new().await;
    let project_id = app.repos.add_project("Nested", None).await;
    let response = app
        .upload(
            &app.admin_token,
            project_id,
            zip_site(&[("dist/index.html", INDEX), ("dist/assets/app.js", b"42")]),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.text());

    let asset = app
        .send(get(&format!("/demos/{project_id}/assets/app.js")))
        .await;
    assert_eq!(asset.status, StatusCode::OK);
    assert_eq!(asset.body.as_ref(), b"42");
}

#[tokio::test]
async fn dotted_index_path_is_served_as_the_document() {
    let app = TestApp::new().await;
    let project_id = ready_demo(&app, "Dotted", None).await;

    let response = app
        .send(get(&format!("/demos/{project_id}/./index.html")))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(
        response
            .text()
            .contains(&format!("<base href=\"/demos/{project_id}/\">")),
        "{}",
        response.text()
    );

    let demo = app.repos.demo_for(project_id).await.expect("demo");
    assert_eq!(demo.access_count, 1);
}

#[tokio::test]
async fn building_demo_asks_clients_to_retry() {
    let app = TestApp::new().await;
    let project_id = ready_demo(&app, "Rebuild", None).await;
    app.repos.force_status(project_id, DemoStatus::Building).await;

    let response = app.send(get(&format!("/demos/{project_id}/"))).await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers[header::RETRY_AFTER], "30");
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let app = TestApp::new().await;
    let project_id = ready_demo(&app, "Paths", None).await;

    for uri in [
        "/demos/not-a-uuid/".to_string(),
        format!("/demos/{}/", Uuid::new_v4()),
        format!("/demos/{project_id}/missing.css"),
        format!("/demos/{project_id}/..%2F..%2Fetc%2Fpasswd"),
    ] {
        let response = app.send(get(&uri)).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND, "{uri}");
    }
}
