//! REST API tests against a mocked GitLab.
//!
//! The server runs with the GitLab backend in personal access token mode;
//! wiremock stands in for the GitLab REST API.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sdlc_server::core::config::{Config, ServerConfig};
use sdlc_server::server::{router, AppState};

const TOKEN: &str = "glpat-integration";

fn app(gitlab: &MockServer, mode: &str) -> Router {
    let mut toml_text = format!(
        "[backend]\nkind = \"gitlab\"\n[gitlab]\nurl = \"{}\"\nauth = \"{mode}\"\n",
        gitlab.uri()
    );
    if mode == "oauth" {
        toml_text.push_str("app_id = \"app\"\nredirect_uri = \"http://localhost:6100/api/auth/callback\"\n");
    }
    let file: ServerConfig = toml::from_str(&toml_text).unwrap();
    let state = AppState::from_config(Config::new(file).unwrap()).unwrap();
    router(state)
}

async fn mount_user(gitlab: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v4/user"))
        .and(header("PRIVATE-TOKEN", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "username": "alice",
            "name": "Alice Liddell"
        })))
        .mount(gitlab)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/user"))
        .and(header("PRIVATE-TOKEN", "revoked"))
        .respond_with(ResponseTemplate::new(401))
        .mount(gitlab)
        .await;
}

async fn get(app: &Router, uri: &str, token: Option<&str>) -> (StatusCode, Value, Option<String>) {
    let mut request = Request::builder().uri(uri);
    if let Some(token) = token {
        request = request.header("PRIVATE-TOKEN", token);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body, cookie)
}

#[tokio::test]
async fn personal_token_identifies_the_caller() {
    let gitlab = MockServer::start().await;
    mount_user(&gitlab).await;
    let app = app(&gitlab, "personal_access_token");

    let (status, user, _) = get(&app, "/api/currentUser", Some(TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["userId"], "alice");
    assert_eq!(user["name"], "Alice Liddell");

    let (status, body, _) = get(&app, "/api/currentUser", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _, _) = get(&app, "/api/currentUser", Some("revoked")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, authorized, _) = get(&app, "/api/auth/authorized", Some(TOKEN)).await;
    assert_eq!(authorized, json!({ "authorized": true }));
}

#[tokio::test]
async fn projects_are_listed_with_the_callers_token() {
    let gitlab = MockServer::start().await;
    mount_user(&gitlab).await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects"))
        .and(query_param("topic", "sdlc"))
        .and(header("PRIVATE-TOKEN", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 11, "name": "Trades", "topics": ["sdlc"], "default_branch": "master" },
            { "id": 12, "name": "Other", "topics": ["misc"] }
        ])))
        .mount(&gitlab)
        .await;
    let app = app(&gitlab, "personal_access_token");

    let (status, projects, _) = get(&app, "/api/projects", Some(TOKEN)).await;
    assert_eq!(status, StatusCode::OK, "{projects}");
    let projects = projects.as_array().unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["projectId"], "11");
    assert_eq!(projects[0]["name"], "Trades");
}

#[tokio::test]
async fn gitlab_failures_surface_as_upstream_errors() {
    let gitlab = MockServer::start().await;
    mount_user(&gitlab).await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/11"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&gitlab)
        .await;
    let app = app(&gitlab, "personal_access_token");

    let (status, body, _) = get(&app, "/api/projects/11", Some(TOKEN)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert_eq!(body["code"], "UPSTREAM_ERROR");
}

/// Send a GET carrying `cookie`; returns status, JSON body, `Location` and `Set-Cookie`.
async fn browser_get(
    app: &Router,
    uri: &str,
    cookie: Option<&str>,
) -> (StatusCode, Value, Option<String>, Option<String>) {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header("cookie", cookie);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    let (location, set_cookie) = (header("location"), header("set-cookie"));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body, location, set_cookie)
}

#[tokio::test]
async fn oauth_mode_asks_for_authorization() {
    let gitlab = MockServer::start().await;
    let app = app(&gitlab, "oauth");

    // without a session the client is pointed at the authorize endpoint
    let (status, body, cookie) = get(&app, "/api/currentUser", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["authorizeUrl"], "/api/auth/authorize");
    assert!(cookie.is_none());

    let (_, authorized, _) = get(&app, "/api/auth/authorized", None).await;
    assert_eq!(authorized, json!({ "authorized": false }));

    // authorize starts a session and redirects the browser to GitLab
    let (status, _, location, set_cookie) =
        browser_get(&app, "/api/auth/authorize?returnTo=/app", None).await;
    assert_eq!(status, StatusCode::FOUND);
    let location = location.unwrap();
    assert!(location.starts_with(&format!("{}/oauth/authorize?", gitlab.uri())), "{location}");
    assert!(location.contains("client_id=app"), "{location}");
    let set_cookie = set_cookie.unwrap();
    let session = set_cookie.split(';').next().unwrap().to_string();
    assert!(session.starts_with("sdlc_session="));

    // API calls made while the browser is on GitLab get the same URL back
    for _ in 0..2 {
        let (status, body, _, set_cookie) =
            browser_get(&app, "/api/currentUser", Some(&session)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["authorizeUrl"], location.as_str());
        assert!(set_cookie.is_none());
    }
}

#[tokio::test]
async fn oauth_login_survives_requests_made_during_the_redirect() {
    let gitlab = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "oauth-token",
            "refresh_token": "refresh",
            "expires_in": 7200
        })))
        .mount(&gitlab)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "username": "alice",
            "name": "Alice Liddell"
        })))
        .mount(&gitlab)
        .await;
    let app = app(&gitlab, "oauth");

    let (_, _, location, set_cookie) =
        browser_get(&app, "/api/auth/authorize?returnTo=/app", None).await;
    let location = location.unwrap();
    let session = set_cookie.unwrap().split(';').next().unwrap().to_string();
    let nonce = location
        .split(['?', '&'])
        .find_map(|kv| kv.strip_prefix("state="))
        .unwrap()
        .to_string();

    let (status, _, _, _) = browser_get(&app, "/api/currentUser", Some(&session)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, back, _) = browser_get(
        &app,
        &format!("/api/auth/callback?code=abc&state={nonce}"),
        Some(&session),
    )
    .await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(back.as_deref(), Some("/app"));

    let (status, user, _, _) = browser_get(&app, "/api/currentUser", Some(&session)).await;
    assert_eq!(status, StatusCode::OK, "{user}");
    assert_eq!(user["userId"], "alice");
}

#[tokio::test]
async fn authorize_only_returns_to_this_server() {
    let gitlab = MockServer::start().await;
    let app = app(&gitlab, "oauth");

    let (status, body, location, set_cookie) = browser_get(
        &app,
        "/api/auth/authorize?returnTo=https%3A%2F%2Fevil.example%2F",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
    assert!(location.is_none());
    assert!(set_cookie.is_none());
}
