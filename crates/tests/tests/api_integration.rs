use std::path::PathBuf;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use civic_api::{build_app_with_config, ApiConfig};
use serde_json::{json, Value};
use tower::ServiceExt;

const STAFF_KEY: &str = "dev-civic-staff-key";

fn kb_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../kb")
}

async fn app() -> Router {
    build_app_with_config(ApiConfig::default().with_kb_root(kb_root()))
        .await
        .expect("app should build")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, parsed)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn staff_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-api-key", STAFF_KEY)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn chat(app: &Router, session_id: Option<&str>, message: &str) -> Value {
    let (status, body) = send(
        app,
        post_json(
            "/v1/chat/message",
            json!({ "message": message, "session_id": session_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "chat failed: {body}");
    body
}

#[tokio::test]
async fn health_reports_loaded_corpus() {
    let app = app().await;
    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["retrieval"]["documents"], 4);
    assert_eq!(body["retrieval"]["store"], "memory");
}

#[tokio::test]
async fn general_query_returns_ranked_citations() {
    let app = app().await;
    let body = chat(&app, None, "When is trash collected?").await;

    assert!(!body["session_id"].as_str().unwrap().is_empty());
    let citations = body["citations"].as_array().unwrap();
    assert_eq!(citations.len(), 2);
    assert_eq!(citations[0]["title"], "Trash Collection Schedule");
    assert_eq!(body["confidence"], 0.75);
    assert!(body["reply"]
        .as_str()
        .unwrap()
        .starts_with("Here's what I found:"));
}

#[tokio::test]
async fn invalid_chat_input_is_unprocessable() {
    let app = app().await;

    let (status, body) = send(&app, post_json("/v1/chat/message", json!({ "message": "  " }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_failed");

    let (status, _) = send(
        &app,
        post_json(
            "/v1/chat/message",
            json!({ "message": "hello", "session_id": "not a valid id" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

fn post_raw(uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn undecodable_bodies_get_json_errors() {
    let app = app().await;

    let (status, body) = send(&app, post_raw("/v1/chat/message", "{}")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_failed");
    assert!(body["message"].as_str().unwrap().contains("message"));

    let (status, body) = send(&app, post_raw("/v1/chat/message", r#"{"message": 5}"#)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_failed");

    let (status, body) = send(&app, post_raw("/v1/chat/message", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = send(&app, post_raw("/v1/incidents", r#"{"title": "only"}"#)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_failed");

    let untyped = Request::builder()
        .method("POST")
        .uri("/v1/chat/message")
        .body(Body::from(r#"{"message": "hello"}"#))
        .unwrap();
    let (status, body) = send(&app, untyped).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn undecodable_query_strings_get_json_errors() {
    let app = app().await;

    let (status, body) = send(&app, staff_get("/v1/staff/incidents?page=abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = send(&app, staff_get("/v1/staff/kb/search?query=trash&page_size=-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn chat_report_flow_files_an_open_incident() {
    let app = app().await;

    let first = chat(&app, None, "There is a broken streetlight").await;
    let session_id = first["session_id"].as_str().unwrap().to_string();
    assert_eq!(first["confidence"], 0.95);
    assert!(first["reply"].as_str().unwrap().contains("chat"));

    for answer in [
        "chat",
        "Broken streetlight",
        "street_lighting",
        "Main Street",
        "user@example.com",
    ] {
        chat(&app, Some(&session_id), answer).await;
    }
    let done = chat(&app, Some(&session_id), "out for days").await;

    let (status, list) = send(&app, staff_get("/v1/staff/incidents")).await;
    assert_eq!(status, StatusCode::OK);
    let items = list["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    let public_id = items[0]["incident_id"].as_str().unwrap();
    assert!(done["reply"].as_str().unwrap().contains(public_id));

    let (status, view) = send(&app, get(&format!("/v1/incidents/{public_id}/status"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "open");
    assert_eq!(view["history"][0]["note"], "Incident created");

    let ask = chat(&app, Some(&session_id), "what is the status of my report?").await;
    assert!(ask["reply"].as_str().unwrap().contains("chat"));
}

#[tokio::test]
async fn status_check_through_chat() {
    let app = app().await;
    let (status, created) = send(
        &app,
        post_json(
            "/v1/incidents",
            json!({
                "title": "Pothole on 5th",
                "description": "Deep pothole near the school",
                "category": "road_maintenance"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let public_id = created["incident_id"].as_str().unwrap();

    let ask = chat(&app, Some("status-session"), "Can you check progress?").await;
    assert!(ask["reply"].as_str().unwrap().contains("incident ID"));

    let answer = chat(&app, Some("status-session"), public_id).await;
    assert!(answer["reply"].as_str().unwrap().contains("new"));
    assert_eq!(answer["confidence"], 0.9);

    chat(&app, Some("status-session"), "status update please").await;
    let missing = chat(&app, Some("status-session"), "NOPE0000").await;
    assert!(missing["reply"].as_str().unwrap().contains("couldn't find"));
}

#[tokio::test]
async fn direct_incident_lifecycle() {
    let app = app().await;

    let (status, created) = send(
        &app,
        post_json(
            "/v1/incidents",
            json!({
                "title": "Overflowing bins",
                "description": "Bins not emptied for two weeks",
                "category": "waste_management",
                "location_text": "Elm Street",
                "contact_email": "resident@example.com"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "new");
    let public_id = created["incident_id"].as_str().unwrap().to_string();
    assert_eq!(public_id.len(), 8);

    let patch = |body: Value, key: Option<&str>| {
        let mut builder = Request::builder()
            .method("PATCH")
            .uri(format!("/v1/staff/incidents/{public_id}"))
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    };

    let (status, _) = send(&app, patch(json!({ "status": "resolved" }), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, patch(json!({ "status": "exploded" }), Some(STAFF_KEY))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_failed");

    let (status, body) = send(&app, patch(json!({ "status": "in_progress" }), Some(STAFF_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "in_progress");

    let (_, view) = send(&app, get(&format!("/v1/incidents/{public_id}/status"))).await;
    let notes = view["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["note"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(notes, vec!["Incident created", "Status changed to in_progress"]);
}

#[tokio::test]
async fn unknown_incident_is_not_found() {
    let app = app().await;

    let (status, body) = send(&app, get("/v1/incidents/ZZZZ9999/status")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let request = Request::builder()
        .method("PATCH")
        .uri("/v1/staff/incidents/ZZZZ9999")
        .header("content-type", "application/json")
        .header("x-api-key", STAFF_KEY)
        .body(Body::from(json!({ "status": "closed" }).to_string()))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_direct_submission_is_rejected() {
    let app = app().await;
    let (status, body) = send(
        &app,
        post_json(
            "/v1/incidents",
            json!({
                "title": "Something",
                "description": "Details",
                "category": "volcano"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].as_str().unwrap().contains("volcano"));
}

#[tokio::test]
async fn staff_routes_require_api_key() {
    let app = app().await;

    let (status, body) = send(&app, get("/v1/staff/incidents")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = send(&app, get("/v1/staff/kb/search?query=trash")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, staff_get("/v1/staff/incidents?page=1&page_size=5")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, staff_get("/v1/staff/incidents?page=0")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn staff_kb_search_uses_precision_threshold() {
    let app = app().await;

    let (status, body) = send(
        &app,
        staff_get("/v1/staff/kb/search?query=trash%20collection%20Monday%20Thursday"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["title"], "Trash Collection Schedule");
    assert!(results[0]["score"].as_f64().unwrap() > 0.3);

    let (_, body) = send(&app, staff_get("/v1/staff/kb/search?query=%20%20")).await;
    assert!(body["results"].as_array().unwrap().is_empty());

    let (status, _) = send(
        &app,
        staff_get("/v1/staff/kb/search?query=trash&page_size=51"),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn responses_carry_security_headers_and_request_id() {
    let app = app().await;
    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn rate_limit_rejects_bursts() {
    let config = ApiConfig {
        rate_limit_max: 2,
        ..ApiConfig::default().with_kb_root(kb_root())
    };
    let app = build_app_with_config(config).await.unwrap();

    let request = || {
        Request::builder()
            .uri("/v1/incidents/AAAA0000/status")
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::empty())
            .unwrap()
    };

    assert_eq!(send(&app, request()).await.0, StatusCode::NOT_FOUND);
    assert_eq!(send(&app, request()).await.0, StatusCode::NOT_FOUND);
    let (status, body) = send(&app, request()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");

    // health stays reachable
    assert_eq!(send(&app, get("/health")).await.0, StatusCode::OK);
}
