//! HTTP API tests: drive the axum router in-process with `oneshot`.

#![cfg(feature = "server")]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use doc2md_jobs::http::create_router;
use doc2md_jobs::{DocJobEngine, EngineConfig, FsJobStore, PassthroughConverter, TokenCodec};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

type Engine = Arc<DocJobEngine<FsJobStore, PassthroughConverter>>;

const BOUNDARY: &str = "doc2md-test-boundary";

async fn setup(start: bool) -> (tempfile::TempDir, Engine) {
    let tmp = tempfile::tempdir().unwrap();
    let config = EngineConfig::builder()
        .data_dir(tmp.path())
        .workers(2)
        .max_upload_bytes(1024)
        .build()
        .unwrap();
    let engine = Arc::new(DocJobEngine::open(config, PassthroughConverter).unwrap());
    if start {
        engine.start().await.unwrap();
    }
    (tmp, engine)
}

fn app(engine: &Engine) -> Router {
    create_router(Arc::clone(engine))
}

fn upload(part_name: &str, filename: &str, content_type: &str, body: &[u8]) -> Request<Body> {
    let mut data = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"{part_name}\"; filename=\"{filename}\"\r\n\
         Content-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    data.extend_from_slice(body);
    data.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/jobs")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(data))
        .unwrap()
}

fn get(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body.to_vec())
}

async fn send_json(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn create(engine: &Engine, body: &[u8]) -> (String, String) {
    let (status, headers, body) = send(
        app(engine),
        upload("file", "notes.pdf", "application/pdf", body),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let json: Value = serde_json::from_slice(&body).unwrap();
    let id = json["id"].as_str().unwrap().to_string();
    assert_eq!(headers[header::LOCATION], format!("/jobs/{id}").as_str());
    (id, json["access_token"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn health_is_ok() {
    let (_tmp, engine) = setup(false).await;
    let (status, json) = send_json(app(&engine), get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn create_poll_and_fetch_result() {
    let (_tmp, engine) = setup(true).await;

    let (status, headers, body) = send(
        app(&engine),
        upload("file", "notes.pdf", "application/pdf", b"# Hello\n"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let created: Value = serde_json::from_slice(&body).unwrap();
    let id = created["id"].as_str().unwrap();
    let token = created["access_token"].as_str().unwrap();
    assert_eq!(created["status"], "queued");
    assert_eq!(created["progress"], 0);
    assert_eq!(token.len(), 43);
    assert_eq!(created["links"]["self"], format!("/jobs/{id}"));
    assert_eq!(created["links"]["result"], format!("/jobs/{id}/result"));
    assert_eq!(headers[header::LOCATION], format!("/jobs/{id}").as_str());

    engine.wait_idle().await;

    let (status, view) = send_json(app(&engine), get(&format!("/jobs/{id}"), Some(token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "succeeded");
    assert_eq!(view["progress"], 100);
    assert_eq!(view["size_bytes"], 8);
    assert!(view.get("access_token_digest").is_none());
    assert!(view.get("access_token_hash").is_none());

    let (status, headers, body) =
        send(app(&engine), get(&format!("/jobs/{id}/result"), Some(token))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/markdown"));
    assert_eq!(body, b"# Hello\n");

    engine.stop().await;
}

#[tokio::test]
async fn access_errors_map_to_status_codes() {
    let (_tmp, engine) = setup(false).await;
    let (id, token) = create(&engine, b"%PDF").await;
    let path = format!("/jobs/{id}");

    let (status, json) = send_json(app(&engine), get(&path, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "unauthorized");

    let (status, json) = send_json(app(&engine), get(&path, Some("malformed"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "unauthorized");

    let stranger = TokenCodec::new().issue();
    let (status, json) = send_json(app(&engine), get(&path, Some(stranger.expose()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "forbidden");

    let (status, json) = send_json(
        app(&engine),
        get("/jobs/00000000-0000-4000-8000-000000000000", Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "not_found");

    // No workers running: the job stays queued.
    let (status, json) = send_json(app(&engine), get(&path, Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "queued");

    let (status, json) =
        send_json(app(&engine), get(&format!("{path}/result"), Some(&token))).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(json["code"], "not_ready");
}

#[tokio::test]
async fn upload_rejections() {
    let (tmp, engine) = setup(false).await;

    let (status, json) = send_json(
        app(&engine),
        upload("file", "cat.gif", "image/gif", b"GIF89a"),
    )
    .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(json["code"], "unsupported_media_type");

    let (status, json) = send_json(
        app(&engine),
        upload("file", "big.pdf", "application/pdf", &[b'x'; 2048]),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["code"], "payload_too_large");

    let (status, json) = send_json(
        app(&engine),
        upload("attachment", "a.pdf", "application/pdf", b"%PDF"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "bad_request");

    let not_multipart = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header(header::CONTENT_TYPE, "application/pdf")
        .body(Body::from("%PDF"))
        .unwrap();
    let (status, json) = send_json(app(&engine), not_multipart).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "bad_request");

    let leftovers = std::fs::read_dir(tmp.path().join("jobs")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn truncated_multipart_is_a_bad_request() {
    let (tmp, engine) = setup(false).await;

    let mut data = format!(
        "--{BOUNDARY}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"cut.pdf\"\r\n\
         Content-Type: application/pdf\r\n\r\n"
    )
    .into_bytes();
    data.extend_from_slice(b"%PDF-1.7 the connection dropped here");
    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(data))
        .unwrap();

    let (status, json) = send_json(app(&engine), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "bad_request");
    let leftovers = std::fs::read_dir(tmp.path().join("jobs")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn stopped_engine_answers_503() {
    let (_tmp, engine) = setup(true).await;
    engine.stop().await;
    let (status, json) = send_json(
        app(&engine),
        upload("file", "a.pdf", "application/pdf", b"%PDF"),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "shutting_down");
}
