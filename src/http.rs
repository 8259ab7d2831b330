//! HTTP transport for [`DocJobEngine`].
//!
//! | Route | Handler |
//! |---|---|
//! | `GET /health` | liveness probe |
//! | `POST /jobs` | multipart upload (part `file`) → `202 Accepted` |
//! | `GET /jobs/{id}` | job view, bearer token required |
//! | `GET /jobs/{id}/result` | converted Markdown, bearer token required |
//!
//! Errors are JSON bodies `{"code": …, "message": …}` whose `code` is
//! [`DocJobError::code`]. The request body limit of axum is disabled: uploads
//! stream straight into the engine, which enforces its own ceiling.

use crate::convert::Converter;
use crate::engine::DocJobEngine;
use crate::error::DocJobError;
use crate::guard::bearer_token;
use crate::record::{JobStatus, JobView};
use crate::store::JobStore;
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt as _;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::io::StreamReader;
use tracing::error;

type Engine<S, C> = Arc<DocJobEngine<S, C>>;

/// Build the router over a shared engine.
pub fn create_router<S: JobStore, C: Converter>(engine: Engine<S, C>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(create_job::<S, C>))
        .route("/jobs/{id}", get(job_status::<S, C>))
        .route("/jobs/{id}/result", get(job_result::<S, C>))
        .layer(DefaultBodyLimit::disable())
        .with_state(engine)
}

// ── Responses ────────────────────────────────────────────────────────────

/// Body of `202 Accepted` for a new job.
#[derive(Debug, Serialize)]
pub struct CreatedJob {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub access_token: String,
    pub links: JobLinks,
}

#[derive(Debug, Serialize)]
pub struct JobLinks {
    #[serde(rename = "self")]
    pub self_: String,
    pub result: String,
}

/// A JSON error response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }
}

impl From<DocJobError> for ApiError {
    fn from(e: DocJobError) -> Self {
        let status = status_for(&e);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", e);
            "internal error".to_string()
        } else {
            e.to_string()
        };
        Self {
            status,
            code: e.code(),
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "code": self.code, "message": self.message }));
        (self.status, body).into_response()
    }
}

/// HTTP status for each engine error.
pub fn status_for(e: &DocJobError) -> StatusCode {
    match e {
        DocJobError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        DocJobError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        DocJobError::MalformedUpload { .. } => StatusCode::BAD_REQUEST,
        DocJobError::JobNotFound { .. } => StatusCode::NOT_FOUND,
        DocJobError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        DocJobError::Forbidden => StatusCode::FORBIDDEN,
        DocJobError::NotReady { .. } => StatusCode::LOCKED,
        DocJobError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        DocJobError::Store(_)
        | DocJobError::Io { .. }
        | DocJobError::InvalidConfig(_)
        | DocJobError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn create_job<S: JobStore, C: Converter>(
    State(engine): State<Engine<S, C>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();

        let reader = StreamReader::new(field.map_err(std::io::Error::other));
        tokio::pin!(reader);
        let submission = engine.submit(reader, &filename, &content_type).await?;

        let location = format!("/jobs/{}", submission.job.id);
        let body = CreatedJob {
            id: submission.job.id,
            status: submission.job.status,
            progress: submission.job.progress,
            access_token: submission.token.expose().to_string(),
            links: JobLinks {
                result: format!("{location}/result"),
                self_: location.clone(),
            },
        };
        return Ok((StatusCode::ACCEPTED, [(header::LOCATION, location)], Json(body)).into_response());
    }

    Err(ApiError::bad_request("multipart part 'file' is required"))
}

async fn job_status<S: JobStore, C: Converter>(
    State(engine): State<Engine<S, C>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JobView>, ApiError> {
    let token = bearer_token(authorization(&headers))?;
    Ok(Json(engine.status(&id, token).await?))
}

async fn job_result<S: JobStore, C: Converter>(
    State(engine): State<Engine<S, C>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = bearer_token(authorization(&headers))?;
    let markdown = engine.result(&id, token).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        markdown,
    )
        .into_response())
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kinds() {
        assert_eq!(
            status_for(&DocJobError::UploadTooLarge { limit_bytes: 1 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_for(&DocJobError::NotReady {
                id: "x".into(),
                detail: "d"
            }),
            StatusCode::LOCKED
        );
        assert_eq!(
            status_for(&DocJobError::MalformedUpload {
                detail: "stream ended early".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&DocJobError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(&DocJobError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_errors_hide_details() {
        let api = ApiError::from(DocJobError::Internal("secret path /var/x".into()));
        assert_eq!(api.code, "internal");
        assert_eq!(api.message, "internal error");
    }
}
