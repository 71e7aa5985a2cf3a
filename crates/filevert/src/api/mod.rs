//! HTTP API.
//!
//! Caller identity is established upstream; requests carry it in a trusted
//! header (see [`ApiState::owner_header`]).

pub mod error;

use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::files::StoredFile;
use crate::job::JobQuery;
use crate::service::{
    Caller, ConversionService, CreateJobRequest, CreateJobResponse, Download, JobListResponse,
    JobStatusView, Upload,
};

pub use error::ApiError;

pub const DEFAULT_OWNER_HEADER: &str = "x-owner-id";

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub service: ConversionService,
    /// Header carrying the authenticated caller's id.
    pub owner_header: Arc<str>,
}

impl ApiState {
    pub fn new(service: ConversionService, owner_header: &str) -> Self {
        Self {
            service,
            owner_header: Arc::from(owner_header.to_ascii_lowercase()),
        }
    }
}

impl FromRequestParts<ApiState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(state.owner_header.as_ref())
            .and_then(|value| value.to_str().ok())
            .and_then(Caller::new)
            .ok_or_else(ApiError::unauthorized)
    }
}

pub fn router(state: ApiState) -> Router {
    let body_limit = usize::try_from(state.service.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/health", get(health))
        .route("/api/convert", post(create_job).get(list_jobs))
        .route("/api/convert/{id}", get(job_status))
        .route("/api/convert/{id}/download", get(download_result))
        .route("/api/convert/{id}/save-to-files", post(save_result_to_files))
        .route(
            "/api/files",
            post(upload_file)
                .get(list_files)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/files/{id}", get(download_file).delete(delete_file))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ─── Conversions ────────────────────────────────────────────────────────────

async fn create_job(
    State(state): State<ApiState>,
    caller: Caller,
    request: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    let Json(request) = request?;
    Ok(Json(state.service.create_job(&caller, request)?))
}

async fn list_jobs(
    State(state): State<ApiState>,
    caller: Caller,
    query: Result<Query<JobQuery>, QueryRejection>,
) -> Result<Json<JobListResponse>, ApiError> {
    let Query(query) = query?;
    Ok(Json(state.service.list_jobs(&caller, &query)?))
}

async fn job_status(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    Ok(Json(state.service.job_status(&caller, &id)?))
}

async fn download_result(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(attachment(state.service.download_result(&caller, &id).await?))
}

async fn save_result_to_files(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<StoredFile>), ApiError> {
    let stored = state.service.save_result_to_files(&caller, &id).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

// ─── Files ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct FileQuery {
    search: Option<String>,
}

async fn upload_file(
    State(state): State<ApiState>,
    caller: Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<StoredFile>), ApiError> {
    let mut multipart = multipart?;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|e| {
            if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                ApiError::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!(
                        "File too large. Maximum size is {}MB",
                        state.service.max_upload_bytes() / (1024 * 1024)
                    ),
                )
            } else {
                e.into()
            }
        })?;

        let upload = Upload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        };
        let stored = state.service.upload_file(&caller, upload).await?;
        return Ok((StatusCode::CREATED, Json(stored)));
    }

    Err(ApiError::bad_request("No file provided"))
}

async fn list_files(
    State(state): State<ApiState>,
    caller: Caller,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Result<Json<Vec<StoredFile>>, ApiError> {
    let Query(query) = query?;
    Ok(Json(state.service.list_files(&caller, query.search.as_deref())?))
}

async fn download_file(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(attachment(state.service.download_file(&caller, &id).await?))
}

async fn delete_file(
    State(state): State<ApiState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service.delete_file(&caller, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn attachment(download: Download) -> Response {
    let content_type = HeaderValue::from_str(&download.content_type)
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        disposition_file_name(&download.file_name)
    ))
    .unwrap_or(HeaderValue::from_static("attachment"));

    (
        [(header::CONTENT_TYPE, content_type), (header::CONTENT_DISPOSITION, disposition)],
        download.bytes,
    )
        .into_response()
}

/// Printable ASCII only, with quotes and backslashes replaced.
fn disposition_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}
