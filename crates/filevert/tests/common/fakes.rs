//! In-process HTTP fakes for the conversion provider and object storage.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use filevert::provider::{ConversionProvider, Result as ProviderResult, SubmittedJob, UploadForm};

/// Serves `router` on an ephemeral local port. Returns the base URL.
pub async fn serve(router: Router) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local address");
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Test server failed");
    });
    (format!("http://{}", addr), handle)
}

// ─── Conversion provider ────────────────────────────────────────────────────

pub const PROVIDER_JOB_ID: &str = "pj-1";

/// How the fake provider answers status checks.
#[derive(Debug, Clone)]
pub enum ProviderScript {
    /// `processing` until the given check (1-based), then `finished`.
    FinishOnPoll(u32),
    /// A failed convert task on the given check.
    FailOnPoll { poll: u32, message: String },
    /// `processing` forever.
    Stall,
    /// The submit call fails with this HTTP status.
    RejectSubmit(u16),
    /// `finished`, but the export task lists no files.
    FinishWithoutFiles,
}

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    /// Multipart field names in the order received.
    pub field_order: Vec<String>,
    pub fields: Vec<(String, String)>,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

struct ProviderState {
    base_url: String,
    script: ProviderScript,
    submits: Vec<Value>,
    auth_headers: Vec<Option<String>>,
    uploads: Vec<RecordedUpload>,
    polls: u32,
    downloads: u32,
}

type SharedProvider = Arc<Mutex<ProviderState>>;

pub struct FakeProvider {
    pub base_url: String,
    state: SharedProvider,
    server: JoinHandle<()>,
}

impl FakeProvider {
    pub async fn start(script: ProviderScript) -> Self {
        let state = Arc::new(Mutex::new(ProviderState {
            base_url: String::new(),
            script,
            submits: Vec::new(),
            auth_headers: Vec::new(),
            uploads: Vec::new(),
            polls: 0,
            downloads: 0,
        }));

        let router = Router::new()
            .route("/v2/jobs", post(submit_job))
            .route("/v2/jobs/{id}", get(job_status))
            .route("/upload", post(upload))
            .route("/files/result", get(download))
            .with_state(Arc::clone(&state));

        let (base_url, server) = serve(router).await;
        state.lock().unwrap().base_url = base_url.clone();

        Self {
            base_url,
            state,
            server,
        }
    }

    pub fn api_url(&self) -> String {
        format!("{}/v2", self.base_url)
    }

    pub fn polls(&self) -> u32 {
        self.state.lock().unwrap().polls
    }

    pub fn downloads(&self) -> u32 {
        self.state.lock().unwrap().downloads
    }

    pub fn submits(&self) -> Vec<Value> {
        self.state.lock().unwrap().submits.clone()
    }

    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().auth_headers.clone()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state.lock().unwrap().uploads.clone()
    }

    /// What the fake returns as the converted file for `source`.
    pub fn converted(source: &[u8]) -> Vec<u8> {
        [b"converted:".as_slice(), source].concat()
    }
}

impl Drop for FakeProvider {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn task(name: &str, status: &str) -> Value {
    json!({ "name": name, "status": status })
}

async fn submit_job(
    State(state): State<SharedProvider>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    state.submits.push(body);
    state.auth_headers.push(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    if let ProviderScript::RejectSubmit(code) = state.script {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "credits exhausted").into_response();
    }

    Json(json!({
        "data": {
            "id": PROVIDER_JOB_ID,
            "status": "waiting",
            "tasks": [
                {
                    "name": "import-source",
                    "operation": "import/upload",
                    "status": "waiting",
                    "result": {
                        "form": {
                            "url": format!("{}/upload", state.base_url),
                            "parameters": {
                                "expires": 1767225600,
                                "max_file_count": 1,
                                "signature": "sig-abc123"
                            }
                        }
                    }
                },
                task("convert-source", "waiting"),
                task("export-result", "waiting")
            ]
        }
    }))
    .into_response()
}

async fn upload(State(state): State<SharedProvider>, mut multipart: Multipart) -> StatusCode {
    let mut record = RecordedUpload {
        field_order: Vec::new(),
        fields: Vec::new(),
        file_name: String::new(),
        bytes: Vec::new(),
    };

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        record.field_order.push(name.clone());
        if name == "file" {
            record.file_name = field.file_name().unwrap_or_default().to_string();
            record.bytes = field.bytes().await.map(|b| b.to_vec()).unwrap_or_default();
        } else {
            let value = field.text().await.unwrap_or_default();
            record.fields.push((name, value));
        }
    }

    state.lock().unwrap().uploads.push(record);
    StatusCode::CREATED
}

async fn job_status(State(state): State<SharedProvider>, Path(id): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    if id != PROVIDER_JOB_ID {
        return (StatusCode::NOT_FOUND, "no such job").into_response();
    }
    state.polls += 1;
    let poll = state.polls;

    let processing = json!({
        "data": {
            "id": PROVIDER_JOB_ID,
            "status": "processing",
            "tasks": [
                task("import-source", "finished"),
                task("convert-source", "processing"),
                task("export-result", "waiting")
            ]
        }
    });

    let body = match &state.script {
        ProviderScript::FinishOnPoll(n) if poll >= *n => json!({
            "data": {
                "id": PROVIDER_JOB_ID,
                "status": "finished",
                "tasks": [
                    task("import-source", "finished"),
                    task("convert-source", "finished"),
                    {
                        "name": "export-result",
                        "status": "finished",
                        "result": {
                            "files": [
                                {
                                    "filename": "result.bin",
                                    "url": format!("{}/files/result", state.base_url)
                                }
                            ]
                        }
                    }
                ]
            }
        }),
        ProviderScript::FinishWithoutFiles => json!({
            "data": {
                "id": PROVIDER_JOB_ID,
                "status": "finished",
                "tasks": [
                    { "name": "export-result", "status": "finished", "result": { "files": [] } }
                ]
            }
        }),
        ProviderScript::FailOnPoll { poll: n, message } if poll >= *n => json!({
            "data": {
                "id": PROVIDER_JOB_ID,
                "status": "error",
                "message": "Job failed",
                "tasks": [
                    task("import-source", "finished"),
                    {
                        "name": "convert-source",
                        "status": "error",
                        "code": "INVALID_CONVERSION_TYPE",
                        "message": message
                    },
                    task("export-result", "waiting")
                ]
            }
        }),
        _ => processing,
    };

    Json(body).into_response()
}

async fn download(State(state): State<SharedProvider>) -> Response {
    let mut state = state.lock().unwrap();
    state.downloads += 1;
    let source = state
        .uploads
        .last()
        .map(|u| u.bytes.clone())
        .unwrap_or_default();
    FakeProvider::converted(&source).into_response()
}

// ─── Object storage ─────────────────────────────────────────────────────────

struct StoreState {
    objects: HashMap<String, Vec<u8>>,
    token: Option<String>,
}

type SharedStore = Arc<Mutex<StoreState>>;

/// `GET`/`PUT`/`DELETE /{key}` object storage kept in memory.
pub struct FakeObjectStore {
    pub base_url: String,
    state: SharedStore,
    server: JoinHandle<()>,
}

impl FakeObjectStore {
    /// `token`, when set, is required as a bearer credential.
    pub async fn start(token: Option<&str>) -> Self {
        let state = Arc::new(Mutex::new(StoreState {
            objects: HashMap::new(),
            token: token.map(str::to_string),
        }));

        let router = Router::new()
            .route(
                "/{*key}",
                get(get_object).put(put_object).delete(delete_object),
            )
            .with_state(Arc::clone(&state));
        let (base_url, server) = serve(router).await;

        Self {
            base_url,
            state,
            server,
        }
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().unwrap().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn remove(&self, key: &str) {
        self.state.lock().unwrap().objects.remove(key);
    }
}

impl Drop for FakeObjectStore {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn authorized(state: &StoreState, headers: &HeaderMap) -> bool {
    match &state.token {
        None => true,
        Some(token) => headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {}", token)),
    }
}

async fn get_object(
    State(state): State<SharedStore>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response {
    let state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match state.objects.get(&key) {
        Some(bytes) => bytes.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_object(
    State(state): State<SharedStore>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let mut state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let exclusive = headers
        .get(header::IF_NONE_MATCH)
        .is_some_and(|v| v.as_bytes() == b"*");
    if exclusive && state.objects.contains_key(&key) {
        return StatusCode::PRECONDITION_FAILED;
    }
    state.objects.insert(key, body.to_vec());
    StatusCode::CREATED
}

async fn delete_object(
    State(state): State<SharedStore>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    let mut state = state.lock().unwrap();
    if !authorized(&state, &headers) {
        return StatusCode::UNAUTHORIZED;
    }
    match state.objects.remove(&key) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

// ─── Misbehaving providers ──────────────────────────────────────────────────

/// Accepts the job, then panics while waiting for the result.
pub struct PanickingProvider;

#[async_trait]
impl ConversionProvider for PanickingProvider {
    async fn submit(&self, _: &str, _: &str) -> ProviderResult<SubmittedJob> {
        Ok(SubmittedJob {
            provider_job_id: "panic".to_string(),
            upload: UploadForm {
                url: "http://127.0.0.1:9/unused".to_string(),
                parameters: vec![],
            },
        })
    }

    async fn upload(&self, _: &UploadForm, _: &str, _: Vec<u8>) -> ProviderResult<()> {
        Ok(())
    }

    async fn wait_for_result(&self, _: &str) -> ProviderResult<String> {
        panic!("provider client bug");
    }

    async fn download(&self, _: &str) -> ProviderResult<Vec<u8>> {
        Ok(vec![])
    }
}

/// Accepts the job, then hangs forever in `upload`.
pub struct HangingUploadProvider;

#[async_trait]
impl ConversionProvider for HangingUploadProvider {
    async fn submit(&self, _: &str, _: &str) -> ProviderResult<SubmittedJob> {
        Ok(SubmittedJob {
            provider_job_id: "hang".to_string(),
            upload: UploadForm {
                url: "http://127.0.0.1:9/unused".to_string(),
                parameters: vec![],
            },
        })
    }

    async fn upload(&self, _: &UploadForm, _: &str, _: Vec<u8>) -> ProviderResult<()> {
        std::future::pending().await
    }

    async fn wait_for_result(&self, _: &str) -> ProviderResult<String> {
        std::future::pending().await
    }

    async fn download(&self, _: &str) -> ProviderResult<Vec<u8>> {
        Ok(vec![])
    }
}
