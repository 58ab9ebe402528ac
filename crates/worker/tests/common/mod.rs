#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Serve `app` on an ephemeral localhost port and return its base URL.
async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A localhost URL nothing is listening on.
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

/// Write a `width`x`height` RGBA PNG into `dir` and return its bytes.
pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 120, 200, 255]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    let bytes = buf.into_inner();
    std::fs::write(dir.join(name), &bytes).unwrap();
    bytes
}

/// A `/history` document with one tagged image output.
pub fn history_with_image(prompt_id: &str, filename: &str) -> Value {
    json!({ prompt_id: {
        "status": {"status_str": "success", "completed": true, "messages": []},
        "outputs": {"9": {"images": [
            {"filename": filename, "subfolder": "", "type": "output"}
        ]}}
    }})
}

// ---------------------------------------------------------------------------
// Upload sink
// ---------------------------------------------------------------------------

/// One PUT received by the [`UploadSink`].
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub path: String,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
}

struct SinkState {
    statuses: HashMap<String, StatusCode>,
    received: Mutex<Vec<ReceivedUpload>>,
}

/// Stand-in for a pre-authorized object storage endpoint.
pub struct UploadSink {
    base_url: String,
    state: Arc<SinkState>,
}

impl UploadSink {
    /// Accept every PUT with 200, except paths listed in `failing`.
    pub async fn spawn(failing: &[(&str, u16)]) -> Self {
        let statuses = failing
            .iter()
            .map(|(path, code)| (path.to_string(), StatusCode::from_u16(*code).unwrap()))
            .collect();
        let state = Arc::new(SinkState {
            statuses,
            received: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/{*path}", put(receive_upload))
            .with_state(Arc::clone(&state));

        Self {
            base_url: serve(app).await,
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn received(&self) -> Vec<ReceivedUpload> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn upload_at(&self, path: &str) -> Option<ReceivedUpload> {
        self.received().into_iter().find(|u| u.path == path)
    }
}

async fn receive_upload(
    State(state): State<Arc<SinkState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let path = uri.path().to_string();
    let status = state.statuses.get(&path).copied().unwrap_or(StatusCode::OK);

    state.received.lock().unwrap().push(ReceivedUpload {
        path,
        content_type: header("content-type"),
        content_length: header("content-length").and_then(|v| v.parse().ok()),
        body: body.to_vec(),
    });
    status
}

// ---------------------------------------------------------------------------
// Fake ComfyUI
// ---------------------------------------------------------------------------

/// Scripted ComfyUI HTTP API with hit counters.
pub struct FakeComfyState {
    pub prompt_reply: Mutex<(StatusCode, Value)>,
    pub history: Mutex<Value>,
    pub submitted: Mutex<Vec<Value>>,
    pub cancelled: Mutex<Vec<String>>,
    /// Prompt IDs reported under `queue_running`.
    pub running: Mutex<Vec<String>>,
    pub interrupts: AtomicUsize,
    pub health_hits: AtomicUsize,
    pub history_hits: AtomicUsize,
}

pub struct FakeComfyUI {
    pub base_url: String,
    pub state: Arc<FakeComfyState>,
}

impl FakeComfyUI {
    /// Accept prompts as `prompt_id`, answering `/history` with `history`.
    pub async fn spawn(prompt_id: &str, history: Value) -> Self {
        let state = Arc::new(FakeComfyState {
            prompt_reply: Mutex::new((
                StatusCode::OK,
                json!({"prompt_id": prompt_id, "number": 1, "node_errors": {}}),
            )),
            history: Mutex::new(history),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            running: Mutex::new(Vec::new()),
            interrupts: AtomicUsize::new(0),
            health_hits: AtomicUsize::new(0),
            history_hits: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/system_stats", get(system_stats))
            .route("/prompt", post(submit_prompt))
            .route("/history/{prompt_id}", get(history_reply))
            .route("/queue", get(queue_snapshot).post(queue_delete))
            .route("/interrupt", post(interrupt))
            .with_state(Arc::clone(&state));

        Self {
            base_url: serve(app).await,
            state,
        }
    }

    pub fn reject_prompts_with(&self, status: u16, body: Value) {
        *self.state.prompt_reply.lock().unwrap() = (StatusCode::from_u16(status).unwrap(), body);
    }

    pub fn history_hits(&self) -> usize {
        self.state.history_hits.load(Ordering::SeqCst)
    }

    /// Report `prompt_id` as the prompt currently executing.
    pub fn mark_running(&self, prompt_id: &str) {
        self.state.running.lock().unwrap().push(prompt_id.to_string());
    }

    pub fn interrupts(&self) -> usize {
        self.state.interrupts.load(Ordering::SeqCst)
    }
}

async fn system_stats(State(state): State<Arc<FakeComfyState>>) -> Json<Value> {
    state.health_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({"system": {"os": "posix"}, "devices": []}))
}

async fn submit_prompt(
    State(state): State<Arc<FakeComfyState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.submitted.lock().unwrap().push(body);
    let (status, reply) = state.prompt_reply.lock().unwrap().clone();
    (status, Json(reply))
}

async fn history_reply(
    State(state): State<Arc<FakeComfyState>>,
    UrlPath(_prompt_id): UrlPath<String>,
) -> Json<Value> {
    state.history_hits.fetch_add(1, Ordering::SeqCst);
    Json(state.history.lock().unwrap().clone())
}

async fn queue_snapshot(State(state): State<Arc<FakeComfyState>>) -> Json<Value> {
    let running: Vec<Value> = state
        .running
        .lock()
        .unwrap()
        .iter()
        .enumerate()
        .map(|(number, id)| json!([number, id, {}, {}, []]))
        .collect();
    Json(json!({"queue_running": running, "queue_pending": []}))
}

async fn queue_delete(
    State(state): State<Arc<FakeComfyState>>,
    Json(body): Json<Value>,
) -> StatusCode {
    let ids = body["delete"]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(|id| id.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    state.cancelled.lock().unwrap().extend(ids);
    StatusCode::OK
}

async fn interrupt(State(state): State<Arc<FakeComfyState>>) -> StatusCode {
    state.interrupts.fetch_add(1, Ordering::SeqCst);
    state.running.lock().unwrap().clear();
    StatusCode::OK
}
