//! # Mock Notebook Server
//!
//! Minimal in-process stand-in for a Jupyter server, enough for the bridge:
//!
//! | Route | Behaviour |
//! |-------|-----------|
//! | `GET /tree` | sets the `_xsrf` cookie |
//! | `POST /api/kernels` | checks token + XSRF, hosts a new `RemoteKernel` |
//! | `DELETE /api/kernels/:id` | drops the kernel |
//! | `GET /api/kernels/:id/channels` | WebSocket into the kernel |
//! | `GET /api/contents[/*path]` | notebook listing / notebook cells |
//!
//! Every kernel runs the shared [`CodeRunner`] given at build time.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use kb_client::BridgeConfig;
use kb_remote::{CodeRunner, MessageSink, RemoteBridge, RemoteError, RemoteKernel, RunOutput};
use kb_types::{Envelope, ErrorValue};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const XSRF_TOKEN: &str = "mock-xsrf-token";

/// One opened channel, as seen by the server.
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub context_id: String,
    pub session_id: Option<String>,
    pub cookie: Option<String>,
}

struct SharedRunner(Arc<dyn CodeRunner>);

impl CodeRunner for SharedRunner {
    fn run(&self, bridge: &RemoteBridge, code: &str) -> Result<RunOutput, ErrorValue> {
        self.0.run(bridge, code)
    }
}

pub struct ServerState {
    token: Option<String>,
    runner: Arc<dyn CodeRunner>,
    notebooks: BTreeMap<String, Vec<(String, String)>>,
    kernels: Mutex<HashMap<String, Arc<RemoteKernel>>>,
    created: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    channels: Mutex<Vec<ChannelRecord>>,
    html_on_start: AtomicBool,
}

impl ServerState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.token else {
            return true;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Token {token}"))
    }

    fn xsrf_ok(headers: &HeaderMap) -> bool {
        headers
            .get("X-XSRFToken")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == XSRF_TOKEN)
    }
}

pub struct MockServerBuilder {
    token: Option<String>,
    runner: Arc<dyn CodeRunner>,
    notebooks: BTreeMap<String, Vec<(String, String)>>,
}

impl MockServerBuilder {
    /// Require `Authorization: Token <token>`.
    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn runner(mut self, runner: impl CodeRunner + 'static) -> Self {
        self.runner = Arc::new(runner);
        self
    }

    /// Add a notebook whose cells are all code.
    pub fn notebook(self, path: &str, cells: &[&str]) -> Self {
        let cells: Vec<(&str, &str)> = cells.iter().map(|c| ("code", *c)).collect();
        self.notebook_cells(path, &cells)
    }

    /// Add a notebook with explicit `(cell_type, source)` cells.
    pub fn notebook_cells(mut self, path: &str, cells: &[(&str, &str)]) -> Self {
        self.notebooks.insert(
            path.to_string(),
            cells.iter().map(|(t, s)| (t.to_string(), s.to_string())).collect(),
        );
        self
    }

    pub async fn start(self) -> MockServer {
        let state = Arc::new(ServerState {
            token: self.token,
            runner: self.runner,
            notebooks: self.notebooks,
            kernels: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            html_on_start: AtomicBool::new(false),
        });

        let app = Router::new()
            .route("/tree", get(tree))
            .route("/api/kernels", post(create_kernel))
            .route("/api/kernels/:id", delete(delete_kernel))
            .route("/api/kernels/:id/channels", get(channels))
            .route("/api/contents", get(list_contents))
            .route("/api/contents/*path", get(get_content))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "Mock server stopped");
            }
        });

        MockServer { addr, state, task }
    }
}

pub struct MockServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder {
            token: None,
            runner: Arc::new(kb_remote::NoopRunner),
            notebooks: BTreeMap::new(),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Bridge configuration pointing at this server.
    pub fn config(&self, units: &[&str]) -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.server.url = self.url();
        config.units = units.iter().map(|u| u.to_string()).collect();
        config
    }

    /// Answer the next start requests with an HTML page.
    pub fn answer_start_with_html(&self, html: bool) {
        self.state.html_on_start.store(html, Ordering::SeqCst);
    }

    pub fn kernel(&self, context_id: &str) -> Option<Arc<RemoteKernel>> {
        self.state.kernels.lock().get(context_id).cloned()
    }

    pub fn live_kernels(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.kernels.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.deleted.lock().clone()
    }

    pub fn channels(&self) -> Vec<ChannelRecord> {
        self.state.channels.lock().clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn tree() -> impl IntoResponse {
    (
        [(header::SET_COOKIE, format!("_xsrf={XSRF_TOKEN}; Path=/"))],
        Html("<html><body>tree</body></html>"),
    )
}

async fn create_kernel(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    if !ServerState::xsrf_ok(&headers) {
        return (StatusCode::FORBIDDEN, "'_xsrf' argument missing from POST").into_response();
    }
    if state.html_on_start.load(Ordering::SeqCst) {
        return Html("<html><body>Please log in</body></html>").into_response();
    }

    let n = state.created.fetch_add(1, Ordering::SeqCst) + 1;
    let id = format!("kernel-{n}");
    let bridge = Arc::new(RemoteBridge::new(format!("{id}-session")));
    let kernel = Arc::new(RemoteKernel::new(bridge, SharedRunner(Arc::clone(&state.runner))));
    state.kernels.lock().insert(id.clone(), kernel);
    debug!(context_id = %id, "Mock kernel started");

    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": id, "name": "mock", "execution_state": "starting" })),
    )
        .into_response()
}

async fn delete_kernel(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    if !state.authorized(&headers) {
        return StatusCode::FORBIDDEN;
    }
    if state.kernels.lock().remove(&id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    state.deleted.lock().push(id);
    StatusCode::NO_CONTENT
}

async fn channels(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let Some(kernel) = state.kernels.lock().get(&id).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    state.channels.lock().push(ChannelRecord {
        context_id: id,
        session_id: query.get("session_id").cloned(),
        cookie: headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    ws.on_upgrade(move |socket| serve_channel(socket, kernel))
}

struct ChannelSink(mpsc::UnboundedSender<String>);

impl MessageSink for ChannelSink {
    fn send(&self, message: Envelope) -> Result<(), RemoteError> {
        let text = message.to_json().map_err(|e| RemoteError::Malformed(e.to_string()))?;
        self.0.send(text).map_err(|_| RemoteError::Send("channel closed".into()))
    }
}

async fn serve_channel(socket: WebSocket, kernel: Arc<RemoteKernel>) {
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    kernel.bridge().attach_sink(Arc::new(ChannelSink(tx)));

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Err(e) = kernel.handle_text(&text) {
                    warn!(error = %e, "Mock kernel rejected message");
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    kernel.bridge().link().detach_sink();
    writer.abort();
}

async fn list_contents(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let mut content: Vec<serde_json::Value> = state
        .notebooks
        .keys()
        .map(|path| serde_json::json!({ "name": path, "path": path, "type": "notebook" }))
        .collect();
    content.push(serde_json::json!({ "name": "data.csv", "path": "data.csv", "type": "file" }));
    content.push(serde_json::json!({ "name": "lib", "path": "lib", "type": "directory" }));

    Json(serde_json::json!({ "name": "", "path": "", "type": "directory", "content": content })).into_response()
}

async fn get_content(
    State(state): State<Arc<ServerState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !state.authorized(&headers) {
        return StatusCode::FORBIDDEN.into_response();
    }
    let Some(cells) = state.notebooks.get(&path) else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "message": format!("No such file: {path}") })))
            .into_response();
    };

    // sources are sent as line lists, the way notebook files store them
    let cells: Vec<serde_json::Value> = cells
        .iter()
        .map(|(cell_type, source)| {
            let lines: Vec<String> = source.split_inclusive('\n').map(str::to_string).collect();
            serde_json::json!({ "cell_type": cell_type, "source": lines, "metadata": {} })
        })
        .collect();

    Json(serde_json::json!({
        "name": path,
        "path": path,
        "type": "notebook",
        "content": { "cells": cells, "nbformat": 4, "nbformat_minor": 5 },
    }))
    .into_response()
}
