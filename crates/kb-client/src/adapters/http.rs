//! Notebook-server REST transport (reqwest).
//!
//! Cookies are kept by the authenticator rather than a client-side jar so
//! that `reset()` really forgets them; every response's `Set-Cookie` headers
//! are merged back into it.

use crate::domain::{BridgeError, BridgeResult, ServerConfig, TransportError};
use crate::ports::{Authenticator, ContextTransport, Fragment, HeaderMap};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Method, Response};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use url::Url;

pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
    server: ServerConfig,
    auth: Arc<dyn Authenticator>,
}

impl HttpTransport {
    pub fn new(server: ServerConfig, auth: Arc<dyn Authenticator>) -> Result<Self, TransportError> {
        let base = Url::parse(&server.url).map_err(|e| TransportError::Address(format!("{}: {e}", server.url)))?;
        let client = reqwest::Client::builder()
            .timeout(server.request_timeout)
            .build()
            .map_err(|e| TransportError::Request {
                url: server.url.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base,
            server,
            auth,
        })
    }

    fn endpoint(&self, path: &str) -> Url {
        join_path(&self.base, path)
    }

    async fn send(&self, method: Method, url: Url, body: Option<serde_json::Value>) -> Result<Response, TransportError> {
        let mut request = self.client.request(method, url.clone());
        for (name, value) in self.auth.headers() {
            request = request.header(name, value);
        }
        let cookies = cookie_header(&self.auth.cookies());
        if !cookies.is_empty() {
            request = request.header(COOKIE, cookies);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| TransportError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let set_cookies: HeaderMap = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();
        if !set_cookies.is_empty() {
            self.auth.update_cookies(set_cookies);
        }

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T, TransportError> {
        let response = self.send(Method::GET, url.clone(), None).await?;
        response.json().await.map_err(|e| TransportError::Response {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl ContextTransport for HttpTransport {
    fn base_url(&self) -> &Url {
        &self.base
    }

    fn contexts_path(&self) -> &str {
        &self.server.contexts_path
    }

    async fn create_context(&self) -> BridgeResult<String> {
        // prime the cookie jar with the server's _xsrf cookie
        let landing = self.endpoint(&self.server.landing_path);
        self.send(Method::GET, landing, None).await?;

        let url = self.endpoint(&self.server.contexts_path);
        let response = self.send(Method::POST, url.clone(), Some(serde_json::json!({}))).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_json_content_type(&content_type) {
            return Err(BridgeError::Provisioning(
                "response to the start request is not JSON; check the notebook server is running".into(),
            ));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| TransportError::Response {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        context_id(&body)
    }

    async fn delete_context(&self, context_id: &str) -> BridgeResult<()> {
        let url = self.endpoint(&format!("{}/{context_id}", self.server.contexts_path));
        self.send(Method::DELETE, url, None).await?;
        debug!(context_id, "Deleted remote context");
        Ok(())
    }

    async fn fetch_content(&self, path: &str) -> BridgeResult<Vec<Fragment>> {
        let url = self.endpoint(&format!("{}/{}", self.server.contents_path, path.trim_start_matches('/')));
        let file: ContentFile = self.get_json(url).await?;
        Ok(file.content.cells.into_iter().map(Fragment::from).collect())
    }

    async fn list_units(&self) -> BridgeResult<Vec<String>> {
        let url = self.endpoint(&self.server.contents_path);
        let listing: Listing = self.get_json(url).await?;
        Ok(listing
            .content
            .into_iter()
            .filter(|entry| entry.kind == "notebook")
            .map(|entry| entry.path)
            .collect())
    }
}

/// Extract the context id from a provisioning response.
fn context_id(body: &serde_json::Value) -> BridgeResult<String> {
    match body.get("id").and_then(|id| id.as_str()) {
        Some(id) => Ok(id.to_string()),
        None => Err(BridgeError::Provisioning(
            body.get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("response has no context id")
                .to_string(),
        )),
    }
}

/// Append `path` to the base URL's own path prefix.
pub fn join_path(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}/{}", path.trim_start_matches('/')));
    url.set_query(None);
    url
}

/// `application/json` or any `application/...+json`.
fn is_json_content_type(value: &str) -> bool {
    let media = value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    match media.strip_prefix("application/") {
        Some(subtype) => subtype == "json" || subtype.ends_with("+json"),
        None => false,
    }
}

pub(crate) fn cookie_header(cookies: &HeaderMap) -> String {
    cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Name and value of a `Set-Cookie` header; attributes are ignored.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
}

#[derive(Deserialize)]
struct ContentFile {
    content: NotebookContent,
}

#[derive(Deserialize)]
struct NotebookContent {
    #[serde(default)]
    cells: Vec<Cell>,
}

#[derive(Deserialize)]
struct Cell {
    cell_type: String,
    #[serde(default)]
    source: CellSource,
}

/// Cell source is either one string or a list of lines.
#[derive(Deserialize)]
#[serde(untagged)]
enum CellSource {
    Text(String),
    Lines(Vec<String>),
}

impl Default for CellSource {
    fn default() -> Self {
        CellSource::Text(String::new())
    }
}

impl From<Cell> for Fragment {
    fn from(cell: Cell) -> Self {
        let source = match cell.source {
            CellSource::Text(text) => text,
            CellSource::Lines(lines) => lines.concat(),
        };
        Fragment {
            kind: cell.cell_type,
            source,
        }
    }
}

#[derive(Deserialize)]
struct Listing {
    #[serde(default)]
    content: Vec<ListingEntry>,
}

#[derive(Deserialize)]
struct ListingEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}
