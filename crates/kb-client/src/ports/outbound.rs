//! Outbound (driven) ports of the client.
//!
//! The Kernel never talks to the network or the host directly; it goes
//! through these traits so the same logic runs against the real notebook
//! server, the in-memory adapters and the end-to-end mock server.

use crate::domain::{AuthError, BridgeResult, TransportError};
use crate::functions::RemoteFunction;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

/// Header and cookie maps, by name.
pub type HeaderMap = BTreeMap<String, String>;

/// Credentials produced by [`Authenticator::authenticate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub headers: HeaderMap,
    pub cookies: HeaderMap,
}

/// Authentication capability.
///
/// The Kernel only needs to know whether credentials exist, how to obtain
/// them, and how to drop them after a failure that suggests they are stale.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn is_authenticated(&self) -> bool;

    async fn authenticate(&self) -> Result<Credentials, AuthError>;

    /// Headers to send with every request.
    fn headers(&self) -> HeaderMap;

    fn cookies(&self) -> HeaderMap;

    /// Merge cookies set by a server response.
    fn update_cookies(&self, cookies: HeaderMap);

    /// Forget all credentials; the next start re-authenticates.
    fn reset(&self);
}

/// One executable fragment (notebook cell) of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Type tag: `code`, `markdown`, `raw`, ...
    pub kind: String,
    pub source: String,
}

impl Fragment {
    pub fn code(source: impl Into<String>) -> Self {
        Self {
            kind: "code".to_string(),
            source: source.into(),
        }
    }

    /// True for non-empty code fragments.
    pub fn is_executable(&self) -> bool {
        self.kind == "code" && !self.source.trim().is_empty()
    }
}

/// Request/response side of the notebook server.
#[async_trait]
pub trait ContextTransport: Send + Sync {
    /// Base address the duplex channel address is derived from.
    fn base_url(&self) -> &Url;

    /// Collection path of execution contexts (`/api/kernels`).
    fn contexts_path(&self) -> &str;

    /// Provision a new execution context and return its id.
    async fn create_context(&self) -> BridgeResult<String>;

    async fn delete_context(&self, context_id: &str) -> BridgeResult<()>;

    /// Fetch a unit's fragments in order.
    async fn fetch_content(&self, path: &str) -> BridgeResult<Vec<Fragment>>;

    /// Paths of every runnable unit in the content store root.
    async fn list_units(&self) -> BridgeResult<Vec<String>>;
}

/// Outbound half of an open duplex channel.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, text: String) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Inbound half of an open duplex channel. `None` once the peer closed.
#[async_trait]
pub trait FrameStream: Send {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;
}

/// Opens duplex channels.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<(Arc<dyn FrameSink>, Box<dyn FrameStream>), TransportError>;
}

/// Local destination of remote stdout/stderr and tracebacks.
pub trait DiagnosticSink: Send + Sync {
    fn stream(&self, name: &str, text: &str);

    fn traceback(&self, lines: &[String]);
}

/// Writes streams to the process's own stdout/stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDiagnostics;

impl DiagnosticSink for StdDiagnostics {
    fn stream(&self, name: &str, text: &str) {
        use std::io::Write;
        let result = match name {
            "stdout" => std::io::stdout().write_all(text.as_bytes()),
            "stderr" => std::io::stderr().write_all(text.as_bytes()),
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!(stream = name, error = %e, "Failed to forward remote output");
        }
    }

    fn traceback(&self, lines: &[String]) {
        error!("Remote error:\n{}", lines.join("\n"));
    }
}

/// Host hook invoked whenever a remote function proxy is installed.
pub trait FunctionRegistrar: Send + Sync {
    fn register(&self, function: &Arc<RemoteFunction>);
}

/// Registrar that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRegistrar;

impl FunctionRegistrar for LogRegistrar {
    fn register(&self, function: &Arc<RemoteFunction>) {
        info!(function = function.name(), "Remote function available");
    }
}
