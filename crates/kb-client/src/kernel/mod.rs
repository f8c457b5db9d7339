//! Kernel: one connection to one remote execution context.
//!
//! Lifecycle:
//! 1. `start` authenticates if needed, provisions a context, opens the
//!    duplex channel and spawns the receive loop
//! 2. `execute` / `evaluate` send requests and await correlated replies
//! 3. `run_unit` declares the session, then runs a unit's fragments in order
//! 4. `shutdown` closes the channel and deletes the context concurrently
//!
//! A `Kernel` is a cheap clone of a shared handle. Proxies and the receive
//! loop only hold a [`KernelRef`], so dropping the last `Kernel` ends them.

mod pending;
mod receive;

pub use pending::{PendingReplies, PendingStats, ReplyResult};

use crate::adapters::http::cookie_header;
use crate::domain::{BridgeError, BridgeResult, KernelConfig, TransportError};
use crate::functions::FunctionTable;
use crate::handler::{Handler, MessageHandler};
use crate::ports::{
    Authenticator, ChannelConnector, ContextTransport, DiagnosticSink, FrameSink, FunctionRegistrar, HeaderMap,
};
use crate::rtd::RtdTable;
use kb_types::envelope::{verbs, ExecuteRequest};
use kb_types::expr::ExpressionResult;
use kb_types::{CallExpr, Declaration, Envelope, SessionId};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// `user_expressions` key the dispatcher call is evaluated under.
const RESULT_KEY: &str = "result";

/// Collaborators a Kernel talks to.
#[derive(Clone)]
pub struct KernelPorts {
    pub auth: Arc<dyn Authenticator>,
    pub transport: Arc<dyn ContextTransport>,
    pub connector: Arc<dyn ChannelConnector>,
    pub diagnostics: Arc<dyn DiagnosticSink>,
    pub registrar: Arc<dyn FunctionRegistrar>,
}

struct Connection {
    context_id: String,
    sink: Arc<dyn FrameSink>,
    reader: JoinHandle<()>,
}

struct KernelInner {
    session: SessionId,
    config: KernelConfig,
    ports: KernelPorts,
    handler: Arc<dyn MessageHandler>,
    pending: Arc<PendingReplies>,
    connection: parking_lot::Mutex<Option<Connection>>,
    /// Serializes `start` so concurrent callers provision once.
    starting: tokio::sync::Mutex<()>,
    functions: FunctionTable,
    rtds: RtdTable,
}

impl Drop for KernelInner {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            warn!(
                session = %self.session,
                context_id = %connection.context_id,
                "Kernel not shut down cleanly"
            );
            connection.reader.abort();
        }
    }
}

#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

/// Non-owning reference to a [`Kernel`].
#[derive(Clone, Default)]
pub struct KernelRef(Weak<KernelInner>);

impl KernelRef {
    pub fn upgrade(&self) -> Option<Kernel> {
        self.0.upgrade().map(|inner| Kernel { inner })
    }

    /// A reference that never upgrades.
    pub fn dangling() -> Self {
        Self(Weak::new())
    }
}

impl Kernel {
    /// Kernel with the default message handler.
    pub fn new(ports: KernelPorts, config: KernelConfig) -> Self {
        let diagnostics = Arc::clone(&ports.diagnostics);
        let registrar = Arc::clone(&ports.registrar);
        Self::with_handler(ports, config, move |kernel| {
            Arc::new(Handler::new(kernel, diagnostics, registrar))
        })
    }

    /// Kernel with a custom handler, built from the Kernel's own reference.
    pub fn with_handler(
        ports: KernelPorts,
        config: KernelConfig,
        make_handler: impl FnOnce(KernelRef) -> Arc<dyn MessageHandler>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak| KernelInner {
            session: SessionId::generate(),
            config,
            ports,
            handler: make_handler(KernelRef(weak.clone())),
            pending: Arc::new(PendingReplies::new()),
            connection: parking_lot::Mutex::new(None),
            starting: tokio::sync::Mutex::new(()),
            functions: FunctionTable::new(),
            rtds: RtdTable::new(),
        });
        Self { inner }
    }

    pub fn downgrade(&self) -> KernelRef {
        KernelRef(Arc::downgrade(&self.inner))
    }

    pub fn session(&self) -> &SessionId {
        &self.inner.session
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    /// Highest codec version this client decodes.
    pub fn codec_version(&self) -> u8 {
        self.inner.config.codec_version
    }

    pub fn context_id(&self) -> Option<String> {
        self.inner.connection.lock().as_ref().map(|c| c.context_id.clone())
    }

    /// True while a connection exists and its receive loop is alive.
    pub fn is_running(&self) -> bool {
        self.inner
            .connection
            .lock()
            .as_ref()
            .is_some_and(|c| !c.reader.is_finished())
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.inner.functions
    }

    pub fn rtds(&self) -> &RtdTable {
        &self.inner.rtds
    }

    pub fn pending(&self) -> &PendingReplies {
        &self.inner.pending
    }

    /// Provision a context and open the channel. No-op when already started.
    pub async fn start(&self) -> BridgeResult<()> {
        let _guard = self.inner.starting.lock().await;
        let ports = &self.inner.ports;

        let stale = {
            let mut connection = self.inner.connection.lock();
            match connection.as_ref().map(|c| c.reader.is_finished()) {
                Some(false) => return Ok(()),
                Some(true) => connection.take(),
                None => None,
            }
        };
        if let Some(stale) = stale {
            info!(context_id = %stale.context_id, "Channel lost; provisioning a new context");
            if let Err(e) = ports.transport.delete_context(&stale.context_id).await {
                warn!(context_id = %stale.context_id, error = %e, "Failed to delete stale context");
            }
        }

        if !ports.auth.is_authenticated() {
            ports.auth.authenticate().await?;
        }

        let context_id = match ports.transport.create_context().await {
            Ok(id) => id,
            Err(e) => {
                ports.auth.reset();
                return Err(e);
            }
        };

        let url = channel_url(
            ports.transport.base_url(),
            ports.transport.contexts_path(),
            &context_id,
            self.inner.session.as_str(),
        )?;
        let mut headers: HeaderMap = ports.auth.headers();
        let cookies = ports.auth.cookies();
        if !cookies.is_empty() {
            headers.insert("Cookie".to_string(), cookie_header(&cookies));
        }

        let (sink, stream) = match ports.connector.connect(&url, &headers).await {
            Ok(channel) => channel,
            Err(e) => {
                ports.auth.reset();
                if let Err(cleanup) = ports.transport.delete_context(&context_id).await {
                    warn!(context_id = %context_id, error = %cleanup, "Failed to delete orphaned context");
                }
                return Err(e.into());
            }
        };

        let reader = tokio::spawn(receive::run(
            stream,
            self.inner.session.clone(),
            Arc::clone(&self.inner.pending),
            Arc::clone(&self.inner.handler),
        ));
        *self.inner.connection.lock() = Some(Connection {
            context_id: context_id.clone(),
            sink,
            reader,
        });

        info!(session = %self.inner.session, context_id = %context_id, "Kernel started");
        Ok(())
    }

    /// Send an `execute_request` and await its reply.
    ///
    /// A reply whose status is not `ok` is returned as
    /// `BridgeError::ExecuteRequest` carrying the remote error text verbatim.
    pub async fn execute(&self, code: &str, user_expressions: BTreeMap<String, String>) -> BridgeResult<Envelope> {
        let sink = self
            .inner
            .connection
            .lock()
            .as_ref()
            .map(|c| Arc::clone(&c.sink))
            .ok_or(BridgeError::NotStarted)?;
        let pending = &self.inner.pending;

        let (msg_id, rx) = pending.register(verbs::EXECUTE_REQUEST);
        let request = Envelope::execute_request(
            msg_id,
            &self.inner.session,
            &self.inner.config.username,
            &ExecuteRequest {
                code: code.to_string(),
                silent: false,
                user_expressions,
            },
        );
        let sent = match request.to_json() {
            Ok(text) => sink.send(text).await.map_err(BridgeError::from),
            Err(e) => Err(BridgeError::Malformed(e.to_string())),
        };
        if let Err(e) = sent {
            pending.cancel(&msg_id);
            return Err(e);
        }

        let timeout = self.inner.config.execute_timeout;
        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply?,
            Ok(Err(_)) => return Err(BridgeError::ConnectionClosed),
            Err(_) => {
                pending.cancel(&msg_id);
                warn!(msg_id = %msg_id, ?timeout, "Request timed out");
                return Err(BridgeError::Timeout(timeout));
            }
        };

        let content = &reply.content;
        let status = content.get("status").and_then(|s| s.as_str()).unwrap_or_default();
        if status != "ok" {
            let text = |key: &str| content.get(key).and_then(|v| v.as_str()).map(str::to_string);
            let traceback = content
                .get("traceback")
                .and_then(|tb| tb.as_array())
                .map(|tb| tb.iter().filter_map(|l| l.as_str().map(str::to_string)).collect())
                .unwrap_or_default();
            return Err(BridgeError::ExecuteRequest {
                ename: text("ename").unwrap_or_else(|| format!("status '{status}'")),
                evalue: text("evalue").unwrap_or_default(),
                traceback,
            });
        }
        debug!(msg_id = %msg_id, "Execute succeeded");
        Ok(reply)
    }

    /// Evaluate one dispatcher call and return its result token.
    pub async fn evaluate(&self, expr: &CallExpr) -> BridgeResult<String> {
        let mut expressions = BTreeMap::new();
        expressions.insert(RESULT_KEY.to_string(), expr.render()?);
        let reply = self.execute("", expressions).await?;

        let result = reply
            .content
            .get("user_expressions")
            .and_then(|u| u.get(RESULT_KEY))
            .ok_or_else(|| BridgeError::Malformed("reply carries no result expression".into()))?;
        let result: ExpressionResult =
            serde_json::from_value(result.clone()).map_err(|e| BridgeError::Malformed(e.to_string()))?;
        if !result.is_ok() {
            return Err(BridgeError::remote(result.to_error_value()));
        }
        result
            .token()
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Malformed("result carries no token".into()))
    }

    /// Run a unit: declare the session, then execute each fragment in order.
    ///
    /// Stops at the first failing fragment.
    pub async fn run_unit(&self, path: &str) -> BridgeResult<()> {
        let fragments = match self.inner.ports.transport.fetch_content(path).await {
            Ok(fragments) => fragments,
            Err(e) => {
                self.inner.ports.auth.reset();
                return Err(e);
            }
        };

        for declaration in [
            Declaration::Session(self.inner.session.to_string()),
            Declaration::CodecVersion(self.codec_version()),
        ] {
            self.execute(&declaration.render()?, BTreeMap::new()).await?;
        }

        let executable: Vec<_> = fragments.iter().filter(|f| f.is_executable()).collect();
        info!(unit = path, fragments = executable.len(), "Running unit");
        for fragment in executable {
            self.execute(&fragment.source, BTreeMap::new()).await?;
        }
        Ok(())
    }

    /// Close the channel and delete the context. Idempotent.
    pub async fn shutdown(&self) -> BridgeResult<()> {
        let Some(connection) = self.inner.connection.lock().take() else {
            return Ok(());
        };
        let ports = &self.inner.ports;

        let (closed, deleted) = tokio::join!(
            connection.sink.close(),
            ports.transport.delete_context(&connection.context_id)
        );
        self.inner.pending.fail_all();
        connection.reader.abort();
        self.inner.rtds.clear();
        self.inner.functions.clear();

        // a failed delete outranks a failed close
        if let Err(e) = deleted.and(closed.map_err(BridgeError::from)) {
            ports.auth.reset();
            return Err(e);
        }
        info!(session = %self.inner.session, context_id = %connection.context_id, "Kernel shut down");
        Ok(())
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("session", &self.inner.session)
            .field("context_id", &self.context_id())
            .finish()
    }
}

/// Duplex channel address of a context.
///
/// `http`/`https` become `ws`/`wss`; the base URL's path prefix is kept.
pub fn channel_url(base: &Url, contexts_path: &str, context_id: &str, session: &str) -> Result<Url, TransportError> {
    let mut url = base.clone();
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(TransportError::Address(format!("unsupported scheme '{other}' in {base}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Address(base.to_string()))?;

    let prefix = base.path().trim_end_matches('/');
    let contexts = contexts_path.trim_matches('/');
    url.set_path(&format!("{prefix}/{contexts}/{context_id}/channels"));
    url.set_query(None);
    url.query_pairs_mut().append_pair("session_id", session);
    Ok(url)
}
