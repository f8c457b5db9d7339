//! In-memory adapters for tests.
//!
//! [`MemoryConnector`] hands every opened channel to the test as a
//! [`MemoryPeer`], which plays the kernel side of the connection.
//! [`MemoryTransport`] provisions numbered contexts and serves fragments
//! from a map.

use crate::domain::{BridgeError, BridgeResult, TransportError};
use crate::ports::{ChannelConnector, ContextTransport, Fragment, FrameSink, FrameStream, HeaderMap};
use async_trait::async_trait;
use dashmap::DashMap;
use kb_types::Envelope;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use url::Url;

/// Kernel side of an in-memory channel.
pub struct MemoryPeer {
    pub url: Url,
    pub headers: HeaderMap,
    /// Frames sent by the client.
    pub from_client: mpsc::UnboundedReceiver<String>,
    /// Frames delivered to the client's receive loop.
    pub to_client: mpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    /// Next envelope sent by the client, `None` once it closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        let text = self.from_client.recv().await?;
        Envelope::from_json(&text).ok()
    }

    pub fn send(&self, message: &Envelope) -> bool {
        match message.to_json() {
            Ok(text) => self.to_client.send(text).is_ok(),
            Err(_) => false,
        }
    }

    pub fn send_raw(&self, text: &str) -> bool {
        self.to_client.send(text.to_string()).is_ok()
    }
}

pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    connects: AtomicUsize,
    fail_close: Arc<AtomicBool>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                connects: AtomicUsize::new(0),
                fail_close: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Make `close` fail on every sink this connector handed out.
    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChannelConnector for MemoryConnector {
    async fn connect(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<(Arc<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        let (client_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, client_rx) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.clone(),
            headers: headers.clone(),
            from_client,
            to_client,
        };
        self.peers
            .send(peer)
            .map_err(|_| TransportError::Channel("no peer listening".into()))?;
        self.connects.fetch_add(1, Ordering::SeqCst);

        Ok((
            Arc::new(MemorySink {
                tx: Mutex::new(Some(client_tx)),
                fail_close: Arc::clone(&self.fail_close),
            }),
            Box::new(MemoryFrames { rx: client_rx }),
        ))
    }
}

struct MemorySink {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    fail_close: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or_else(|| TransportError::Channel("closed".into()))?;
        tx.send(text).map_err(|_| TransportError::Channel("peer gone".into()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.tx.lock().take();
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::Channel("close handshake failed".into()));
        }
        Ok(())
    }
}

struct MemoryFrames {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameStream for MemoryFrames {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Context provisioning and content store kept in memory.
pub struct MemoryTransport {
    base: Url,
    contexts_path: String,
    created: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    fail_delete: AtomicBool,
    create_gate: Mutex<Option<Arc<Semaphore>>>,
    contents: DashMap<String, Vec<Fragment>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            base: Url::parse("http://localhost:8888/").expect("static url is valid"),
            contexts_path: "/api/kernels".to_string(),
            created: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            create_gate: Mutex::new(None),
            contents: DashMap::new(),
        }
    }

    pub fn with_unit(self, path: &str, fragments: Vec<Fragment>) -> Self {
        self.contents.insert(path.to_string(), fragments);
        self
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Park `create_context` until the returned semaphore gets a permit.
    pub fn hold_create(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.create_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextTransport for MemoryTransport {
    fn base_url(&self) -> &Url {
        &self.base
    }

    fn contexts_path(&self) -> &str {
        &self.contexts_path
    }

    async fn create_context(&self) -> BridgeResult<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BridgeError::Provisioning("context quota exceeded".into()));
        }
        let gate = self.create_gate.lock().clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| BridgeError::Provisioning("create gate closed".into()))?;
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("ctx-{n}"))
    }

    async fn delete_context(&self, context_id: &str) -> BridgeResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                url: format!("{}{}/{context_id}", self.base, self.contexts_path),
                status: 500,
            }
            .into());
        }
        self.deleted.lock().push(context_id.to_string());
        Ok(())
    }

    async fn fetch_content(&self, path: &str) -> BridgeResult<Vec<Fragment>> {
        self.contents.get(path).map(|f| f.clone()).ok_or_else(|| {
            TransportError::Status {
                url: path.to_string(),
                status: 404,
            }
            .into()
        })
    }

    async fn list_units(&self) -> BridgeResult<Vec<String>> {
        let mut units: Vec<String> = self.contents.iter().map(|e| e.key().clone()).collect();
        units.sort();
        Ok(units)
    }
}
