//! Test fixtures: a Kernel wired to in-memory adapters and a real
//! `kb-remote` kernel serving the other end of the channel.

use crate::adapters::memory::{MemoryConnector, MemoryPeer, MemoryTransport};
use crate::adapters::NoAuthAuthenticator;
use crate::domain::{AuthError, KernelConfig};
use crate::kernel::{Kernel, KernelPorts};
use crate::ports::{Authenticator, Credentials, DiagnosticSink, FunctionRegistrar, HeaderMap};
use crate::functions::RemoteFunction;
use async_trait::async_trait;
use kb_remote::{CodeRunner, RemoteBridge, RemoteError, RemoteKernel, RunOutput};
use kb_types::{Envelope, ErrorValue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Authenticator that counts resets.
#[derive(Default)]
pub(crate) struct CountingAuth {
    inner: NoAuthAuthenticator,
    pub resets: AtomicUsize,
}

impl CountingAuth {
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for CountingAuth {
    fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated()
    }

    async fn authenticate(&self) -> Result<Credentials, AuthError> {
        self.inner.authenticate().await
    }

    fn headers(&self) -> HeaderMap {
        self.inner.headers()
    }

    fn cookies(&self) -> HeaderMap {
        self.inner.cookies()
    }

    fn update_cookies(&self, cookies: HeaderMap) {
        self.inner.update_cookies(cookies);
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.inner.reset();
    }
}

/// Collects diagnostics and registered function names.
#[derive(Default)]
pub(crate) struct Recorder {
    pub streams: Mutex<Vec<(String, String)>>,
    pub tracebacks: Mutex<Vec<Vec<String>>>,
    pub registered: Mutex<Vec<String>>,
}

impl DiagnosticSink for Recorder {
    fn stream(&self, name: &str, text: &str) {
        self.streams.lock().push((name.to_string(), text.to_string()));
    }

    fn traceback(&self, lines: &[String]) {
        self.tracebacks.lock().push(lines.to_vec());
    }
}

impl FunctionRegistrar for Recorder {
    fn register(&self, function: &Arc<RemoteFunction>) {
        self.registered.lock().push(function.name().to_string());
    }
}

/// Runner driven by a closure.
pub(crate) struct FnRunner<F>(pub F);

impl<F> CodeRunner for FnRunner<F>
where
    F: Fn(&RemoteBridge, &str) -> Result<RunOutput, ErrorValue> + Send + Sync,
{
    fn run(&self, bridge: &RemoteBridge, code: &str) -> Result<RunOutput, ErrorValue> {
        (self.0)(bridge, code)
    }
}

struct PeerSink(mpsc::UnboundedSender<String>);

impl kb_remote::MessageSink for PeerSink {
    fn send(&self, message: Envelope) -> Result<(), RemoteError> {
        let text = message.to_json().map_err(|e| RemoteError::Malformed(e.to_string()))?;
        self.0
            .send(text)
            .map_err(|_| RemoteError::Send("client channel closed".into()))
    }
}

/// Serve `remote` on `peer` until the client closes its side.
pub(crate) fn serve(peer: MemoryPeer, remote: Arc<RemoteKernel>) -> JoinHandle<()> {
    let MemoryPeer {
        mut from_client,
        to_client,
        ..
    } = peer;
    remote.bridge().attach_sink(Arc::new(PeerSink(to_client)));
    tokio::spawn(async move {
        while let Some(text) = from_client.recv().await {
            if let Err(e) = remote.handle_text(&text) {
                tracing::warn!(error = %e, "Remote kernel rejected frame");
            }
        }
        remote.bridge().link().detach_sink();
    })
}

pub(crate) struct Harness {
    pub kernel: Kernel,
    pub transport: Arc<MemoryTransport>,
    pub connector: Arc<MemoryConnector>,
    pub auth: Arc<CountingAuth>,
    pub recorder: Arc<Recorder>,
    pub peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl Harness {
    pub fn new(transport: MemoryTransport) -> Self {
        Self::with_config(transport, KernelConfig::default())
    }

    pub fn with_config(transport: MemoryTransport, config: KernelConfig) -> Self {
        let (connector, peers) = MemoryConnector::new();
        let transport = Arc::new(transport);
        let connector = Arc::new(connector);
        let auth = Arc::new(CountingAuth::default());
        let recorder = Arc::new(Recorder::default());
        let kernel = Kernel::new(
            KernelPorts {
                auth: auth.clone(),
                transport: transport.clone(),
                connector: connector.clone(),
                diagnostics: recorder.clone(),
                registrar: recorder.clone(),
            },
            config,
        );
        Self {
            kernel,
            transport,
            connector,
            auth,
            recorder,
            peers,
        }
    }

    /// Start the Kernel and serve its channel with `runner`.
    pub async fn start_serving(&mut self, runner: impl CodeRunner + 'static) -> Arc<RemoteKernel> {
        self.kernel.start().await.unwrap();
        let peer = self.peers.recv().await.unwrap();
        let remote = Arc::new(RemoteKernel::new(Arc::new(RemoteBridge::new("remote")), runner));
        serve(peer, remote.clone());
        remote
    }
}
