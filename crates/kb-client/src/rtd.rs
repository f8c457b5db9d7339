//! Host-side proxies for remote real-time-data handles.
//!
//! A proxy is created when a remote call returns an RTD reference. It starts
//! with the value carried in the reference and is then updated by
//! `rtd_set_value` / `rtd_set_error` pushes while it sits in the Kernel's
//! [`RtdTable`]. `disconnect` takes it out of the table before telling the
//! kernel, so late pushes are dropped.

use crate::domain::{BridgeError, BridgeResult};
use crate::kernel::KernelRef;
use dashmap::DashMap;
use kb_types::{codec, CallExpr, ErrorValue, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

const CONNECT: &str = "connect";
const DISCONNECT: &str = "disconnect";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtdState {
    Unconnected,
    Connected,
    Disconnected,
}

pub struct RtdProxy {
    id: String,
    kernel: KernelRef,
    state: Mutex<RtdState>,
    value: watch::Sender<Value>,
    last_error: Mutex<Option<ErrorValue>>,
    codec_version: u8,
}

impl RtdProxy {
    pub fn new(kernel: KernelRef, id: String, initial: Value, codec_version: u8) -> Self {
        let (value, _) = watch::channel(initial);
        Self {
            id,
            kernel,
            state: Mutex::new(RtdState::Unconnected),
            value,
            last_error: Mutex::new(None),
            codec_version,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest pushed value.
    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    /// Receiver notified on every pushed value.
    pub fn subscribe(&self) -> watch::Receiver<Value> {
        self.value.subscribe()
    }

    pub fn state(&self) -> RtdState {
        *self.state.lock()
    }

    pub fn last_error(&self) -> Option<ErrorValue> {
        self.last_error.lock().clone()
    }

    pub(crate) fn set_value(&self, value: Value) {
        if self.state() == RtdState::Disconnected {
            return;
        }
        self.last_error.lock().take();
        self.value.send_replace(value);
    }

    pub(crate) fn set_error(&self, error: ErrorValue) {
        if self.state() == RtdState::Disconnected {
            return;
        }
        *self.last_error.lock() = Some(error.clone());
        self.value.send_replace(Value::Error(error));
    }

    /// Ask the kernel to start pushing updates.
    pub async fn connect(&self) -> BridgeResult<()> {
        if self.state() == RtdState::Disconnected {
            return Err(BridgeError::RtdDisconnected(self.id.clone()));
        }
        self.call_method(CONNECT).await?;
        *self.state.lock() = RtdState::Connected;
        debug!(rtd_id = %self.id, "RTD connected");
        Ok(())
    }

    /// Stop receiving updates and release the kernel-side handle.
    ///
    /// Local state is dropped first; a failure of the remote call is
    /// returned but the proxy stays disconnected.
    pub async fn disconnect(&self) -> BridgeResult<()> {
        {
            let mut state = self.state.lock();
            if *state == RtdState::Disconnected {
                return Ok(());
            }
            *state = RtdState::Disconnected;
        }

        let Some(kernel) = self.kernel.upgrade() else {
            return Ok(());
        };
        kernel.rtds().remove(&self.id);
        debug!(rtd_id = %self.id, "RTD disconnected");

        match self.call_method(DISCONNECT).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(rtd_id = %self.id, error = %e, "Remote RTD disconnect failed");
                Err(e)
            }
        }
    }

    async fn call_method(&self, method: &str) -> BridgeResult<Value> {
        let kernel = self.kernel.upgrade().ok_or(BridgeError::KernelDropped)?;
        let expr = CallExpr::RtdMethod {
            id: self.id.clone(),
            method: method.to_string(),
            args: codec::encode_args(&[], self.codec_version)?,
            version: kernel.codec_version(),
        };
        let token = kernel.evaluate(&expr).await?;
        Ok(codec::decode_with_max(&token, kernel.codec_version())?)
    }
}

impl std::fmt::Debug for RtdProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtdProxy")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Live proxies of one Kernel, by id.
#[derive(Default)]
pub struct RtdTable {
    active: DashMap<String, Arc<RtdProxy>>,
}

impl RtdTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, proxy: RtdProxy) -> Arc<RtdProxy> {
        let proxy = Arc::new(proxy);
        self.active.insert(proxy.id.clone(), Arc::clone(&proxy));
        proxy
    }

    pub fn get(&self, id: &str) -> Option<Arc<RtdProxy>> {
        self.active.get(id).map(|p| Arc::clone(p.value()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<RtdProxy>> {
        self.active.remove(id).map(|(_, p)| p)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Drop every proxy, marking each disconnected.
    pub fn clear(&self) {
        let ids: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, proxy)) = self.active.remove(&id) {
                *proxy.state.lock() = RtdState::Disconnected;
            }
        }
    }
}
