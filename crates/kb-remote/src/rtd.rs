//! Kernel-side real-time-data handles.
//!
//! A remote function returns an [`RtdHandle`] instead of a plain value; the
//! dispatcher registers it here while serializing the result, so the handle
//! outlives the call that created it. The client then drives its lifecycle
//! with `connect` / `disconnect` method calls. `disconnect` removes the
//! registry entry, which makes the id permanently dead.

use crate::error::RemoteError;
use crate::session::SessionLink;
use dashmap::DashMap;
use kb_types::envelope::verbs;
use kb_types::{codec, ErrorValue, RtdRef, Value};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub const CONNECT: &str = "connect";
pub const DISCONNECT: &str = "disconnect";

/// Lifecycle callbacks of a handle; both default to doing nothing.
pub trait RtdHooks: Send + Sync {
    fn on_connect(&self, _handle: &Arc<RtdHandle>) -> Result<(), ErrorValue> {
        Ok(())
    }

    fn on_disconnect(&self, _handle: &Arc<RtdHandle>) -> Result<(), ErrorValue> {
        Ok(())
    }
}

struct NoHooks;

impl RtdHooks for NoHooks {}

/// Canonical instance of a live value.
pub struct RtdHandle {
    id: String,
    value: RwLock<Value>,
    link: RwLock<Option<Arc<SessionLink>>>,
    hooks: Box<dyn RtdHooks>,
    connected: AtomicBool,
}

impl RtdHandle {
    pub fn new(value: Value) -> Arc<Self> {
        Self::with_hooks(value, NoHooks)
    }

    pub fn with_hooks(value: Value, hooks: impl RtdHooks + 'static) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            value: RwLock::new(value),
            link: RwLock::new(None),
            hooks: Box::new(hooks),
            connected: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn value(&self) -> Value {
        self.value.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Store a new value and push it to the client, if one is attached.
    ///
    /// Before the handle has been returned to a client it only stores.
    pub fn set_value(&self, value: Value) -> Result<(), RemoteError> {
        *self.value.write() = value.clone();
        self.push(verbs::RTD_SET_VALUE, vec![value])
    }

    /// Push an error state to the client.
    pub fn set_error(&self, error: ErrorValue) -> Result<(), RemoteError> {
        self.push(verbs::RTD_SET_ERROR, vec![Value::Error(error)])
    }

    fn push(&self, verb: &str, args: Vec<Value>) -> Result<(), RemoteError> {
        let Some(link) = self.link.read().clone() else {
            return Ok(());
        };
        if link.client_session().is_none() {
            return Ok(());
        }

        let token = codec::encode_args(&args, link.codec_version())?;
        link.send_message(verb, serde_json::json!({ "id": self.id, "args": token }))
    }

    fn attach(&self, link: Arc<SessionLink>) {
        *self.link.write() = Some(link);
    }

    /// Wire form: id plus current value.
    pub fn to_ref(&self) -> RtdRef {
        RtdRef {
            id: self.id.clone(),
            value: Box::new(self.value()),
        }
    }
}

impl std::fmt::Debug for RtdHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtdHandle")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Registry of handles that have been returned to a client.
pub struct RtdRegistry {
    active: DashMap<String, Arc<RtdHandle>>,
}

impl RtdRegistry {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
        }
    }

    /// Keep `handle` alive under its id and bind it to the client link.
    pub fn register(&self, handle: Arc<RtdHandle>, link: Arc<SessionLink>) -> RtdRef {
        handle.attach(link);
        let wire = handle.to_ref();
        self.active.insert(handle.id.clone(), handle);
        debug!(rtd_id = %wire.id, "Registered RTD handle");
        wire
    }

    pub fn get(&self, id: &str) -> Option<Arc<RtdHandle>> {
        self.active.get(id).map(|h| Arc::clone(h.value()))
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Invoke a lifecycle method on a registered handle.
    ///
    /// `disconnect` removes the entry before the hook runs, so the id is dead
    /// even if the hook fails.
    pub fn call_method(&self, id: &str, method: &str) -> Result<Value, ErrorValue> {
        let found = if method == DISCONNECT {
            self.active.remove(id).map(|(_, h)| h)
        } else {
            self.get(id)
        };
        let handle = found.ok_or_else(|| ErrorValue::new("KeyError", format!("'{id}'")))?;

        match method {
            CONNECT => {
                handle.connected.store(true, Ordering::Release);
                debug!(rtd_id = id, "RTD connected");
                handle.hooks.on_connect(&handle)?;
            }
            DISCONNECT => {
                handle.connected.store(false, Ordering::Release);
                debug!(rtd_id = id, "RTD disconnected");
                handle.hooks.on_disconnect(&handle)?;
            }
            other => {
                return Err(ErrorValue::new(
                    "AttributeError",
                    format!("'RTD' object has no attribute '{other}'"),
                ))
            }
        }
        Ok(Value::Null)
    }
}

impl Default for RtdRegistry {
    fn default() -> Self {
        Self::new()
    }
}
