//! Link from the kernel back to its client session.
//!
//! Holds the client session the host declared (`__kb_session__ = '...'`),
//! the codec version it can decode, and the sink every outbound message goes
//! through. Without a declared session nothing is pushed.

use crate::error::RemoteError;
use kb_types::envelope::{self, Envelope};
use kb_types::{codec, SessionId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Outbound side of the kernel's connection to the client.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: Envelope) -> Result<(), RemoteError>;
}

pub struct SessionLink {
    /// The kernel's own session, stamped on outbound headers.
    kernel_session: String,
    client_session: RwLock<Option<SessionId>>,
    client_codec_version: AtomicU8,
    sink: RwLock<Option<Arc<dyn MessageSink>>>,
}

impl SessionLink {
    pub fn new(kernel_session: impl Into<String>) -> Self {
        Self {
            kernel_session: kernel_session.into(),
            client_session: RwLock::new(None),
            client_codec_version: AtomicU8::new(codec::CODEC_VERSION_JSON),
            sink: RwLock::new(None),
        }
    }

    pub fn kernel_session(&self) -> &str {
        &self.kernel_session
    }

    pub fn attach_sink(&self, sink: Arc<dyn MessageSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn detach_sink(&self) {
        *self.sink.write() = None;
    }

    pub fn attach_session(&self, session: SessionId) {
        debug!(session = %session, "Client session attached");
        *self.client_session.write() = Some(session);
    }

    pub fn client_session(&self) -> Option<SessionId> {
        self.client_session.read().clone()
    }

    /// Record the highest codec version the client decodes.
    pub fn declare_codec_version(&self, version: u8) {
        self.client_codec_version
            .store(codec::negotiate(version), Ordering::Release);
    }

    /// Version to encode pushes and defaults with.
    pub fn codec_version(&self) -> u8 {
        self.client_codec_version.load(Ordering::Acquire)
    }

    /// Send any envelope through the sink.
    pub fn send(&self, message: Envelope) -> Result<(), RemoteError> {
        let sink = self.sink.read().clone().ok_or(RemoteError::NoSink)?;
        sink.send(message)
    }

    /// Push a namespaced product message to the client session.
    pub fn send_message(&self, verb: &str, content: serde_json::Value) -> Result<(), RemoteError> {
        let session = self.client_session().ok_or(RemoteError::NoSession)?;
        let message = Envelope::push(
            &envelope::qualify(verb),
            &self.kernel_session,
            session.as_str(),
            content,
        );
        self.send(message)
    }
}
