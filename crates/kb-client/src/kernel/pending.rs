//! Pending reply store: the async-to-sync bridge between `execute` and
//! the receive loop.
//!
//! Flow:
//! 1. `execute` calls `register()` and gets a fresh id plus a oneshot receiver
//! 2. `execute` sends the request stamped with that id
//! 3. The receive loop calls `complete()` with the reply's parent msg_id
//! 4. `execute` awaits the receiver or times out and calls `cancel()`

use crate::domain::BridgeError;
use dashmap::DashMap;
use kb_types::{Envelope, MessageId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub type ReplyResult = Result<Envelope, BridgeError>;

struct PendingReply {
    sender: oneshot::Sender<ReplyResult>,
    created_at: Instant,
    /// Request type (for logging)
    msg_type: String,
}

/// Statistics for the pending store
#[derive(Debug, Default)]
pub struct PendingStats {
    pub total_registered: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_cancelled: AtomicU64,
    /// Replies failed because the connection went away
    pub total_failed: AtomicU64,
    /// Replies that matched nothing
    pub total_unmatched: AtomicU64,
}

pub struct PendingReplies {
    pending: DashMap<String, PendingReply>,
    stats: PendingStats,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            stats: PendingStats::default(),
        }
    }

    /// Allocate a correlation id and a receiver for its reply.
    pub fn register(&self, msg_type: &str) -> (MessageId, oneshot::Receiver<ReplyResult>) {
        let msg_id = MessageId::new();
        let (tx, rx) = oneshot::channel();

        self.pending.insert(
            msg_id.to_string(),
            PendingReply {
                sender: tx,
                created_at: Instant::now(),
                msg_type: msg_type.to_string(),
            },
        );
        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(msg_id = %msg_id, msg_type, "Registered pending reply");

        (msg_id, rx)
    }

    /// Resolve the request `msg_id` with `reply`.
    ///
    /// Unknown ids are logged and dropped.
    pub fn complete(&self, msg_id: &str, reply: Envelope) -> bool {
        let Some((_, pending)) = self.pending.remove(msg_id) else {
            self.stats.total_unmatched.fetch_add(1, Ordering::Relaxed);
            warn!(msg_id, msg_type = reply.msg_type(), "Reply for unknown or expired request");
            return false;
        };

        let elapsed = pending.created_at.elapsed();
        if pending.sender.send(Ok(reply)).is_ok() {
            self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                msg_id,
                msg_type = pending.msg_type,
                response_time_ms = elapsed.as_millis(),
                "Completed pending reply"
            );
            true
        } else {
            // receiver dropped (caller gave up)
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn cancel(&self, msg_id: &MessageId) -> bool {
        if self.pending.remove(&msg_id.to_string()).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Fail every outstanding request with `ConnectionClosed`.
    pub fn fail_all(&self) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.sender.send(Err(BridgeError::ConnectionClosed));
                failed += 1;
            }
        }
        self.stats.total_failed.fetch_add(failed as u64, Ordering::Relaxed);
        failed
    }

    pub fn is_pending(&self, msg_id: &MessageId) -> bool {
        self.pending.contains_key(&msg_id.to_string())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &PendingStats {
        &self.stats
    }
}

impl Default for PendingReplies {
    fn default() -> Self {
        Self::new()
    }
}
