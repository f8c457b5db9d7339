//! Receive loop of one Kernel connection.
//!
//! Reads frames until the channel closes, routes correlated replies to the
//! pending store and everything else to the handler. Holds no strong
//! reference to the Kernel; when the loop ends every outstanding request is
//! failed with `ConnectionClosed`.

use super::pending::PendingReplies;
use crate::domain::{BridgeError, BridgeResult};
use crate::handler::{MessageHandler, Verb};
use crate::ports::FrameStream;
use kb_types::{envelope, Envelope, SessionId};
use std::sync::Arc;
use tracing::{error, info, trace, warn};

pub(crate) async fn run(
    mut stream: Box<dyn FrameStream>,
    session: SessionId,
    pending: Arc<PendingReplies>,
    handler: Arc<dyn MessageHandler>,
) {
    while let Some(frame) = stream.next_frame().await {
        match frame {
            Ok(text) => {
                if let Err(e) = process(&text, session.as_str(), &pending, handler.as_ref()) {
                    error!(session = %session, error = %e, "Failed to handle inbound message");
                }
            }
            Err(e) => {
                warn!(session = %session, error = %e, "Channel read failed");
                break;
            }
        }
    }

    let failed = pending.fail_all();
    info!(session = %session, failed, "Receive loop stopped");
}

/// Route one inbound frame.
///
/// Messages addressed to another session, or carrying a foreign namespace,
/// are dropped.
pub(crate) fn process(
    text: &str,
    session: &str,
    pending: &PendingReplies,
    handler: &dyn MessageHandler,
) -> BridgeResult<()> {
    let message = Envelope::from_json(text).map_err(|e| BridgeError::Malformed(e.to_string()))?;

    if message.parent_session() != Some(session) {
        trace!(msg_type = message.msg_type(), "Dropping message for another session");
        return Ok(());
    }
    let Some(verb) = envelope::accept(message.msg_type()) else {
        trace!(msg_type = message.msg_type(), "Dropping message in foreign namespace");
        return Ok(());
    };
    let verb = Verb::parse(verb);

    if let Verb::Reply(_) = verb {
        if let Some(msg_id) = message.parent_msg_id().map(str::to_string) {
            pending.complete(&msg_id, message);
        }
        return Ok(());
    }
    handler.dispatch(&verb, &message)
}
