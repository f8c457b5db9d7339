//! Jupyter-compatible message envelope.
//!
//! ## Invariants
//!
//! - Every request `header.msg_id` is unique per sender.
//! - Every reply's `parent_header.msg_id` equals its request's id.
//! - `parent_header.session` tells the receiver which client session a
//!   message belongs to; receivers drop messages for other sessions.

use crate::ids::{MessageId, SessionId};
use crate::{NAMESPACE, PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message type names.
pub mod verbs {
    pub const EXECUTE_REQUEST: &str = "execute_request";
    pub const EXECUTE_REPLY: &str = "execute_reply";
    pub const STREAM: &str = "stream";
    pub const ERROR: &str = "error";
    pub const REGISTER_FUNCTION: &str = "register_function";
    pub const RTD_SET_VALUE: &str = "rtd_set_value";
    pub const RTD_SET_ERROR: &str = "rtd_set_error";

    /// Suffix shared by every correlated reply type.
    pub const REPLY_SUFFIX: &str = "_reply";
}

pub const SHELL_CHANNEL: &str = "shell";
pub const IOPUB_CHANNEL: &str = "iopub";

/// Message header. Empty fields are omitted on the wire, so a push's
/// parent header serializes as just `{"session": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Header {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub msg_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub msg_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl Header {
    pub fn new(msg_id: MessageId, msg_type: &str, session: &str, username: &str) -> Self {
        Self {
            msg_id: msg_id.to_string(),
            msg_type: msg_type.to_string(),
            username: username.to_string(),
            session: session.to_string(),
            date: chrono::Utc::now().to_rfc3339(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Parent header that only addresses a session (unsolicited pushes).
    pub fn for_session(session: &str) -> Self {
        Self {
            session: session.to_string(),
            ..Self::default()
        }
    }
}

/// A complete message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub header: Header,
    #[serde(default)]
    pub parent_header: Header,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Content of an `execute_request`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub silent: bool,
    #[serde(default)]
    pub user_expressions: BTreeMap<String, String>,
}

impl Envelope {
    /// Build a shell-channel `execute_request`.
    ///
    /// The request's parent header is a copy of its own header, so the
    /// session is visible in `parent_header` to whoever echoes it back.
    pub fn execute_request(
        msg_id: MessageId,
        session: &SessionId,
        username: &str,
        request: &ExecuteRequest,
    ) -> Self {
        let header = Header::new(msg_id, verbs::EXECUTE_REQUEST, session.as_str(), username);
        Self {
            channel: Some(SHELL_CHANNEL.to_string()),
            parent_header: header.clone(),
            header,
            metadata: serde_json::Map::new(),
            content: serde_json::to_value(request).unwrap_or_default(),
        }
    }

    /// Build a reply whose parent is `request`'s header.
    pub fn reply(request: &Envelope, msg_type: &str, session: &str, content: serde_json::Value) -> Self {
        Self {
            channel: Some(SHELL_CHANNEL.to_string()),
            header: Header::new(MessageId::new(), msg_type, session, &request.header.username),
            parent_header: request.header.clone(),
            metadata: serde_json::Map::new(),
            content,
        }
    }

    /// Build an unsolicited iopub message addressed to a client session.
    pub fn push(msg_type: &str, sender_session: &str, target_session: &str, content: serde_json::Value) -> Self {
        Self {
            channel: Some(IOPUB_CHANNEL.to_string()),
            header: Header::new(MessageId::new(), msg_type, sender_session, ""),
            parent_header: Header::for_session(target_session),
            metadata: serde_json::Map::new(),
            content,
        }
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// Session the message is addressed to, if any.
    pub fn parent_session(&self) -> Option<&str> {
        let s = self.parent_header.session.as_str();
        (!s.is_empty()).then_some(s)
    }

    /// Correlation id of the request this message replies to, if any.
    pub fn parent_msg_id(&self) -> Option<&str> {
        let s = self.parent_header.msg_id.as_str();
        (!s.is_empty()).then_some(s)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Prefix a product verb with the bridge namespace.
pub fn qualify(verb: &str) -> String {
    format!("{NAMESPACE}.{verb}")
}

/// Strip the namespace prefix from a message type.
///
/// Unprefixed types pass through unchanged; types in a foreign namespace
/// return `None` and must be dropped.
pub fn accept(msg_type: &str) -> Option<&str> {
    match msg_type.split_once('.') {
        Some((ns, verb)) if ns == NAMESPACE => Some(verb),
        Some(_) => None,
        None => Some(msg_type),
    }
}

/// True for correlated reply types (`execute_reply`, ...).
pub fn is_reply(verb: &str) -> bool {
    verb.ends_with(verbs::REPLY_SUFFIX)
}
