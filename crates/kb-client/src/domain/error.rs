//! Client error taxonomy.
//!
//! | Error                | Raised by                          | Retried |
//! |----------------------|------------------------------------|---------|
//! | `Transport`          | HTTP / WebSocket failures           | no      |
//! | `Provisioning`       | context creation                   | no      |
//! | `ExecuteRequest`     | remote status != "ok"              | never   |
//! | `Authentication`     | authenticators, registry           | caller  |
//!
//! Auth-shaped transport failures reset the cached credentials before they
//! propagate.

use kb_types::{CodecError, ErrorValue, ExprError};
use std::time::Duration;

/// Request/response or duplex transport failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected response from {url}: {message}")]
    Response { url: String, message: String },

    #[error("invalid address: {0}")]
    Address(String),

    #[error("channel error: {0}")]
    Channel(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("authentication failed: {0}")]
    Failed(String),

    #[error("authenticator '{0}' requires a token")]
    MissingToken(String),

    #[error("unknown authenticator: {0}")]
    UnknownAuthenticator(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("invalid codec version {version} (supported 1..={max})")]
    InvalidCodecVersion { version: u8, max: u8 },
}

/// Errors surfaced by [`crate::Kernel`] and the proxies built on it.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to provision remote context: {0}")]
    Provisioning(String),

    /// The remote side reported a failure. Text is preserved verbatim.
    #[error("{ename}: {evalue}")]
    ExecuteRequest {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },

    #[error(transparent)]
    Authentication(#[from] AuthError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("cannot build call expression: {0}")]
    Expression(#[from] ExprError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection to kernel closed")]
    ConnectionClosed,

    #[error("kernel not started")]
    NotStarted,

    #[error("kernel has been dropped")]
    KernelDropped,

    #[error("RTD '{0}' is disconnected")]
    RtdDisconnected(String),

    #[error("signature mismatch: {0}")]
    Signature(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BridgeError {
    /// Remote failure carrying the remote error value.
    pub fn remote(error: ErrorValue) -> Self {
        BridgeError::ExecuteRequest {
            ename: error.kind,
            evalue: error.message,
            traceback: error.traceback,
        }
    }

    /// The remote error value, for `ExecuteRequest` failures.
    pub fn remote_error(&self) -> Option<ErrorValue> {
        match self {
            BridgeError::ExecuteRequest {
                ename,
                evalue,
                traceback,
            } => Some(ErrorValue::new(ename.clone(), evalue.clone()).with_traceback(traceback.clone())),
            _ => None,
        }
    }
}

/// Aggregated failures of a manager-wide operation, one per unit.
#[derive(Debug, thiserror::Error)]
#[error("{} unit(s) failed: {}", .failures.len(), summarize(.failures))]
pub struct ManagerError {
    pub failures: Vec<(String, BridgeError)>,
}

impl ManagerError {
    pub fn into_result(failures: Vec<(String, BridgeError)>) -> Result<(), ManagerError> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ManagerError { failures })
        }
    }
}

fn summarize(failures: &[(String, BridgeError)]) -> String {
    failures
        .iter()
        .map(|(unit, e)| format!("{unit}: {e}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type BridgeResult<T> = Result<T, BridgeError>;
