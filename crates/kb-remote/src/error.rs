//! Remote-side errors.

use kb_types::{CodecError, ErrorValue, ExprError};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// No client session has been declared yet.
    #[error("no client session attached")]
    NoSession,

    /// No outbound sink is attached.
    #[error("no message sink attached")]
    NoSink,

    #[error("failed to send message: {0}")]
    Send(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("malformed request: {0}")]
    Malformed(String),
}

/// Error payload reported when an argument token cannot be decoded.
pub(crate) fn decode_failure(e: &CodecError) -> ErrorValue {
    ErrorValue::new("DecodeError", e.to_string())
}

/// Error payload reported for an expression the dispatcher cannot parse.
pub(crate) fn syntax_failure(e: &ExprError) -> ErrorValue {
    ErrorValue::new("SyntaxError", e.to_string())
}
