//! Error types for the shared wire layer.

/// Codec failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("token is empty")]
    Empty,

    #[error("unsupported codec version {version} (max supported: {max})")]
    UnsupportedVersion { version: u8, max: u8 },

    #[error("json body error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode body error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("expected an argument list, got {0}")]
    NotAList(&'static str),
}

/// Call-expression rendering/parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("literal contains a quote or backslash: {0:?}")]
    UnsafeLiteral(String),

    #[error("unknown callee: {0}")]
    UnknownCallee(String),

    #[error("malformed expression: {0}")]
    Malformed(String),
}
