//! Versioned codec for argument tuples and results.
//!
//! A token is standard base64 over `[version byte] ++ body`, so it is
//! printable and can be embedded inside a single-quoted expression literal.
//!
//! | Version | Body |
//! |---------|------|
//! | 1 | JSON (`serde_json`) |
//! | 2 | `bincode` |
//!
//! Decoders accept any version up to their own maximum. Encoders are always
//! asked for an explicit version, normally the result of [`negotiate`].

use crate::errors::CodecError;
use crate::value::Value;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub const CODEC_VERSION_JSON: u8 = 1;
pub const CODEC_VERSION_BINCODE: u8 = 2;

/// Highest version this build can encode and decode.
pub const MAX_CODEC_VERSION: u8 = CODEC_VERSION_BINCODE;

/// Pick the version to encode with when the peer declared `peer_max`.
///
/// Never exceeds our own maximum and never drops below version 1.
pub fn negotiate(peer_max: u8) -> u8 {
    peer_max.clamp(CODEC_VERSION_JSON, MAX_CODEC_VERSION)
}

/// Encode a value into a token.
pub fn encode(value: &Value, version: u8) -> Result<String, CodecError> {
    let body = match version {
        CODEC_VERSION_JSON => serde_json::to_vec(value)?,
        CODEC_VERSION_BINCODE => bincode::serialize(value)?,
        other => {
            return Err(CodecError::UnsupportedVersion {
                version: other,
                max: MAX_CODEC_VERSION,
            })
        }
    };

    let mut data = Vec::with_capacity(body.len() + 1);
    data.push(version);
    data.extend_from_slice(&body);
    Ok(STANDARD.encode(data))
}

/// Decode a token produced by any version up to [`MAX_CODEC_VERSION`].
pub fn decode(token: &str) -> Result<Value, CodecError> {
    decode_with_max(token, MAX_CODEC_VERSION)
}

/// Decode with an explicit ceiling, as an older peer would.
pub fn decode_with_max(token: &str, max: u8) -> Result<Value, CodecError> {
    let data = STANDARD.decode(token.trim())?;
    let (&version, body) = data.split_first().ok_or(CodecError::Empty)?;

    if version == 0 || version > max || version > MAX_CODEC_VERSION {
        return Err(CodecError::UnsupportedVersion { version, max });
    }

    match version {
        CODEC_VERSION_JSON => Ok(serde_json::from_slice(body)?),
        _ => Ok(bincode::deserialize(body)?),
    }
}

/// Encode an argument tuple.
pub fn encode_args(args: &[Value], version: u8) -> Result<String, CodecError> {
    encode(&Value::List(args.to_vec()), version)
}

/// Decode an argument tuple. An empty token is the empty tuple.
pub fn decode_args(token: &str) -> Result<Vec<Value>, CodecError> {
    if token.trim().is_empty() {
        return Ok(Vec::new());
    }
    match decode(token)? {
        Value::List(items) => Ok(items),
        other => Err(CodecError::NotAList(other.type_name())),
    }
}
