//! Call-expression grammar.
//!
//! The client never ships code to call a remote function; it ships a single
//! expression in `user_expressions` that the kernel-side dispatcher
//! understands:
//!
//! ```text
//! __kb_call_function('<name>', '<args-token>', version=<n>)
//! __kb_call_rtd_method('<id>', '<method>', '<args-token>', version=<n>)
//! ```
//!
//! `version` is the highest codec version the caller can decode; the kernel
//! answers with a token no newer than that. Literals are single-quoted with no
//! escapes, so names, ids and tokens containing `'` or `\` are rejected.

use crate::codec::CODEC_VERSION_JSON;
use crate::errors::ExprError;
use crate::value::ErrorValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const FUNCTION_CALLEE: &str = "__kb_call_function";
pub const RTD_METHOD_CALLEE: &str = "__kb_call_rtd_method";
pub const SESSION_VARIABLE: &str = "__kb_session__";
pub const CODEC_VERSION_VARIABLE: &str = "__kb_codec_version__";

/// Mime type the dispatcher's result token is reported under.
pub const TEXT_PLAIN: &str = "text/plain";

/// A parsed dispatcher call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallExpr {
    Function {
        name: String,
        args: String,
        version: u8,
    },
    RtdMethod {
        id: String,
        method: String,
        args: String,
        version: u8,
    },
}

impl CallExpr {
    pub fn render(&self) -> Result<String, ExprError> {
        match self {
            CallExpr::Function { name, args, version } => Ok(format!(
                "{FUNCTION_CALLEE}({}, {}, version={version})",
                literal(name)?,
                literal(args)?
            )),
            CallExpr::RtdMethod {
                id,
                method,
                args,
                version,
            } => Ok(format!(
                "{RTD_METHOD_CALLEE}({}, {}, {}, version={version})",
                literal(id)?,
                literal(method)?,
                literal(args)?
            )),
        }
    }

    pub fn parse(expr: &str) -> Result<Self, ExprError> {
        let expr = expr.trim();
        let malformed = || ExprError::Malformed(expr.to_string());

        let open = expr.find('(').ok_or_else(malformed)?;
        let inner = expr[open + 1..].strip_suffix(')').ok_or_else(malformed)?;
        let callee = expr[..open].trim();
        let (mut positional, version) = parse_arguments(inner).ok_or_else(malformed)?;
        let version = version.unwrap_or(CODEC_VERSION_JSON);

        match callee {
            FUNCTION_CALLEE => {
                if positional.len() != 2 {
                    return Err(malformed());
                }
                let args = positional.pop().unwrap_or_default();
                let name = positional.pop().unwrap_or_default();
                Ok(CallExpr::Function { name, args, version })
            }
            RTD_METHOD_CALLEE => {
                if !(2..=3).contains(&positional.len()) {
                    return Err(malformed());
                }
                let mut it = positional.into_iter();
                let id = it.next().unwrap_or_default();
                let method = it.next().unwrap_or_default();
                let args = it.next().unwrap_or_default();
                Ok(CallExpr::RtdMethod {
                    id,
                    method,
                    args,
                    version,
                })
            }
            other => Err(ExprError::UnknownCallee(other.to_string())),
        }
    }
}

fn literal(s: &str) -> Result<String, ExprError> {
    if s.contains('\'') || s.contains('\\') {
        return Err(ExprError::UnsafeLiteral(s.to_string()));
    }
    Ok(format!("'{s}'"))
}

/// Split `'a', 'b', version=2` into quoted literals and the version keyword.
fn parse_arguments(s: &str) -> Option<(Vec<String>, Option<u8>)> {
    let mut positional = Vec::new();
    let mut version = None;
    let mut rest = s.trim();

    while !rest.is_empty() {
        if let Some(after_quote) = rest.strip_prefix('\'') {
            let end = after_quote.find('\'')?;
            positional.push(after_quote[..end].to_string());
            rest = after_quote[end + 1..].trim_start();
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let (key, value) = rest[..end].split_once('=')?;
            if key.trim() != "version" {
                return None;
            }
            version = Some(value.trim().parse().ok()?);
            rest = rest[end..].trim_start();
        }

        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma.trim_start();
        } else if !rest.is_empty() {
            return None;
        }
    }

    Some((positional, version))
}

/// Statements the client runs before a unit's fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Session(String),
    CodecVersion(u8),
}

impl Declaration {
    pub fn render(&self) -> Result<String, ExprError> {
        match self {
            Declaration::Session(session) => Ok(format!("{SESSION_VARIABLE} = {}", literal(session)?)),
            Declaration::CodecVersion(v) => Ok(format!("{CODEC_VERSION_VARIABLE} = {v}")),
        }
    }

    /// Recognise a declaration; any other code returns `None`.
    pub fn parse(code: &str) -> Option<Self> {
        let (lhs, rhs) = code.trim().split_once('=')?;
        let rhs = rhs.trim();
        match lhs.trim() {
            SESSION_VARIABLE => {
                let inner = rhs.strip_prefix('\'')?.strip_suffix('\'')?;
                Some(Declaration::Session(inner.to_string()))
            }
            CODEC_VERSION_VARIABLE => rhs.parse().ok().map(Declaration::CodecVersion),
            _ => None,
        }
    }
}

/// One entry of an `execute_reply`'s `user_expressions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionResult {
    pub status: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evalue: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traceback: Vec<String>,
}

impl ExpressionResult {
    /// Successful result whose `text/plain` is the quoted token.
    pub fn ok_token(token: &str) -> Self {
        let mut data = BTreeMap::new();
        data.insert(TEXT_PLAIN.to_string(), serde_json::Value::String(format!("'{token}'")));
        Self {
            status: "ok".to_string(),
            data,
            ..Self::default()
        }
    }

    pub fn error(error: &ErrorValue) -> Self {
        Self {
            status: "error".to_string(),
            data: BTreeMap::new(),
            ename: Some(error.kind.clone()),
            evalue: Some(error.message.clone()),
            traceback: error.traceback.clone(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// The token inside `text/plain`, with repr quotes removed.
    pub fn token(&self) -> Option<&str> {
        let text = self.data.get(TEXT_PLAIN)?.as_str()?.trim();
        Some(
            text.strip_prefix('\'')
                .and_then(|t| t.strip_suffix('\''))
                .unwrap_or(text),
        )
    }

    pub fn to_error_value(&self) -> ErrorValue {
        ErrorValue {
            kind: self.ename.clone().unwrap_or_else(|| "Error".to_string()),
            message: self.evalue.clone().unwrap_or_default(),
            traceback: self.traceback.clone(),
        }
    }
}
