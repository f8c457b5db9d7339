//! Remote function descriptors.
//!
//! Sent once by the kernel when a function is registered, consumed once by
//! the client to build a proxy with the same declared signature.

use crate::codec::{self, CODEC_VERSION_JSON};
use crate::errors::CodecError;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Host calling-convention flags. The bridge carries them verbatim; their
/// meaning belongs to the host that exposes the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallingConvention {
    pub signature: Option<String>,
    pub category: String,
    pub help_topic: String,
    pub thread_safe: bool,
    #[serde(rename = "macro")]
    pub is_macro: bool,
    pub allow_abort: Option<bool>,
    pub volatile: Option<bool>,
    pub disable_function_wizard_calc: bool,
    pub disable_replace_calc: bool,
    pub auto_resize: bool,
    pub hidden: bool,
}

impl Default for CallingConvention {
    fn default() -> Self {
        Self {
            signature: None,
            category: "KernelBridge".to_string(),
            help_topic: String::new(),
            thread_safe: false,
            is_macro: false,
            allow_abort: None,
            volatile: None,
            disable_function_wizard_calc: false,
            disable_replace_calc: false,
            auto_resize: false,
            hidden: false,
        }
    }
}

/// Description of a remote function's true signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    /// Name of the callable itself.
    pub func: String,
    /// Name it is exported and dispatched under; empty means `func`.
    #[serde(default)]
    pub name: String,
    /// Ordered positional parameter names.
    #[serde(default)]
    pub args: Vec<String>,
    /// Name of the variadic parameter, if the function takes one.
    #[serde(default)]
    pub varargs: Option<String>,
    /// Codec token of the default values list, aligned to the trailing `args`.
    #[serde(default)]
    pub defaults: Option<String>,
    #[serde(default)]
    pub doc: Option<String>,
    /// Highest codec version the registering side can decode.
    #[serde(default = "default_codec_version")]
    pub codec_version: u8,
    #[serde(flatten)]
    pub convention: CallingConvention,
}

fn default_codec_version() -> u8 {
    CODEC_VERSION_JSON
}

impl FunctionDescriptor {
    pub fn exported_name(&self) -> &str {
        if self.name.is_empty() {
            &self.func
        } else {
            &self.name
        }
    }

    /// Decode the default values. No token means no defaults.
    pub fn decode_defaults(&self) -> Result<Vec<Value>, CodecError> {
        match self.defaults.as_deref() {
            Some(token) if !token.is_empty() => codec::decode_args(token),
            _ => Ok(Vec::new()),
        }
    }
}
