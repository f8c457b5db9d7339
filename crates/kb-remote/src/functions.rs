//! Kernel-side function registry.

use crate::error::RemoteError;
use crate::rtd::RtdHandle;
use crate::session::SessionLink;
use dashmap::DashMap;
use kb_types::descriptor::{CallingConvention, FunctionDescriptor};
use kb_types::envelope::verbs;
use kb_types::{codec, ErrorValue, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// What a remote function hands back: a plain value or a live RTD handle.
pub enum Returned {
    Value(Value),
    Rtd(Arc<RtdHandle>),
}

impl From<Value> for Returned {
    fn from(value: Value) -> Self {
        Returned::Value(value)
    }
}

impl From<Arc<RtdHandle>> for Returned {
    fn from(handle: Arc<RtdHandle>) -> Self {
        Returned::Rtd(handle)
    }
}

/// A callable exposed to the client. Receives positional arguments only.
pub type RemoteCallable = Arc<dyn Fn(Vec<Value>) -> Result<Returned, ErrorValue> + Send + Sync>;

/// Declared signature of a function being registered.
#[derive(Debug, Clone, Default)]
pub struct FunctionSpec {
    pub func: String,
    /// Exported name; defaults to `func`.
    pub name: Option<String>,
    pub args: Vec<String>,
    pub varargs: Option<String>,
    /// Default values for the trailing `args`.
    pub defaults: Vec<Value>,
    pub doc: Option<String>,
    pub convention: CallingConvention,
}

impl FunctionSpec {
    pub fn new(func: impl Into<String>, args: &[&str]) -> Self {
        Self {
            func: func.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_defaults(mut self, defaults: Vec<Value>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_varargs(mut self, name: impl Into<String>) -> Self {
        self.varargs = Some(name.into());
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn exported_as(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn exported_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.func)
    }

    fn descriptor(&self, codec_version: u8) -> Result<FunctionDescriptor, RemoteError> {
        let defaults = if self.defaults.is_empty() {
            None
        } else {
            Some(codec::encode_args(&self.defaults, codec_version)?)
        };
        Ok(FunctionDescriptor {
            func: self.func.clone(),
            name: self.exported_name().to_string(),
            args: self.args.clone(),
            varargs: self.varargs.clone(),
            defaults,
            doc: self.doc.clone(),
            codec_version: codec::MAX_CODEC_VERSION,
            convention: self.convention.clone(),
        })
    }
}

struct Registered {
    descriptor: FunctionDescriptor,
    callable: RemoteCallable,
}

/// `name → callable` table consulted by the dispatcher.
pub struct FunctionRegistry {
    functions: DashMap<String, Registered>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: DashMap::new(),
        }
    }

    /// Store a function and, if a client session is attached, send it the
    /// descriptor. Returns whether the function was exposed to a client.
    pub fn register(
        &self,
        spec: FunctionSpec,
        callable: RemoteCallable,
        link: &SessionLink,
    ) -> Result<bool, RemoteError> {
        let descriptor = spec.descriptor(link.codec_version())?;
        let name = descriptor.exported_name().to_string();
        let exposed = link.client_session().is_some();

        self.functions.insert(
            name.clone(),
            Registered {
                descriptor: descriptor.clone(),
                callable,
            },
        );

        if exposed {
            let content = serde_json::to_value(&descriptor)
                .map_err(|e| RemoteError::Malformed(e.to_string()))?;
            link.send_message(verbs::REGISTER_FUNCTION, content)?;
            info!(function = %name, "Registered and exposed remote function");
        } else {
            debug!(function = %name, "Registered function without a client session");
        }
        Ok(exposed)
    }

    pub fn descriptor(&self, name: &str) -> Option<FunctionDescriptor> {
        self.functions.get(name).map(|r| r.descriptor.clone())
    }

    pub fn callable(&self, name: &str) -> Option<RemoteCallable> {
        self.functions.get(name).map(|r| Arc::clone(&r.callable))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
