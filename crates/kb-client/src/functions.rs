//! Host-side proxies for remote functions.
//!
//! A [`RemoteFunction`] is built from the descriptor the kernel sends on
//! registration. It reproduces the declared signature, binds host arguments
//! against it, and forwards the call as a dispatcher expression.

use crate::domain::{BridgeError, BridgeResult};
use crate::kernel::KernelRef;
use crate::rtd::RtdProxy;
use dashmap::DashMap;
use kb_types::{codec, CallExpr, FunctionDescriptor, Value};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

/// Declared parameter list of a remote function.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<String>,
    pub varargs: Option<String>,
    /// Defaults for the trailing `params`.
    pub defaults: Vec<Value>,
}

impl Signature {
    pub fn from_descriptor(descriptor: &FunctionDescriptor) -> BridgeResult<Self> {
        let defaults = descriptor.decode_defaults()?;
        if defaults.len() > descriptor.args.len() {
            return Err(BridgeError::Signature(format!(
                "{}: {} defaults for {} parameters",
                descriptor.func,
                defaults.len(),
                descriptor.args.len()
            )));
        }
        Ok(Self {
            params: descriptor.args.clone(),
            varargs: descriptor.varargs.clone(),
            defaults,
        })
    }

    /// Number of parameters without a default.
    pub fn required(&self) -> usize {
        self.params.len() - self.defaults.len()
    }

    pub fn default_for(&self, param: &str) -> Option<&Value> {
        let index = self.params.iter().position(|p| p == param)?;
        index.checked_sub(self.required()).and_then(|i| self.defaults.get(i))
    }

    /// Complete `args` into the full positional tuple.
    ///
    /// Missing trailing parameters take their defaults; extra arguments are
    /// only accepted by variadic functions.
    pub fn bind(&self, mut args: Vec<Value>) -> BridgeResult<Vec<Value>> {
        if args.len() > self.params.len() && self.varargs.is_none() {
            return Err(BridgeError::Signature(format!(
                "takes {} positional arguments but {} were given",
                self.params.len(),
                args.len()
            )));
        }
        if args.len() < self.required() {
            return Err(BridgeError::Signature(format!(
                "missing required argument '{}'",
                self.params[args.len()]
            )));
        }

        let required = self.required();
        for index in args.len()..self.params.len() {
            args.push(self.defaults[index - required].clone());
        }
        Ok(args)
    }
}

/// Result of a remote call: a value, or a live RTD proxy.
#[derive(Debug, Clone)]
pub enum CallResult {
    Value(Value),
    Rtd(Arc<RtdProxy>),
}

impl CallResult {
    pub fn into_value(self) -> Option<Value> {
        match self {
            CallResult::Value(v) => Some(v),
            CallResult::Rtd(_) => None,
        }
    }
}

pub struct RemoteFunction {
    descriptor: FunctionDescriptor,
    signature: Signature,
    kernel: KernelRef,
    /// Version used to encode outbound argument tuples.
    codec_version: u8,
}

impl RemoteFunction {
    /// Build a proxy; the argument codec is the newest both sides decode.
    pub fn from_descriptor(kernel: KernelRef, descriptor: FunctionDescriptor, client_version: u8) -> BridgeResult<Self> {
        let signature = Signature::from_descriptor(&descriptor)?;
        let codec_version = codec::negotiate(descriptor.codec_version.min(client_version));
        Ok(Self {
            descriptor,
            signature,
            kernel,
            codec_version,
        })
    }

    /// Name the function is exported under.
    pub fn name(&self) -> &str {
        self.descriptor.exported_name()
    }

    pub fn func(&self) -> &str {
        &self.descriptor.func
    }

    pub fn doc(&self) -> Option<&str> {
        self.descriptor.doc.as_deref()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    pub fn codec_version(&self) -> u8 {
        self.codec_version
    }

    /// Call the remote function.
    ///
    /// A remote failure comes back as `BridgeError::ExecuteRequest` with the
    /// remote type and message intact.
    pub async fn call(&self, args: Vec<Value>) -> BridgeResult<CallResult> {
        let kernel = self.kernel.upgrade().ok_or(BridgeError::KernelDropped)?;
        let args = self.signature.bind(args)?;
        let token = codec::encode_args(&args, self.codec_version)?;

        let expr = CallExpr::Function {
            name: self.name().to_string(),
            args: token,
            version: kernel.codec_version(),
        };
        debug!(function = self.name(), argc = args.len(), "Calling remote function");
        let result = kernel.evaluate(&expr).await?;

        match codec::decode_with_max(&result, kernel.codec_version())? {
            Value::Rtd(rtd) => {
                let proxy = RtdProxy::new(kernel.downgrade(), rtd.id, *rtd.value, self.codec_version);
                Ok(CallResult::Rtd(kernel.rtds().insert(proxy)))
            }
            value => Ok(CallResult::Value(value)),
        }
    }

    /// Call from a synchronous host thread.
    ///
    /// Must not be called from inside the runtime that `handle` drives.
    pub fn call_blocking(self: &Arc<Self>, handle: &Handle, args: Vec<Value>) -> BridgeResult<CallResult> {
        let (tx, rx) = oneshot::channel();
        let function = Arc::clone(self);
        handle.spawn(async move {
            let _ = tx.send(function.call(args).await);
        });
        rx.blocking_recv().map_err(|_| BridgeError::ConnectionClosed)?
    }
}

impl std::fmt::Debug for RemoteFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("name", &self.name())
            .field("signature", &self.signature)
            .field("codec_version", &self.codec_version)
            .finish()
    }
}

/// Proxies installed on one Kernel, by exported name.
#[derive(Default)]
pub struct FunctionTable {
    functions: DashMap<String, Arc<RemoteFunction>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a proxy, replacing any previous one of the same name.
    pub fn install(&self, function: RemoteFunction) -> Arc<RemoteFunction> {
        let function = Arc::new(function);
        self.functions.insert(function.name().to_string(), Arc::clone(&function));
        function
    }

    pub fn get(&self, name: &str) -> Option<Arc<RemoteFunction>> {
        self.functions.get(name).map(|f| Arc::clone(f.value()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn clear(&self) {
        self.functions.clear();
    }
}
