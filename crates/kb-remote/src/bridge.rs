//! # Remote Dispatcher
//!
//! Owns the function and RTD registries and the link back to the client.
//! The execute front-end feeds it parsed call expressions; each call decodes
//! its argument token, invokes the target and answers with a result token
//! encoded at the version the caller declared it can read.
//!
//! ## Failure Mapping
//!
//! | Failure                 | Reported kind      |
//! |-------------------------|--------------------|
//! | unknown function / id   | `KeyError`         |
//! | unknown RTD method      | `AttributeError`   |
//! | undecodable token       | `DecodeError`      |
//! | unparsable expression   | `SyntaxError`      |
//! | callable panicked       | `Panic`            |

use crate::error::{decode_failure, syntax_failure, RemoteError};
use crate::functions::{FunctionRegistry, FunctionSpec, RemoteCallable, Returned};
use crate::rtd::{RtdHandle, RtdRegistry};
use crate::session::{MessageSink, SessionLink};
use kb_types::expr::ExpressionResult;
use kb_types::{codec, CallExpr, ErrorValue, SessionId, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RemoteBridge {
    link: Arc<SessionLink>,
    functions: FunctionRegistry,
    rtds: RtdRegistry,
}

impl RemoteBridge {
    pub fn new(kernel_session: impl Into<String>) -> Self {
        Self {
            link: Arc::new(SessionLink::new(kernel_session)),
            functions: FunctionRegistry::new(),
            rtds: RtdRegistry::new(),
        }
    }

    pub fn link(&self) -> &Arc<SessionLink> {
        &self.link
    }

    pub fn attach_sink(&self, sink: Arc<dyn MessageSink>) {
        self.link.attach_sink(sink);
    }

    pub fn attach_session(&self, session: SessionId) {
        self.link.attach_session(session);
    }

    pub fn declare_codec_version(&self, version: u8) {
        self.link.declare_codec_version(version);
    }

    /// Register a callable and expose it to the attached client, if any.
    pub fn register_function<F, R>(&self, spec: FunctionSpec, f: F) -> Result<bool, RemoteError>
    where
        F: Fn(Vec<Value>) -> Result<R, ErrorValue> + Send + Sync + 'static,
        R: Into<Returned>,
    {
        let callable: RemoteCallable = Arc::new(move |args| f(args).map(Into::into));
        self.functions.register(spec, callable, &self.link)
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions.names()
    }

    pub fn rtd(&self, id: &str) -> Option<Arc<RtdHandle>> {
        self.rtds.get(id)
    }

    pub fn active_rtds(&self) -> usize {
        self.rtds.len()
    }

    /// Invoke a registered function with an encoded argument tuple.
    ///
    /// Returns the encoded result token.
    pub fn call_function(&self, name: &str, args: &str, version: u8) -> Result<String, ErrorValue> {
        let callable = self
            .functions
            .callable(name)
            .ok_or_else(|| ErrorValue::new("KeyError", format!("'{name}'")))?;
        let args = codec::decode_args(args).map_err(|e| decode_failure(&e))?;

        debug!(function = name, argc = args.len(), "Calling remote function");
        let returned = catch_unwind(AssertUnwindSafe(|| callable(args))).map_err(|_| {
            warn!(function = name, "Remote function panicked");
            ErrorValue::new("Panic", format!("function '{name}' panicked"))
        })??;

        let value = match returned {
            Returned::Value(v) => v,
            Returned::Rtd(handle) => Value::Rtd(self.rtds.register(handle, Arc::clone(&self.link))),
        };
        self.encode_result(&value, version)
    }

    /// Invoke a lifecycle method on a live RTD handle.
    pub fn call_rtd_method(&self, id: &str, method: &str, args: &str, version: u8) -> Result<String, ErrorValue> {
        // lifecycle methods take no arguments but the token must still be valid
        codec::decode_args(args).map_err(|e| decode_failure(&e))?;
        let value = self.rtds.call_method(id, method)?;
        self.encode_result(&value, version)
    }

    /// Evaluate one `user_expressions` entry.
    pub fn evaluate(&self, expr: &str) -> ExpressionResult {
        let outcome = CallExpr::parse(expr)
            .map_err(|e| syntax_failure(&e))
            .and_then(|call| match call {
                CallExpr::Function { name, args, version } => self.call_function(&name, &args, version),
                CallExpr::RtdMethod {
                    id,
                    method,
                    args,
                    version,
                } => self.call_rtd_method(&id, &method, &args, version),
            });

        match outcome {
            Ok(token) => ExpressionResult::ok_token(&token),
            Err(error) => ExpressionResult::error(&error),
        }
    }

    fn encode_result(&self, value: &Value, version: u8) -> Result<String, ErrorValue> {
        codec::encode(value, codec::negotiate(version))
            .map_err(|e| ErrorValue::new("EncodeError", e.to_string()))
    }
}
