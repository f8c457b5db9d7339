//! Inbound dispatch.
//!
//! The receive loop strips the namespace prefix, parses the verb and calls
//! [`MessageHandler::dispatch`]. Unknown verbs are no-ops; a failing handler
//! method is logged by the loop and never ends it.

use crate::domain::{BridgeError, BridgeResult};
use crate::functions::RemoteFunction;
use crate::kernel::KernelRef;
use crate::ports::{DiagnosticSink, FunctionRegistrar};
use kb_types::envelope::verbs;
use kb_types::{codec, Envelope, ErrorValue, FunctionDescriptor, Value};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, trace};

/// Inbound verb, namespace already stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Error,
    Stream,
    RegisterFunction,
    RtdSetValue,
    RtdSetError,
    /// Correlated reply; resolved by the Kernel, not dispatched.
    Reply(String),
    Other(String),
}

impl Verb {
    pub fn parse(verb: &str) -> Self {
        match verb {
            verbs::ERROR => Verb::Error,
            verbs::STREAM => Verb::Stream,
            verbs::REGISTER_FUNCTION => Verb::RegisterFunction,
            verbs::RTD_SET_VALUE => Verb::RtdSetValue,
            verbs::RTD_SET_ERROR => Verb::RtdSetError,
            v if kb_types::envelope::is_reply(v) => Verb::Reply(v.to_string()),
            v => Verb::Other(v.to_string()),
        }
    }
}

/// Per-verb callbacks; every method defaults to a no-op.
pub trait MessageHandler: Send + Sync {
    fn on_error(&self, _message: &Envelope) -> BridgeResult<()> {
        Ok(())
    }

    fn on_stream(&self, _message: &Envelope) -> BridgeResult<()> {
        Ok(())
    }

    fn on_register_function(&self, _message: &Envelope) -> BridgeResult<()> {
        Ok(())
    }

    fn on_rtd_set_value(&self, _message: &Envelope) -> BridgeResult<()> {
        Ok(())
    }

    fn on_rtd_set_error(&self, _message: &Envelope) -> BridgeResult<()> {
        Ok(())
    }

    fn dispatch(&self, verb: &Verb, message: &Envelope) -> BridgeResult<()> {
        match verb {
            Verb::Error => self.on_error(message),
            Verb::Stream => self.on_stream(message),
            Verb::RegisterFunction => self.on_register_function(message),
            Verb::RtdSetValue => self.on_rtd_set_value(message),
            Verb::RtdSetError => self.on_rtd_set_error(message),
            Verb::Reply(_) | Verb::Other(_) => Ok(()),
        }
    }
}

/// Default handler: applies messages to the owning Kernel's state.
///
/// Holds only a [`KernelRef`], so it never keeps the Kernel alive.
pub struct Handler {
    kernel: KernelRef,
    diagnostics: Arc<dyn DiagnosticSink>,
    registrar: Arc<dyn FunctionRegistrar>,
}

impl Handler {
    pub fn new(kernel: KernelRef, diagnostics: Arc<dyn DiagnosticSink>, registrar: Arc<dyn FunctionRegistrar>) -> Self {
        Self {
            kernel,
            diagnostics,
            registrar,
        }
    }
}

impl MessageHandler for Handler {
    fn on_error(&self, message: &Envelope) -> BridgeResult<()> {
        let lines: Vec<String> = message
            .content
            .get("traceback")
            .and_then(|tb| tb.as_array())
            .map(|tb| tb.iter().filter_map(|l| l.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        if !lines.is_empty() {
            self.diagnostics.traceback(&lines);
        }
        Ok(())
    }

    fn on_stream(&self, message: &Envelope) -> BridgeResult<()> {
        let name = message.content.get("name").and_then(|n| n.as_str());
        let text = message.content.get("text").and_then(|t| t.as_str());
        if let (Some(name), Some(text)) = (name, text) {
            if !name.is_empty() && !text.is_empty() {
                self.diagnostics.stream(name, text);
            }
        }
        Ok(())
    }

    fn on_register_function(&self, message: &Envelope) -> BridgeResult<()> {
        let content = product_content(message)?;
        let func = content.get("func").and_then(|f| f.as_str()).unwrap_or_default();
        if func.is_empty() {
            return Err(BridgeError::Malformed(format!(
                "{} received with no function name",
                message.msg_type()
            )));
        }
        let descriptor = FunctionDescriptor::deserialize(&message.content)
            .map_err(|e| BridgeError::Malformed(format!("{}: {e}", message.msg_type())))?;

        let kernel = self.kernel.upgrade().ok_or(BridgeError::KernelDropped)?;
        let function = RemoteFunction::from_descriptor(self.kernel.clone(), descriptor, kernel.codec_version())?;
        let function = kernel.functions().install(function);
        self.registrar.register(&function);
        Ok(())
    }

    fn on_rtd_set_value(&self, message: &Envelope) -> BridgeResult<()> {
        let (id, token) = rtd_payload(message)?;
        let Some(proxy) = self.kernel.upgrade().and_then(|k| k.rtds().get(id)) else {
            trace!(rtd_id = id, "Dropping value for inactive RTD");
            return Ok(());
        };
        let value = codec::decode_args(token)?.into_iter().next().unwrap_or(Value::Null);
        proxy.set_value(value);
        Ok(())
    }

    fn on_rtd_set_error(&self, message: &Envelope) -> BridgeResult<()> {
        let (id, token) = rtd_payload(message)?;
        let Some(proxy) = self.kernel.upgrade().and_then(|k| k.rtds().get(id)) else {
            trace!(rtd_id = id, "Dropping error for inactive RTD");
            return Ok(());
        };
        let error = match codec::decode_args(token)?.into_iter().next() {
            Some(Value::Error(error)) => error,
            Some(other) => ErrorValue::new("Error", format!("{other:?}")),
            None => ErrorValue::new("Error", "unspecified RTD error"),
        };
        debug!(rtd_id = id, error = %error, "RTD error pushed");
        proxy.set_error(error);
        Ok(())
    }
}

fn product_content(message: &Envelope) -> BridgeResult<&serde_json::Map<String, serde_json::Value>> {
    message
        .content
        .as_object()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| BridgeError::Malformed(format!("{} received with no content", message.msg_type())))
}

/// `(id, args-token)` of an RTD push.
fn rtd_payload(message: &Envelope) -> BridgeResult<(&str, &str)> {
    let content = product_content(message)?;
    let id = content
        .get("id")
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| BridgeError::Malformed(format!("{} received with no id", message.msg_type())))?;
    let args = content.get("args").and_then(|a| a.as_str()).unwrap_or_default();
    Ok((id, args))
}
