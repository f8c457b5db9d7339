//! Execute-request front-end.
//!
//! Plays the kernel's side of the shell channel: applies declarations,
//! hands other code to a [`CodeRunner`], evaluates `user_expressions`
//! through the dispatcher and answers with an `execute_reply`. Output and
//! errors are published on iopub before the reply, in that order.

use crate::bridge::RemoteBridge;
use crate::error::RemoteError;
use kb_types::envelope::{verbs, ExecuteRequest, Header, IOPUB_CHANNEL};
use kb_types::expr::ExpressionResult;
use kb_types::{Declaration, Envelope, ErrorValue, MessageId, SessionId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Captured output of one code fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            stderr: String::new(),
        }
    }
}

/// Executes code that is not a bridge declaration.
pub trait CodeRunner: Send + Sync {
    fn run(&self, bridge: &RemoteBridge, code: &str) -> Result<RunOutput, ErrorValue>;
}

/// Runner for kernels that only serve registered functions.
pub struct NoopRunner;

impl CodeRunner for NoopRunner {
    fn run(&self, _bridge: &RemoteBridge, _code: &str) -> Result<RunOutput, ErrorValue> {
        Ok(RunOutput::default())
    }
}

pub struct RemoteKernel {
    bridge: Arc<RemoteBridge>,
    runner: Box<dyn CodeRunner>,
    execution_count: AtomicU64,
}

impl RemoteKernel {
    pub fn new(bridge: Arc<RemoteBridge>, runner: impl CodeRunner + 'static) -> Self {
        Self {
            bridge,
            runner: Box::new(runner),
            execution_count: AtomicU64::new(0),
        }
    }

    pub fn bridge(&self) -> &Arc<RemoteBridge> {
        &self.bridge
    }

    /// Handle one raw text frame from the client.
    pub fn handle_text(&self, text: &str) -> Result<(), RemoteError> {
        let message = Envelope::from_json(text).map_err(|e| RemoteError::Malformed(e.to_string()))?;
        self.handle(&message)
    }

    /// Handle one decoded message. Anything but `execute_request` is ignored.
    pub fn handle(&self, message: &Envelope) -> Result<(), RemoteError> {
        if message.msg_type() != verbs::EXECUTE_REQUEST {
            debug!(msg_type = message.msg_type(), "Ignoring message");
            return Ok(());
        }

        let request: ExecuteRequest = serde_json::from_value(message.content.clone())
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        let count = self.execution_count.fetch_add(1, Ordering::AcqRel) + 1;

        match self.run_code(&request.code) {
            Ok(output) => {
                self.publish_output(message, &output)?;
                let user_expressions: BTreeMap<String, ExpressionResult> = request
                    .user_expressions
                    .iter()
                    .map(|(key, expr)| (key.clone(), self.bridge.evaluate(expr)))
                    .collect();
                let content = serde_json::json!({
                    "status": "ok",
                    "execution_count": count,
                    "user_expressions": user_expressions,
                });
                self.reply(message, content)
            }
            Err(error) => {
                warn!(ename = %error.kind, evalue = %error.message, "Execution failed");
                let content = serde_json::json!({
                    "ename": error.kind,
                    "evalue": error.message,
                    "traceback": error.traceback,
                });
                self.bridge.link().send(self.iopub(message, verbs::ERROR, content.clone()))?;

                let mut reply = content;
                reply["status"] = "error".into();
                reply["execution_count"] = count.into();
                self.reply(message, reply)
            }
        }
    }

    fn run_code(&self, code: &str) -> Result<RunOutput, ErrorValue> {
        match Declaration::parse(code) {
            Some(Declaration::Session(session)) => {
                self.bridge.attach_session(SessionId::from(session));
                Ok(RunOutput::default())
            }
            Some(Declaration::CodecVersion(version)) => {
                self.bridge.declare_codec_version(version);
                Ok(RunOutput::default())
            }
            None if code.trim().is_empty() => Ok(RunOutput::default()),
            None => self.runner.run(&self.bridge, code),
        }
    }

    fn publish_output(&self, request: &Envelope, output: &RunOutput) -> Result<(), RemoteError> {
        for (name, text) in [("stdout", &output.stdout), ("stderr", &output.stderr)] {
            if text.is_empty() {
                continue;
            }
            let content = serde_json::json!({ "name": name, "text": text });
            self.bridge.link().send(self.iopub(request, verbs::STREAM, content))?;
        }
        Ok(())
    }

    fn iopub(&self, request: &Envelope, msg_type: &str, content: serde_json::Value) -> Envelope {
        let link = self.bridge.link();
        Envelope {
            channel: Some(IOPUB_CHANNEL.to_string()),
            header: Header::new(MessageId::new(), msg_type, link.kernel_session(), &request.header.username),
            parent_header: request.header.clone(),
            metadata: serde_json::Map::new(),
            content,
        }
    }

    fn reply(&self, request: &Envelope, content: serde_json::Value) -> Result<(), RemoteError> {
        let link = self.bridge.link();
        link.send(Envelope::reply(request, verbs::EXECUTE_REPLY, link.kernel_session(), content))
    }
}
