//! # Kernel Bridge Remote Half
//!
//! Lives inside the remote kernel. Registers functions, answers
//! `__kb_call_function` / `__kb_call_rtd_method` expressions and pushes
//! real-time-data updates to the client session that declared itself.
//!
//! ## Layout
//!
//! - `session` - link back to the client (session, codec version, sink)
//! - `functions` - registered callables and their descriptors
//! - `rtd` - live handles returned to the client
//! - `bridge` - the dispatcher tying the three together
//! - `kernel` - the `execute_request` front-end

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod bridge;
pub mod error;
pub mod functions;
pub mod kernel;
pub mod rtd;
pub mod session;

pub use bridge::RemoteBridge;
pub use error::RemoteError;
pub use functions::{FunctionSpec, RemoteCallable, Returned};
pub use kernel::{CodeRunner, NoopRunner, RemoteKernel, RunOutput};
pub use rtd::{RtdHandle, RtdHooks, RtdRegistry};
pub use session::{MessageSink, SessionLink};
