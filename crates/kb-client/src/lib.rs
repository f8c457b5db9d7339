//! # Kernel Bridge Client
//!
//! Host half of the bridge. Provisions remote execution contexts on a
//! notebook server, talks to them over a duplex channel, and exposes the
//! functions they register as local proxies.
//!
//! ## Architecture
//!
//! ```text
//! KernelManager ──get(key)──→ Kernel ──execute──→ FrameSink ─────→ remote
//!                               ▲                                    │
//!                               │ PendingReplies.complete            │
//!                               │                                    ▼
//!          Handler ←─dispatch── receive loop ←──── FrameStream ←─────┘
//!             │
//!             ├─ register_function → FunctionTable (RemoteFunction)
//!             ├─ rtd_set_value / rtd_set_error → RtdTable (RtdProxy)
//!             └─ stream / error → DiagnosticSink
//! ```
//!
//! Network access goes through the ports in [`ports`]; [`adapters`] holds
//! the reqwest / tokio-tungstenite implementations and the authenticators.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod domain;
pub mod functions;
pub mod handler;
pub mod kernel;
pub mod manager;
pub mod ports;
pub mod rtd;

#[cfg(test)]
mod testing;

pub use domain::{
    AuthConfig, AuthError, BridgeConfig, BridgeError, BridgeResult, ConfigError, KernelConfig, ManagerError,
    ServerConfig, TransportError,
};
pub use functions::{CallResult, FunctionTable, RemoteFunction, Signature};
pub use handler::{Handler, MessageHandler, Verb};
pub use kernel::{channel_url, Kernel, KernelPorts, KernelRef};
pub use manager::{KernelFactory, KernelManager, NetworkFactory};
pub use rtd::{RtdProxy, RtdState, RtdTable};
