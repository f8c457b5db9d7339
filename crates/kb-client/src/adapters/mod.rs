//! Adapters implementing the outbound ports.
//!
//! - `auth` - built-in authenticators and the kind registry
//! - `http` - reqwest notebook-server transport
//! - `websocket` - tokio-tungstenite duplex channel
//! - `memory` - in-memory transport and channel (tests)

pub mod auth;
pub mod http;
#[cfg(test)]
pub mod memory;
pub mod websocket;

pub use auth::{AuthenticatorRegistry, CredentialCache, NoAuthAuthenticator, TokenAuthenticator};
pub use http::HttpTransport;
pub use websocket::WebSocketConnector;
