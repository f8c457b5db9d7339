//! Domain types for the client: configuration and errors.

pub mod config;
pub mod error;

pub use config::{AuthConfig, BridgeConfig, KernelConfig, ServerConfig};
pub use error::{AuthError, BridgeError, BridgeResult, ConfigError, ManagerError, TransportError};
