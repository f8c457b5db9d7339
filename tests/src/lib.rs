//! # Kernel Bridge Test Suite
//!
//! End-to-end tests that drive the real HTTP and WebSocket adapters against
//! an in-process notebook server hosting `kb-remote` kernels.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── mock_server.rs    # axum stand-in for the notebook server
//! ├── script.rs         # tiny code runner executed by the mock kernels
//! └── integration/      # client <-> server flows
//!     ├── lifecycle.rs  # provisioning, auth, units, shutdown
//!     └── calls.rs      # function calls, errors, timeouts, RTDs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p kb-tests
//! cargo test -p kb-tests integration::calls
//! ```

pub mod integration;
pub mod mock_server;

pub use mock_server::{ChannelRecord, MockServer, MockServerBuilder, XSRF_TOKEN};
pub use script::ScriptRunner;
