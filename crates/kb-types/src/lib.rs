//! # Kernel Bridge Shared Types
//!
//! Everything both halves of the bridge must agree on byte-for-byte.
//!
//! ## Contents
//!
//! - `value` - the marshalable [`Value`] universe (incl. error payloads and
//!   RTD references)
//! - `codec` - versioned, printable-text tokens for argument tuples and results
//! - `ids` - session tokens and correlation ids
//! - `envelope` - the Jupyter-compatible message envelope and namespace rules
//! - `descriptor` - remote function descriptors
//! - `expr` - the call-expression grammar embedded in `user_expressions`
//!
//! ## Wire Flow
//!
//! ```text
//! host                                kernel
//!  │  execute_request{user_expressions:  │
//!  │    __kb_call_function('f','<tok>')} │
//!  │ ──────────────────────────────────→ │
//!  │                                     │  decode(tok) → call f → encode(result)
//!  │  execute_reply{result: '<tok>'}     │
//!  │ ←────────────────────────────────── │
//!  │  kb.rtd_set_value{id, args}         │
//!  │ ←────────────────────────────────── │  (unsolicited push)
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod codec;
pub mod descriptor;
pub mod envelope;
pub mod errors;
pub mod expr;
pub mod ids;
pub mod value;

pub use codec::{decode, decode_args, encode, encode_args, negotiate, MAX_CODEC_VERSION};
pub use descriptor::{CallingConvention, FunctionDescriptor};
pub use envelope::{Envelope, Header};
pub use errors::{CodecError, ExprError};
pub use expr::{CallExpr, Declaration};
pub use ids::{MessageId, SessionId};
pub use value::{ErrorValue, RtdRef, Value};

/// Jupyter messaging protocol version stamped on every header.
pub const PROTOCOL_VERSION: &str = "5.0";

/// Namespace prefix of product verbs (`kb.register_function`, ...).
pub const NAMESPACE: &str = "kb";
