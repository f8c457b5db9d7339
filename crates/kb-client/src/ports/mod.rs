//! Ports (hexagonal architecture).

pub mod outbound;

pub use outbound::{
    Authenticator, ChannelConnector, ContextTransport, Credentials, DiagnosticSink, Fragment, FrameSink,
    FrameStream, FunctionRegistrar, HeaderMap, LogRegistrar, StdDiagnostics,
};
