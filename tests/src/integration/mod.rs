//! Client <-> server flows over real sockets.

mod lifecycle;
