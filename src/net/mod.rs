//! TCP transport: accept loop, per-client handling and the wire codec

pub mod acceptor;
pub mod codec;
pub mod handler;
pub mod protocol;
