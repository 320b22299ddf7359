//! Typed error kinds for the wire codec and gateway.
//!
//! Frame- and record-level errors are handled locally by callers (logged and
//! dropped); only lifecycle errors are expected to propagate out of this
//! crate into the supervisor.

use thiserror::Error;

/// Errors arising from decoding or encoding a [`crate::wire::Message`] or one
/// of its commands.
#[derive(Debug, Error)]
pub enum WireError {
    /// The declared frame/TLV length exceeds the available buffer, or header
    /// tokenization ran out of bytes before consuming the fixed-length
    /// header.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A command TLV's `len` byte walks past the end of the payload.
    #[error("malformed command: {0}")]
    MalformedCommand(String),
}

/// Errors arising from the TCP/UDP gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Binding a listener socket failed — fatal at startup.
    #[error("failed to bind {addr}: {source}")]
    BindFailure {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the connection or a read returned fewer bytes than
    /// requested; the connection is closed cleanly, not an error surfaced
    /// to callers.
    #[error("peer closed connection")]
    PeerClosed,
}
