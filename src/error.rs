//! Error types for the puncture protocol.

use thiserror::Error;

/// Codec-level rejections during datagram processing.
///
/// These never cross the public boundary: a datagram that fails to decode
/// is silently discarded by the state machine.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Datagram or buffer is not exactly 64 bytes
    #[error("wrong datagram length")]
    WrongLength,
    /// Byte 0 is not a defined message kind
    #[error("unknown message kind")]
    UnknownKind,
    /// Register role flag is neither connector nor listener
    #[error("invalid role flag")]
    InvalidRole,
    /// Token length is zero, above 32, or would overflow the datagram
    #[error("token length out of range")]
    TokenLength,
}

/// Failures that surface to the caller.
///
/// Everything else in the error taxonomy (protocol discards, server-reported
/// peer-not-found, timeout exhaustion, cancellation) resolves inside the
/// state machine to a `None` result.
#[derive(Error, Debug)]
pub enum PunchError {
    /// Socket bind failure or closure mid-flight
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
}
