//! Peer role selection.

use crate::packet::{ROLE_CONNECTOR, ROLE_LISTENER};

/// Role a session plays in the rendezvous exchange.
///
/// Chosen at invocation time and immutable for the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerRole {
    /// Initiates a connection toward a registered listener
    Connector,
    /// Accepts punches indefinitely
    Listener,
    /// Accepts punches and terminates after the first success
    ListenerSingle,
}

impl PeerRole {
    /// Wire role flag carried in the Register datagram.
    pub fn register_flag(self) -> u8 {
        match self {
            Self::Connector => ROLE_CONNECTOR,
            Self::Listener | Self::ListenerSingle => ROLE_LISTENER,
        }
    }

    /// True for either listener variant.
    pub fn is_listener(self) -> bool {
        !matches!(self, Self::Connector)
    }
}
