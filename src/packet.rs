//! Datagram format and serialization.

use std::net::Ipv4Addr;

use crate::error::ProtocolError;
use crate::token::{Token, MAX_TOKEN_LEN};

/// Fixed datagram size in bytes. Anything else on the wire is noise.
pub const DATAGRAM_LEN: usize = 64;

/// Register kind (client → server).
pub const KIND_REGISTER: u8 = 0x01;
/// ConnectTo kind (server → client).
pub const KIND_CONNECT_TO: u8 = 0x02;
/// Punch kind (peer ↔ peer).
pub const KIND_PUNCH: u8 = 0x03;
/// PunchSuccess kind (listener → connector).
pub const KIND_PUNCH_SUCCESS: u8 = 0x04;
/// Error kind (server → client).
pub const KIND_ERROR: u8 = 0x05;

/// Register role flag for a connecting peer.
pub const ROLE_CONNECTOR: u8 = 1;
/// Register role flag for a listening peer.
pub const ROLE_LISTENER: u8 = 2;

/// Server-reported error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The requested peer has not registered with the server
    ClientNotFound,
    /// A code this implementation does not know; ignored for forward
    /// compatibility
    Unknown(u8),
}

impl ErrorCode {
    /// Wire value of this code.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::ClientNotFound => 0x01,
            Self::Unknown(b) => b,
        }
    }

    /// Decode a wire value.
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => Self::ClientNotFound,
            other => Self::Unknown(other),
        }
    }
}

/// A decoded rendezvous datagram.
///
/// Every message occupies exactly [`DATAGRAM_LEN`] bytes on the wire,
/// zero-padded past its body. Byte 0 is the message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Listener announcement: byte 1 = role flag, rest zero.
    RegisterListener,
    /// Connector announcement: byte 1 = role flag, bytes 2..6 = target
    /// IPv4, byte 6 = token length, token follows.
    RegisterConnector {
        /// Peer the connector wants to be introduced to
        target: Ipv4Addr,
        /// Fresh session token
        token: Token,
    },
    /// Server introduction: bytes 1..5 = peer IPv4, bytes 5..7 = anchor
    /// port (little-endian), byte 7 = token length, token follows.
    ConnectTo {
        /// Public address of the other peer
        peer: Ipv4Addr,
        /// Anchor port for the prediction window
        port: u16,
        /// Token forwarded from the connector's registration
        token: Token,
    },
    /// Punch probe: byte 1 = token length, token follows.
    Punch {
        /// Session token
        token: Token,
    },
    /// Listener's echo of an accepted punch; same body layout as Punch.
    PunchSuccess {
        /// Session token, unchanged from the punch
        token: Token,
    },
    /// Server failure report: byte 1 = error code.
    Error {
        /// Reported code
        code: ErrorCode,
    },
}

impl Message {
    /// Encode into a zeroed 64-byte datagram.
    ///
    /// The buffer is cleared first so padding never leaks previous content.
    pub fn encode(&self, buf: &mut [u8; DATAGRAM_LEN]) {
        buf.fill(0);
        match *self {
            Self::RegisterListener => {
                buf[0] = KIND_REGISTER;
                buf[1] = ROLE_LISTENER;
            }
            Self::RegisterConnector { target, token } => {
                buf[0] = KIND_REGISTER;
                buf[1] = ROLE_CONNECTOR;
                buf[2..6].copy_from_slice(&target.octets());
                write_token(buf, 6, &token);
            }
            Self::ConnectTo { peer, port, token } => {
                buf[0] = KIND_CONNECT_TO;
                buf[1..5].copy_from_slice(&peer.octets());
                // Port is little-endian on the wire, unlike the raw-octet
                // address.
                buf[5..7].copy_from_slice(&port.to_le_bytes());
                write_token(buf, 7, &token);
            }
            Self::Punch { token } => {
                buf[0] = KIND_PUNCH;
                write_token(buf, 1, &token);
            }
            Self::PunchSuccess { token } => {
                buf[0] = KIND_PUNCH_SUCCESS;
                write_token(buf, 1, &token);
            }
            Self::Error { code } => {
                buf[0] = KIND_ERROR;
                buf[1] = code.as_byte();
            }
        }
    }

    /// Decode a received datagram.
    ///
    /// Rejects anything that is not exactly 64 bytes, carries an unknown
    /// kind, or declares a token length outside 1..=32 or past the buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() != DATAGRAM_LEN {
            return Err(ProtocolError::WrongLength);
        }

        match buf[0] {
            KIND_REGISTER => match buf[1] {
                ROLE_LISTENER => Ok(Self::RegisterListener),
                ROLE_CONNECTOR => Ok(Self::RegisterConnector {
                    target: Ipv4Addr::new(buf[2], buf[3], buf[4], buf[5]),
                    token: read_token(buf, 6)?,
                }),
                _ => Err(ProtocolError::InvalidRole),
            },
            KIND_CONNECT_TO => Ok(Self::ConnectTo {
                peer: Ipv4Addr::new(buf[1], buf[2], buf[3], buf[4]),
                port: u16::from_le_bytes([buf[5], buf[6]]),
                token: read_token(buf, 7)?,
            }),
            KIND_PUNCH => Ok(Self::Punch {
                token: read_token(buf, 1)?,
            }),
            KIND_PUNCH_SUCCESS => Ok(Self::PunchSuccess {
                token: read_token(buf, 1)?,
            }),
            KIND_ERROR => Ok(Self::Error {
                code: ErrorCode::from_byte(buf[1]),
            }),
            _ => Err(ProtocolError::UnknownKind),
        }
    }

    /// Message kind byte.
    pub fn kind(&self) -> u8 {
        match self {
            Self::RegisterListener | Self::RegisterConnector { .. } => KIND_REGISTER,
            Self::ConnectTo { .. } => KIND_CONNECT_TO,
            Self::Punch { .. } => KIND_PUNCH,
            Self::PunchSuccess { .. } => KIND_PUNCH_SUCCESS,
            Self::Error { .. } => KIND_ERROR,
        }
    }
}

fn write_token(buf: &mut [u8; DATAGRAM_LEN], len_offset: usize, token: &Token) {
    let body = len_offset + 1;
    buf[len_offset] = token.len() as u8;
    buf[body..body + token.len()].copy_from_slice(token.as_slice());
}

// Token length must satisfy 1 <= L <= 32 and fit within the datagram.
fn read_token(buf: &[u8], len_offset: usize) -> Result<Token, ProtocolError> {
    let len = buf[len_offset] as usize;
    let body = len_offset + 1;
    if len == 0 || len > MAX_TOKEN_LEN || body + len > DATAGRAM_LEN {
        return Err(ProtocolError::TokenLength);
    }
    Token::from_slice(&buf[body..body + len])
}
