//! Session token: the per-session correlation identifier.

use rand::RngCore;

use crate::error::ProtocolError;

/// Maximum token length in bytes.
pub const MAX_TOKEN_LEN: usize = 32;

/// Length of connector-generated tokens.
const GENERATED_TOKEN_LEN: usize = 16;

/// An opaque session token of 1 to 32 bytes.
///
/// Connectors generate a fresh token per session; listeners echo whatever
/// the server forwards. The token authenticates punch correlation: stale or
/// unrelated datagrams carry a different token and are discarded.
#[derive(Debug, Clone, Copy)]
pub struct Token {
    // Bytes beyond `len` are always zero, so whole-array comparison is
    // well-defined.
    bytes: [u8; MAX_TOKEN_LEN],
    len: u8,
}

impl Token {
    /// Build a token from raw bytes. Length must be 1 to 32.
    pub fn from_slice(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.is_empty() || raw.len() > MAX_TOKEN_LEN {
            return Err(ProtocolError::TokenLength);
        }
        let mut bytes = [0u8; MAX_TOKEN_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self {
            bytes,
            len: raw.len() as u8,
        })
    }

    /// Generate a fresh random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; MAX_TOKEN_LEN];
        rand::thread_rng().fill_bytes(&mut bytes[..GENERATED_TOKEN_LEN]);
        Self {
            bytes,
            len: GENERATED_TOKEN_LEN as u8,
        }
    }

    /// Token length in bytes.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false; tokens are at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Token bytes, without padding.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl PartialEq for Token {
    // Constant-time over the full backing array; the zeroed padding makes
    // unequal lengths compare unequal without an early exit.
    fn eq(&self, other: &Self) -> bool {
        let mut diff = self.len ^ other.len;
        for i in 0..MAX_TOKEN_LEN {
            diff |= self.bytes[i] ^ other.bytes[i];
        }
        diff == 0
    }
}

impl Eq for Token {}
