//! Error types for node protocol operations.
//!
//! Recoverable failures (a transport that could not deliver, a malformed
//! frame) are values the caller may retry on. Fatal conditions leave the
//! node in a halted state and every later send reports [`NodeError::Halted`].

use std::io;

use thiserror::Error;

use crate::transport::RouteStatus;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Node protocol error enumeration
///
/// Covers the failure modes of the node pipeline:
/// - transport delivery failures
/// - identity lifecycle violations
/// - malformed frames
/// - persisted record corruption
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// Mesh transport did not confirm delivery
    #[error("transmission failed: {0}")]
    Transmission(RouteStatus),

    /// Send skipped because the node has no address yet
    #[error("node has no address; identity request pending")]
    AwaitingIdentity,

    /// Node stopped transmitting for good; only an external reset recovers it
    #[error("node halted")]
    Halted,

    /// Gateway answered an identity request with the unassigned sentinel
    #[error("gateway address pool exhausted")]
    IdentityExhausted,

    /// Address adoption attempted while an address is already held
    #[error("address already assigned: {0}")]
    AddressAlreadyAssigned(u8),

    /// Gateway handed out an address no node may hold
    #[error("reserved address offered: {0}")]
    ReservedAddress(u8),

    /// Frame could not be parsed or built
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Persisted record failed validation
    #[error("storage error: {0}")]
    Storage(String),

    /// Host link socket failure
    #[error("I/O error: {0}")]
    Io(String),
}

/// Frame-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Buffer shorter than the header plus declared payload
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Bytes required by the header and declared length
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// Declared payload length exceeds payload capacity
    #[error("payload length {0} exceeds capacity")]
    LengthOverflow(u8),

    /// Hex text could not be decoded into payload bytes
    #[error("invalid hex payload: {0}")]
    InvalidHex(String),
}

impl From<io::Error> for NodeError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<hex::FromHexError> for FrameError {
    fn from(err: hex::FromHexError) -> Self {
        Self::InvalidHex(err.to_string())
    }
}
