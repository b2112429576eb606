//! Mesh transport contract.
//!
//! Multi-hop delivery, radio-level retransmission and modem setup all live
//! behind this trait. The node hands it encoded frames and polls it for
//! frames addressed to this node.

use std::fmt;

/// Delivery result reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    Success,
    InvalidLength,
    NoRoute,
    Timeout,
    NoReply,
    UnableToDeliver,
}

impl RouteStatus {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::InvalidLength => "invalid length",
            Self::NoRoute => "no route",
            Self::Timeout => "timeout",
            Self::NoReply => "no reply",
            Self::UnableToDeliver => "unable to deliver",
        };
        f.write_str(text)
    }
}

/// Radio parameters handed to the transport at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioSettings {
    /// Transmit power in dBm
    pub power_level: i8,
    /// Carrier frequency in MHz
    pub frequency_mhz: u16,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            power_level: 14,
            frequency_mhz: 868,
        }
    }
}

/// A frame pulled from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Bytes written into the caller's buffer
    pub len: usize,
    /// Neighbour the frame arrived from
    pub from: u8,
}

/// Multi-hop mesh transport
pub trait MeshTransport {
    /// Apply radio parameters before [`MeshTransport::init`]
    fn configure(&mut self, settings: RadioSettings);

    /// Start the transport for `local_address`
    fn init(&mut self, local_address: u8) -> bool;

    /// Change the address the transport accepts frames for
    fn set_address(&mut self, local_address: u8);

    /// Send `frame` to `destination` and block until delivery is confirmed
    fn send_and_wait_ack(&mut self, destination: u8, frame: &[u8]) -> RouteStatus;

    /// Non-blocking check for a pending inbound frame
    fn available(&mut self) -> bool;

    /// Copy the next pending frame into `buffer`
    fn receive(&mut self, buffer: &mut [u8]) -> Option<Received>;

    /// Put the radio into its idle, low-power mode
    fn set_idle(&mut self);
}
