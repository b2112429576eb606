//! Internal control messages exchanged with the gateway.
//!
//! `Config` and `Time` share one wire code between the node's request and
//! the gateway's answer. They are kept apart here by direction: requests
//! are built by the node, responses are only decoded from frames whose
//! sender is the gateway and which carry a payload. An empty frame from the
//! gateway with one of these codes is not treated as a response.

use crate::message::{Message, Payload};
use crate::types::{InternalType, UnitSystem};

/// Request sent by the node to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Ask for a node address
    Identity,
    /// Ask for the controller configuration
    Config,
    /// Ask for the controller's clock
    Time,
}

impl ControlRequest {
    pub fn internal_type(self) -> InternalType {
        match self {
            Self::Identity => InternalType::IdRequest,
            Self::Config => InternalType::Config,
            Self::Time => InternalType::Time,
        }
    }
}

/// Internal frame received from the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Reboot,
    /// Address assigned to this node; [`crate::AUTO`] means the pool is empty
    IdentityResponse(u8),
    ConfigResponse(UnitSystem),
    /// Seconds since the epoch
    TimeResponse(u32),
    /// Any other internal type, ignored by the node
    Other(u8),
}

impl ControlMessage {
    /// Classify an internal frame already known to come from the gateway
    pub fn from_gateway(msg: &Message) -> Self {
        let has_payload = msg.length() > 0;
        match InternalType::try_from(msg.message_type) {
            Ok(InternalType::Reboot) => Self::Reboot,
            Ok(InternalType::IdResponse) if has_payload => match assigned_address(msg) {
                Some(address) => Self::IdentityResponse(address),
                None => Self::Other(msg.message_type),
            },
            Ok(InternalType::Config) if has_payload => {
                // Controllers answer "M" for metric, anything else is imperial
                let units = match msg.payload_bytes().first() {
                    Some(b'M') => UnitSystem::Metric,
                    _ => UnitSystem::Imperial,
                };
                Self::ConfigResponse(units)
            }
            Ok(InternalType::Time) if has_payload => Self::TimeResponse(msg.get_ulong()),
            _ => Self::Other(msg.message_type),
        }
    }
}

/// Address carried by an identity response, `None` unless it is a valid byte
fn assigned_address(msg: &Message) -> Option<u8> {
    match msg.payload() {
        Payload::Byte(v) => Some(v),
        Payload::String(text) => text.trim().parse().ok(),
        Payload::Int16(v) => u8::try_from(v).ok(),
        Payload::UInt16(v) => u8::try_from(v).ok(),
        Payload::Long32(v) => u8::try_from(v).ok(),
        Payload::ULong32(v) => u8::try_from(v).ok(),
        Payload::Custom(_) | Payload::Float32 { .. } => None,
    }
}
