//! Sensornet Core - protocol core for low-power wireless sensor meshes
//!
//! Two pieces live here:
//! - the binary frame every node and the gateway exchange ([`message`]),
//!   with packed header bitfields and a tagged-union payload
//! - the node-side engine ([`node`]) that obtains an address, routes and
//!   acknowledges frames, dispatches gateway control messages and sleeps
//!   between transmissions ([`sleep`])
//!
//! The mesh transport, persisted storage and board services are traits
//! ([`MeshTransport`], [`Storage`], [`Hardware`]) so the engine runs the
//! same against a radio stack or the [`udp`] host link.
//!
//! # Design Principles
//! - Fixed-size frames, one reusable buffer per direction
//! - Single-threaded and cooperative; interrupts only raise a flag
//! - Storage is written only when a value actually changes

pub mod control;
pub mod errors;
pub mod hal;
pub mod identity;
pub mod message;
pub mod node;
pub mod sleep;
pub mod storage;
pub mod transport;
pub mod types;
pub mod udp;

pub use errors::{FrameError, NodeError, Result};
pub use hal::{Hardware, InterruptMode, SleepPeriod, WakeSignal};
pub use identity::{ControllerConfig, IdentityPhase, NodeIdentity};
pub use message::{Message, Payload, PresentationRecord};
pub use node::{Node, NodeOptions};
pub use storage::{MemoryStorage, Storage};
pub use transport::{MeshTransport, RadioSettings, Received, RouteStatus};
pub use types::{Command, InternalType, PayloadType, SensorType, StreamType, UnitSystem, VariableType};

/// Protocol version carried in every frame
pub const PROTOCOL_VERSION: u8 = 2;

/// Largest frame on the wire
pub const MAX_MESSAGE_LENGTH: usize = 32;

/// Header bytes preceding the payload
pub const HEADER_SIZE: usize = 7;

/// Payload capacity
pub const MAX_PAYLOAD: usize = MAX_MESSAGE_LENGTH - HEADER_SIZE;

/// Address of the gateway
pub const GATEWAY_ADDRESS: u8 = 0;

/// Address of a node that has none yet; from the gateway, "pool exhausted"
pub const AUTO: u8 = 255;

/// Child sensor id used for messages about the node itself
pub const NODE_SENSOR_ID: u8 = 255;

/// Library version announced in presentation messages
pub const LIBRARY_VERSION: &str = "1.4";

/// Window for processing replies after a request, in milliseconds
pub const REPLY_TIMEOUT_MS: u64 = 2000;
