//! Node protocol engine.
//!
//! Builds and routes outbound frames, dispatches inbound ones, and runs the
//! bootstrap that obtains an address and the controller configuration.
//! Everything runs on the caller's thread; the only blocking is the bounded
//! reply window during which inbound frames keep being processed.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::control::{ControlMessage, ControlRequest};
use crate::errors::{NodeError, Result};
use crate::hal::{Hardware, InterruptMode, SleepPeriod, WakeSignal};
use crate::identity::{ControllerConfig, IdentityPhase, IdentityState};
use crate::message::Message;
use crate::sleep::{self, SleepReport};
use crate::storage::{Storage, LOCAL_CONFIG_ADDRESS};
use crate::transport::{MeshTransport, RadioSettings};
use crate::types::{Command, InternalType, SensorType, UnitSystem};
use crate::{
    AUTO, GATEWAY_ADDRESS, LIBRARY_VERSION, MAX_MESSAGE_LENGTH, NODE_SENSOR_ID, PROTOCOL_VERSION,
    REPLY_TIMEOUT_MS,
};

/// Handler for application frames
pub type MessageCallback = Box<dyn FnMut(&Message)>;

/// Handler for the controller's clock, in seconds
pub type TimeCallback = Box<dyn FnMut(u32)>;

/// Consecutive send failures
///
/// Informational only; retry policy is the caller's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmissionHealth {
    consecutive_failures: u32,
}

impl TransmissionHealth {
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// NodeOptions - Fluent interface for startup configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOptions {
    static_address: Option<u8>,
    radio: RadioSettings,
    reply_timeout_ms: u64,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self {
            static_address: None,
            radio: RadioSettings::default(),
            reply_timeout_ms: REPLY_TIMEOUT_MS,
        }
    }

    /// Use a fixed address instead of asking the gateway
    pub fn with_static_address(mut self, address: u8) -> Self {
        self.static_address = Some(address);
        self
    }

    pub fn with_radio(mut self, radio: RadioSettings) -> Self {
        self.radio = radio;
        self
    }

    pub fn with_power_level(mut self, power_level: i8) -> Self {
        self.radio.power_level = power_level;
        self
    }

    pub fn with_frequency_mhz(mut self, frequency_mhz: u16) -> Self {
        self.radio.frequency_mhz = frequency_mhz;
        self
    }

    /// How long to keep processing replies after a request
    pub fn with_reply_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.reply_timeout_ms = timeout_ms;
        self
    }

    pub fn get_static_address(&self) -> Option<u8> {
        self.static_address
    }

    pub fn get_radio(&self) -> RadioSettings {
        self.radio
    }

    pub fn get_reply_timeout_ms(&self) -> u64 {
        self.reply_timeout_ms
    }
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A sensor node
///
/// Owns one inbound and one outbound frame buffer. The inbound frame handed
/// to the message callback is overwritten by the next `process` call.
pub struct Node<T, S, H> {
    transport: T,
    storage: S,
    hardware: H,
    identity: IdentityState,
    options: NodeOptions,
    health: TransmissionHealth,
    inbound: Message,
    outbound: Message,
    on_message: Option<MessageCallback>,
    on_time: Option<TimeCallback>,
    wake: Arc<WakeSignal>,
    halted: bool,
}

impl<T: MeshTransport, S: Storage, H: Hardware> Node<T, S, H> {
    /// Create a node, loading identity and configuration from storage
    pub fn new(transport: T, storage: S, hardware: H) -> Result<Self> {
        let identity = IdentityState::load(&storage)?;
        Ok(Self {
            transport,
            storage,
            hardware,
            identity,
            options: NodeOptions::default(),
            health: TransmissionHealth::default(),
            inbound: Message::default(),
            outbound: Message::default(),
            on_message: None,
            on_time: None,
            wake: Arc::new(WakeSignal::new()),
            halted: false,
        })
    }

    /// Register the handler for application frames
    pub fn set_message_handler(&mut self, handler: impl FnMut(&Message) + 'static) {
        self.on_message = Some(Box::new(handler));
    }

    /// Register the handler for time responses
    pub fn set_time_handler(&mut self, handler: impl FnMut(u32) + 'static) {
        self.on_time = Some(Box::new(handler));
    }

    /// Bring the node up
    ///
    /// Loads persisted state, starts the transport, obtains an address if
    /// needed, presents the node and exchanges configuration with the
    /// controller. Returns whether the node holds an address afterwards.
    pub fn begin(&mut self, options: NodeOptions) -> bool {
        self.options = options;
        match IdentityState::load(&self.storage) {
            Ok(state) => self.identity = state,
            Err(err) => warn!("keeping in-memory identity: {}", err),
        }
        self.health = TransmissionHealth::default();

        self.transport.configure(options.radio);
        if !self.transport.init(self.identity.address()) {
            warn!("radio initialisation failed");
        }
        if let Some(address) = options.static_address {
            self.identity.use_static_address(address);
        }
        self.transport.set_address(self.identity.address());

        if !self.identity.has_address() {
            self.request_node_id();
        }
        debug!("sensor started, id {}", self.identity.address());

        if let Err(err) = self.present(NODE_SENSOR_ID, SensorType::ArduinoNode, false) {
            debug!("presentation failed: {}", err);
        }
        if let Err(err) = self.send_control(ControlRequest::Config) {
            debug!("config request failed: {}", err);
        }
        self.wait_for_reply();

        self.identity.has_address()
    }

    /// Ask the gateway for an address and wait for the answer
    ///
    /// Returns whether an address was obtained.
    pub fn request_node_id(&mut self) -> bool {
        debug!("req node id");
        self.identity.start_request();
        if let Err(err) = self.send_control(ControlRequest::Identity) {
            debug!("id request failed: {}", err);
        }
        self.wait_for_reply();
        self.identity.finish_request();
        self.identity.has_address()
    }

    /// Process inbound frames until the reply window closes
    pub fn wait_for_reply(&mut self) {
        let enter = self.hardware.millis();
        while !self.halted
            && self.hardware.millis().saturating_sub(enter) < self.options.reply_timeout_ms
        {
            self.process();
        }
    }

    fn build(
        &mut self,
        destination: u8,
        sensor: u8,
        command: Command,
        message_type: u8,
        request_ack: bool,
    ) -> &mut Message {
        let sender = self.identity.address();
        let msg = &mut self.outbound;
        *msg = Message::new(sensor, message_type);
        msg.sender = sender;
        msg.destination = destination;
        msg.set_command(command)
            .set_request_ack(request_ack)
            .set_ack(false);
        msg
    }

    fn send_control(&mut self, request: ControlRequest) -> Result<()> {
        self.build(
            GATEWAY_ADDRESS,
            NODE_SENSOR_ID,
            Command::Internal,
            request.internal_type().as_u8(),
            false,
        )
        .set_str("");
        self.route_outbound()
    }

    /// Route a prepared frame to its destination
    ///
    /// # Errors
    /// - `AwaitingIdentity` if the node has no address and `msg` is not an
    ///   identity request; an identity request is started instead
    /// - `Transmission` if the transport could not deliver
    /// - `Halted` once the node has stopped for good
    pub fn route_message(&mut self, msg: &mut Message) -> Result<()> {
        msg.set_version(PROTOCOL_VERSION);
        self.outbound = *msg;
        self.route_outbound()
    }

    fn route_outbound(&mut self) -> Result<()> {
        if self.halted || self.identity.phase() == IdentityPhase::Exhausted {
            return Err(NodeError::Halted);
        }

        let is_identity_request = self.outbound.command() == Some(Command::Internal)
            && self.outbound.message_type == InternalType::IdRequest.as_u8();
        if !self.identity.has_address() && !is_identity_request {
            if self.identity.phase() == IdentityPhase::Unassigned {
                self.request_node_id();
            }
            return Err(NodeError::AwaitingIdentity);
        }

        self.outbound.set_version(PROTOCOL_VERSION);
        let mut frame = [0u8; MAX_MESSAGE_LENGTH];
        let len = self.outbound.encode(&mut frame);
        let status = self
            .transport
            .send_and_wait_ack(self.outbound.destination, &frame[..len]);
        debug!("sent: {} st={}", self.outbound, status);

        if status.is_success() {
            self.health.record_success();
            Ok(())
        } else {
            self.health.record_failure();
            Err(NodeError::Transmission(status))
        }
    }

    /// Send an application value
    ///
    /// Stamps this node as sender and the command as set.
    pub fn send(&mut self, msg: &mut Message, request_ack: bool) -> Result<()> {
        msg.sender = self.identity.address();
        msg.set_command(Command::Set).set_request_ack(request_ack);
        self.route_message(msg)
    }

    /// Announce a child sensor to the controller
    pub fn present(&mut self, child: u8, sensor_type: SensorType, request_ack: bool) -> Result<()> {
        self.build(
            GATEWAY_ADDRESS,
            child,
            Command::Presentation,
            sensor_type.as_u8(),
            request_ack,
        )
        .set_str(LIBRARY_VERSION);
        self.route_outbound()
    }

    /// Report battery level in percent
    pub fn send_battery_level(&mut self, level: u8, request_ack: bool) -> Result<()> {
        self.build(
            GATEWAY_ADDRESS,
            NODE_SENSOR_ID,
            Command::Internal,
            InternalType::BatteryLevel.as_u8(),
            request_ack,
        )
        .set_byte(level);
        self.route_outbound()
    }

    /// Report the application's name and version
    ///
    /// Both frames are attempted; the first failure is returned.
    pub fn send_sketch_info(
        &mut self,
        name: Option<&str>,
        version: Option<&str>,
        request_ack: bool,
    ) -> Result<()> {
        let mut outcome = Ok(());
        for (kind, value) in [
            (InternalType::SketchName, name),
            (InternalType::SketchVersion, version),
        ] {
            let Some(value) = value else { continue };
            self.build(
                GATEWAY_ADDRESS,
                NODE_SENSOR_ID,
                Command::Internal,
                kind.as_u8(),
                request_ack,
            )
            .set_str(value);
            let result = self.route_outbound();
            if outcome.is_ok() {
                outcome = result;
            }
        }
        outcome
    }

    /// Ask `destination` for the current value of a child's variable
    ///
    /// The answer arrives through the message handler.
    pub fn request(&mut self, child: u8, variable_type: u8, destination: u8) -> Result<()> {
        self.build(destination, child, Command::Req, variable_type, false);
        self.route_outbound()
    }

    /// Ask the controller for the time; `handler` receives the answer
    pub fn request_time(&mut self, handler: impl FnMut(u32) + 'static) -> Result<()> {
        self.set_time_handler(handler);
        self.build(
            GATEWAY_ADDRESS,
            NODE_SENSOR_ID,
            Command::Internal,
            InternalType::Time.as_u8(),
            false,
        );
        self.route_outbound()
    }

    /// Handle at most one inbound frame
    ///
    /// Returns true if an application frame addressed to this node was
    /// delivered to the message handler.
    pub fn process(&mut self) -> bool {
        if self.halted || !self.transport.available() {
            return false;
        }

        let msg = match self.read_frame() {
            Ok(Some(msg)) => msg,
            Ok(None) => return false,
            Err(err) => {
                debug!("dropped frame: {}", err);
                return false;
            }
        };
        self.inbound = msg;
        debug!("read: {}", msg);

        if msg.version() != PROTOCOL_VERSION {
            debug!("version mismatch");
            return false;
        }
        if msg.destination != self.identity.address() {
            return false;
        }

        if msg.request_ack() {
            self.send_ack(&msg);
        }

        if msg.command() == Some(Command::Internal) && msg.sender == GATEWAY_ADDRESS {
            self.handle_control(ControlMessage::from_gateway(&msg));
            return false;
        }

        if let Some(handler) = self.on_message.as_mut() {
            handler(&self.inbound);
        }
        true
    }

    /// Pull the next pending frame off the transport
    fn read_frame(&mut self) -> Result<Option<Message>> {
        let mut buffer = [0u8; MAX_MESSAGE_LENGTH + 1];
        let Some(received) = self.transport.receive(&mut buffer) else {
            return Ok(None);
        };
        let len = received.len.min(buffer.len());
        Ok(Some(Message::decode(&buffer[..len])?))
    }

    fn send_ack(&mut self, msg: &Message) {
        if !self.identity.has_address() {
            debug!("no address, ack to {} skipped", msg.sender);
            return;
        }
        let mut ack = *msg;
        ack.set_request_ack(false).set_ack(true);
        ack.sender = self.identity.address();
        ack.destination = msg.sender;
        self.outbound = ack;
        if let Err(err) = self.route_outbound() {
            debug!("ack to {} failed: {}", msg.sender, err);
        }
    }

    fn handle_control(&mut self, control: ControlMessage) {
        match control {
            ControlMessage::Reboot => {
                debug!("reboot requested");
                self.hardware.reboot();
                self.halted = true;
            }
            ControlMessage::IdentityResponse(address) => {
                if self.identity.address() != AUTO {
                    return;
                }
                match self.identity.adopt_address(&mut self.storage, address) {
                    Ok(()) => self.transport.set_address(address),
                    Err(NodeError::IdentityExhausted) => self.halted = true,
                    Err(err) => warn!("address {} not adopted: {}", address, err),
                }
            }
            ControlMessage::ConfigResponse(units) => {
                if let Err(err) = self.identity.update_preference(&mut self.storage, units) {
                    warn!("config not stored: {}", err);
                }
            }
            ControlMessage::TimeResponse(seconds) => {
                if let Some(handler) = self.on_time.as_mut() {
                    handler(seconds);
                }
            }
            ControlMessage::Other(code) => debug!("internal type {} ignored", code),
        }
    }

    /// Power down for about `duration_ms`
    pub fn sleep(&mut self, duration_ms: u64) -> SleepReport {
        self.hardware.flush_output();
        self.transport.set_idle();
        self.wake.clear();
        sleep::power_down(&mut self.hardware, &self.wake, duration_ms)
    }

    /// Power down until `interrupt` fires or `duration_ms` elapses
    ///
    /// A zero duration sleeps until the interrupt. Returns true if the
    /// interrupt woke the node.
    pub fn sleep_until_interrupt(
        &mut self,
        interrupt: u8,
        mode: InterruptMode,
        duration_ms: u64,
    ) -> bool {
        self.hardware.flush_output();
        self.transport.set_idle();
        self.wake.clear();
        self.hardware.attach_wake_interrupt(interrupt, mode);
        let woken = if duration_ms == 0 {
            self.hardware.power_down(SleepPeriod::Forever);
            true
        } else {
            sleep::power_down(&mut self.hardware, &self.wake, duration_ms).interrupted
        };
        self.hardware.detach_wake_interrupt(interrupt);
        woken
    }

    /// Store an application byte, writing only on change
    pub fn save_state(&mut self, position: u8, value: u8) {
        let address = LOCAL_CONFIG_ADDRESS + position as u16;
        if self.storage.read_byte(address) != value {
            self.storage.write_byte(address, value);
        }
    }

    pub fn load_state(&self, position: u8) -> u8 {
        self.storage.read_byte(LOCAL_CONFIG_ADDRESS + position as u16)
    }

    pub fn node_id(&self) -> u8 {
        self.identity.address()
    }

    pub fn identity_phase(&self) -> IdentityPhase {
        self.identity.phase()
    }

    pub fn config(&self) -> ControllerConfig {
        self.identity.config()
    }

    pub fn unit_system(&self) -> UnitSystem {
        self.identity.preference()
    }

    pub fn failed_transmissions(&self) -> u32 {
        self.health.consecutive_failures()
    }

    /// Node stopped for good (address pool exhausted or reboot requested)
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Last frame read by `process`
    pub fn last_message(&self) -> &Message {
        &self.inbound
    }

    /// Flag for the wake interrupt handler to raise
    pub fn wake_signal(&self) -> Arc<WakeSignal> {
        Arc::clone(&self.wake)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }
}
