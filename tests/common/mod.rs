//! Scripted transport and board shared by the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use sensornet_core::hal::{Hardware, InterruptMode, SleepPeriod, WakeSignal};
use sensornet_core::storage::{MemoryStorage, Storage, CONTROLLER_CONFIG_ADDRESS, NODE_ID_ADDRESS};
use sensornet_core::transport::{MeshTransport, RadioSettings, Received, RouteStatus};
use sensornet_core::{Command, Message, Node, PROTOCOL_VERSION};

/// Observable side effects, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Sent(Message),
    Delivered(Message),
    Time(u32),
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

pub struct ScriptedTransport {
    pub events: EventLog,
    pub inbound: VecDeque<(Vec<u8>, u8)>,
    pub statuses: VecDeque<RouteStatus>,
    pub radio: Option<RadioSettings>,
    pub init_address: Option<u8>,
    pub address: u8,
    pub idle_calls: usize,
}

impl ScriptedTransport {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            inbound: VecDeque::new(),
            statuses: VecDeque::new(),
            radio: None,
            init_address: None,
            address: 0,
            idle_calls: 0,
        }
    }

    pub fn push_inbound(&mut self, msg: &Message, from: u8) {
        self.inbound.push_back((msg.to_bytes(), from));
    }

    pub fn sent(&self) -> Vec<Message> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::Sent(msg) => Some(*msg),
                _ => None,
            })
            .collect()
    }
}

impl MeshTransport for ScriptedTransport {
    fn configure(&mut self, settings: RadioSettings) {
        self.radio = Some(settings);
    }

    fn init(&mut self, local_address: u8) -> bool {
        self.init_address = Some(local_address);
        self.address = local_address;
        true
    }

    fn set_address(&mut self, local_address: u8) {
        self.address = local_address;
    }

    fn send_and_wait_ack(&mut self, _destination: u8, frame: &[u8]) -> RouteStatus {
        let msg = Message::decode(frame).expect("engine sent a malformed frame");
        self.events.borrow_mut().push(Event::Sent(msg));
        self.statuses.pop_front().unwrap_or(RouteStatus::Success)
    }

    fn available(&mut self) -> bool {
        !self.inbound.is_empty()
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Option<Received> {
        let (frame, from) = self.inbound.pop_front()?;
        let len = frame.len().min(buffer.len());
        buffer[..len].copy_from_slice(&frame[..len]);
        Some(Received { len, from })
    }

    fn set_idle(&mut self) {
        self.idle_calls += 1;
    }
}

/// Board whose clock advances on every read
#[derive(Default)]
pub struct ScriptedBoard {
    pub now: Cell<u64>,
    pub cycles: Vec<SleepPeriod>,
    pub flushes: usize,
    pub reboots: usize,
    pub attached: Vec<(u8, InterruptMode)>,
    pub detached: Vec<u8>,
    pub wake: Option<Arc<WakeSignal>>,
    pub raise_after_cycles: Option<usize>,
}

impl Hardware for ScriptedBoard {
    fn millis(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + 10);
        now
    }

    fn flush_output(&mut self) {
        self.flushes += 1;
    }

    fn power_down(&mut self, period: SleepPeriod) {
        self.cycles.push(period);
        if Some(self.cycles.len()) == self.raise_after_cycles {
            if let Some(wake) = &self.wake {
                wake.raise();
            }
        }
    }

    fn attach_wake_interrupt(&mut self, interrupt: u8, mode: InterruptMode) {
        self.attached.push((interrupt, mode));
    }

    fn detach_wake_interrupt(&mut self, interrupt: u8) {
        self.detached.push(interrupt);
    }

    fn reboot(&mut self) {
        self.reboots += 1;
    }
}

pub type TestNode = Node<ScriptedTransport, MemoryStorage, ScriptedBoard>;

/// Route engine logs to the test output; `RUST_LOG=debug` shows frames
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn storage_with(node_id: u8, is_metric: u8) -> MemoryStorage {
    let mut storage = MemoryStorage::default();
    storage.write_byte(NODE_ID_ADDRESS, node_id);
    storage.write_byte(CONTROLLER_CONFIG_ADDRESS, is_metric);
    storage
}

pub fn test_node(storage: MemoryStorage) -> (TestNode, EventLog) {
    init_tracing();
    let events: EventLog = Rc::new(RefCell::new(Vec::new()));
    let node = Node::new(
        ScriptedTransport::new(Rc::clone(&events)),
        storage,
        ScriptedBoard::default(),
    )
    .unwrap();
    (node, events)
}

/// Node that records every application frame it delivers
pub fn recording_node(storage: MemoryStorage) -> (TestNode, EventLog) {
    let (mut node, events) = test_node(storage);
    let log = Rc::clone(&events);
    node.set_message_handler(move |msg| log.borrow_mut().push(Event::Delivered(*msg)));
    (node, events)
}

/// Frame as the network would deliver it
pub fn inbound(sender: u8, destination: u8, command: Command, message_type: u8) -> Message {
    let mut msg = Message::new(1, message_type);
    msg.sender = sender;
    msg.last = sender;
    msg.destination = destination;
    msg.set_version(PROTOCOL_VERSION).set_command(command);
    msg
}

pub fn delivered(events: &EventLog) -> usize {
    events
        .borrow()
        .iter()
        .filter(|event| matches!(event, Event::Delivered(_)))
        .count()
}
