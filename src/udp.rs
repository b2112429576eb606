//! UDP host link - point-to-point transport for running nodes on a host
//!
//! Each node address maps to one socket address; there is no path
//! selection. A frame is carried in a datagram with a 4-byte link header
//! (kind, from, to, sequence) and confirmed by a link-level ack. Unconfirmed
//! frames are retransmitted with exponential backoff.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::errors::Result;
use crate::transport::{MeshTransport, RadioSettings, Received, RouteStatus};
use crate::{AUTO, MAX_MESSAGE_LENGTH};

const KIND_DATA: u8 = 0x01;
const KIND_ACK: u8 = 0x02;
const LINK_HEADER_SIZE: usize = 4;
const DATAGRAM_SIZE: usize = LINK_HEADER_SIZE + MAX_MESSAGE_LENGTH;

/// Default wait for a link ack before the first retransmission
pub const LINK_ACK_TIMEOUT_MS: u64 = 100;

/// Default number of transmissions per frame
pub const LINK_MAX_ATTEMPTS: u32 = 3;

/// Backoff multiplier between retransmissions
pub const BACKOFF_MULTIPLIER: u64 = 2;

/// Calculate exponential backoff delay
///
/// Formula: delay = min(base_ms * (BACKOFF_MULTIPLIER ^ attempt), max_delay_ms)
pub fn calculate_backoff_ms(attempt: u32, base_ms: u64, max_delay_ms: u64) -> u64 {
    let backoff = base_ms.saturating_mul(BACKOFF_MULTIPLIER.saturating_pow(attempt));
    backoff.min(max_delay_ms)
}

/// UdpOptions - Fluent interface for link timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpOptions {
    ack_timeout_ms: u64,
    max_attempts: u32,
}

impl UdpOptions {
    pub fn new() -> Self {
        Self {
            ack_timeout_ms: LINK_ACK_TIMEOUT_MS,
            max_attempts: LINK_MAX_ATTEMPTS,
        }
    }

    pub fn with_ack_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.ack_timeout_ms = timeout_ms.max(1);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn get_ack_timeout_ms(&self) -> u64 {
        self.ack_timeout_ms
    }

    pub fn get_max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for UdpOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Mesh transport over UDP sockets
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local: u8,
    peers: HashMap<u8, SocketAddr>,
    last_sequence: HashMap<(SocketAddr, u8), u8>,
    inbox: VecDeque<(Vec<u8>, u8)>,
    options: UdpOptions,
    sequence: u8,
    radio: Option<RadioSettings>,
}

impl UdpTransport {
    pub fn bind(address: impl ToSocketAddrs, options: UdpOptions) -> Result<Self> {
        let socket = UdpSocket::bind(address)?;
        Ok(Self {
            socket,
            local: AUTO,
            peers: HashMap::new(),
            last_sequence: HashMap::new(),
            inbox: VecDeque::new(),
            options,
            sequence: rand::random(),
            radio: None,
        })
    }

    /// Map a node address to the socket it listens on
    pub fn add_peer(&mut self, node: u8, address: SocketAddr) {
        self.peers.insert(node, address);
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn address(&self) -> u8 {
        self.local
    }

    /// Radio settings last applied, if any
    pub fn radio(&self) -> Option<RadioSettings> {
        self.radio
    }

    fn send_datagram(&self, kind: u8, to: u8, sequence: u8, frame: &[u8], peer: SocketAddr) -> std::io::Result<usize> {
        let mut datagram = [0u8; DATAGRAM_SIZE];
        datagram[0] = kind;
        datagram[1] = self.local;
        datagram[2] = to;
        datagram[3] = sequence;
        datagram[LINK_HEADER_SIZE..LINK_HEADER_SIZE + frame.len()].copy_from_slice(frame);
        self.socket.send_to(&datagram[..LINK_HEADER_SIZE + frame.len()], peer)
    }

    /// Queue data addressed to this node and ack it; return `(from, sequence)` of acks
    fn handle_datagram(&mut self, datagram: &[u8], origin: SocketAddr) -> Option<(u8, u8)> {
        if datagram.len() < LINK_HEADER_SIZE {
            return None;
        }
        let (kind, from, to, sequence) = (datagram[0], datagram[1], datagram[2], datagram[3]);
        if to != self.local {
            return None;
        }

        match kind {
            KIND_ACK => Some((from, sequence)),
            KIND_DATA => {
                if let Err(err) = self.send_datagram(KIND_ACK, from, sequence, &[], origin) {
                    warn!("link ack to {} failed: {}", from, err);
                }
                // Unassigned nodes share an address, so senders are told apart
                // by socket. A node seen on a new socket starts a fresh sequence.
                self.last_sequence
                    .retain(|&(addr, node), _| node != from || addr == origin);
                // A retransmission after a lost ack carries the same sequence
                if self.last_sequence.insert((origin, from), sequence) != Some(sequence) {
                    self.inbox.push_back((datagram[LINK_HEADER_SIZE..].to_vec(), from));
                }
                None
            }
            other => {
                debug!("unknown link datagram kind {}", other);
                None
            }
        }
    }

    fn drain_socket(&mut self) {
        if let Err(err) = self.socket.set_nonblocking(true) {
            warn!("cannot poll link socket: {}", err);
            return;
        }
        let mut buffer = [0u8; DATAGRAM_SIZE];
        loop {
            match self.socket.recv_from(&mut buffer) {
                Ok((len, origin)) => {
                    self.handle_datagram(&buffer[..len], origin);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    debug!("link receive error: {}", err);
                    break;
                }
            }
        }
        if let Err(err) = self.socket.set_nonblocking(false) {
            warn!("cannot restore blocking link socket: {}", err);
        }
    }
}

impl MeshTransport for UdpTransport {
    fn configure(&mut self, settings: RadioSettings) {
        debug!(
            "link radio settings: {} dBm, {} MHz",
            settings.power_level, settings.frequency_mhz
        );
        self.radio = Some(settings);
    }

    fn init(&mut self, local_address: u8) -> bool {
        self.local = local_address;
        true
    }

    fn set_address(&mut self, local_address: u8) {
        self.local = local_address;
    }

    fn send_and_wait_ack(&mut self, destination: u8, frame: &[u8]) -> RouteStatus {
        if frame.len() > MAX_MESSAGE_LENGTH {
            return RouteStatus::InvalidLength;
        }
        let Some(&peer) = self.peers.get(&destination) else {
            return RouteStatus::NoRoute;
        };

        self.sequence = self.sequence.wrapping_add(1);
        let sequence = self.sequence;
        let base_ms = self.options.ack_timeout_ms;
        let mut buffer = [0u8; DATAGRAM_SIZE];

        for attempt in 0..self.options.max_attempts {
            if let Err(err) = self.send_datagram(KIND_DATA, destination, sequence, frame, peer) {
                warn!("link send to {} failed: {}", destination, err);
                return RouteStatus::UnableToDeliver;
            }

            let wait = calculate_backoff_ms(attempt, base_ms, base_ms * 10);
            let deadline = Instant::now() + Duration::from_millis(wait);
            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                if let Err(err) = self.socket.set_read_timeout(Some(deadline - now)) {
                    warn!("cannot arm link timeout: {}", err);
                    return RouteStatus::UnableToDeliver;
                }
                match self.socket.recv_from(&mut buffer) {
                    Ok((len, origin)) => {
                        if self.handle_datagram(&buffer[..len], origin) == Some((destination, sequence)) {
                            return RouteStatus::Success;
                        }
                    }
                    Err(err)
                        if err.kind() == ErrorKind::WouldBlock
                            || err.kind() == ErrorKind::TimedOut =>
                    {
                        break;
                    }
                    Err(err) => {
                        debug!("link receive error: {}", err);
                        break;
                    }
                }
            }
        }

        RouteStatus::Timeout
    }

    fn available(&mut self) -> bool {
        if self.inbox.is_empty() {
            self.drain_socket();
        }
        !self.inbox.is_empty()
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Option<Received> {
        let (frame, from) = self.inbox.pop_front()?;
        let len = frame.len().min(buffer.len());
        buffer[..len].copy_from_slice(&frame[..len]);
        Some(Received { len, from })
    }

    fn set_idle(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn loopback(options: UdpOptions) -> UdpTransport {
        UdpTransport::bind("127.0.0.1:0", options).unwrap()
    }

    #[test]
    fn test_exponential_backoff() {
        assert_eq!(calculate_backoff_ms(0, 100, 5000), 100);
        assert_eq!(calculate_backoff_ms(1, 100, 5000), 200);
        assert_eq!(calculate_backoff_ms(3, 100, 5000), 800);
        assert_eq!(calculate_backoff_ms(10, 100, 5000), 5000);
    }

    #[test]
    fn test_udp_options_builder() {
        let options = UdpOptions::new().with_ack_timeout_ms(20).with_max_attempts(0);
        assert_eq!(options.get_ack_timeout_ms(), 20);
        assert_eq!(options.get_max_attempts(), 1);
    }

    #[test]
    fn test_unknown_peer_has_no_route() {
        let mut link = loopback(UdpOptions::default());
        link.init(1);
        assert_eq!(link.send_and_wait_ack(9, &[0u8; 7]), RouteStatus::NoRoute);
        assert_eq!(link.send_and_wait_ack(9, &[0u8; 40]), RouteStatus::InvalidLength);
    }

    #[test]
    fn test_silent_peer_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut link = loopback(UdpOptions::new().with_ack_timeout_ms(5).with_max_attempts(2));
        link.init(1);
        link.add_peer(0, silent.local_addr().unwrap());
        assert_eq!(link.send_and_wait_ack(0, &[0u8; 7]), RouteStatus::Timeout);
    }

    fn collect_frames(mut gateway: UdpTransport, count: usize) -> thread::JoinHandle<Vec<Vec<u8>>> {
        thread::spawn(move || {
            let mut frames = Vec::new();
            let deadline = Instant::now() + Duration::from_secs(2);
            while frames.len() < count && Instant::now() < deadline {
                if gateway.available() {
                    let mut buffer = [0u8; MAX_MESSAGE_LENGTH];
                    if let Some(r) = gateway.receive(&mut buffer) {
                        frames.push(buffer[..r.len].to_vec());
                    }
                } else {
                    thread::sleep(Duration::from_millis(2));
                }
            }
            frames
        })
    }

    #[test]
    fn test_unassigned_senders_with_equal_sequence_both_delivered() {
        let mut gateway = loopback(UdpOptions::default());
        gateway.init(0);
        let gateway_addr = gateway.local_addr().unwrap();

        let mut first = loopback(UdpOptions::new().with_ack_timeout_ms(50).with_max_attempts(5));
        let mut second = loopback(UdpOptions::new().with_ack_timeout_ms(50).with_max_attempts(5));
        for link in [&mut first, &mut second] {
            link.init(AUTO);
            link.add_peer(0, gateway_addr);
            link.sequence = 40;
        }

        let receiver = collect_frames(gateway, 2);
        let frame_a = [AUTO, AUTO, 0, 2, 3, 3, 255];
        let frame_b = [AUTO, AUTO, 0, 2, 3, 3, 254];
        assert_eq!(first.send_and_wait_ack(0, &frame_a), RouteStatus::Success);
        assert_eq!(second.send_and_wait_ack(0, &frame_b), RouteStatus::Success);

        let frames = receiver.join().unwrap();
        assert_eq!(frames, vec![frame_a.to_vec(), frame_b.to_vec()]);
    }

    #[test]
    fn test_retransmission_on_same_socket_is_suppressed() {
        let mut gateway = loopback(UdpOptions::default());
        gateway.init(0);
        let origin: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let data = [KIND_DATA, 4, 0, 7, 1, 4, 0, 2, 1, 0, 1];

        gateway.handle_datagram(&data, origin);
        gateway.handle_datagram(&data, origin);
        assert_eq!(gateway.inbox.len(), 1);

        // Same node and sequence after moving to another socket
        let moved: SocketAddr = "127.0.0.1:10".parse().unwrap();
        gateway.handle_datagram(&data, moved);
        assert_eq!(gateway.inbox.len(), 2);
        assert_eq!(gateway.last_sequence.len(), 1);
    }

    #[test]
    fn test_frame_delivered_and_acked() {
        let mut gateway = loopback(UdpOptions::default());
        gateway.init(0);
        let mut node = loopback(UdpOptions::new().with_ack_timeout_ms(50).with_max_attempts(5));
        node.init(4);
        node.add_peer(0, gateway.local_addr().unwrap());
        gateway.add_peer(4, node.local_addr().unwrap());

        let receiver = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                if gateway.available() {
                    let mut buffer = [0u8; MAX_MESSAGE_LENGTH];
                    return gateway.receive(&mut buffer).map(|r| (buffer[..r.len].to_vec(), r.from));
                }
                thread::sleep(Duration::from_millis(2));
            }
            None
        });

        let frame = [1u8, 4, 0, 2, 1, 0, 1];
        assert_eq!(node.send_and_wait_ack(0, &frame), RouteStatus::Success);

        let (bytes, from) = receiver.join().unwrap().unwrap();
        assert_eq!(bytes, frame.to_vec());
        assert_eq!(from, 4);
    }
}
