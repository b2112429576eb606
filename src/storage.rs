//! Persisted storage contract and layout.
//!
//! The node only needs a byte-addressable medium that survives power loss
//! (EEPROM on microcontroller targets). Records live at fixed offsets.

use tracing::warn;

/// Node address (1 byte)
pub const NODE_ID_ADDRESS: u16 = 0;
/// Parent node address (1 byte), reserved for the mesh layer
pub(crate) const PARENT_NODE_ID_ADDRESS: u16 = NODE_ID_ADDRESS + 1;
/// Hop distance to the gateway (1 byte), reserved for the mesh layer
pub(crate) const DISTANCE_ADDRESS: u16 = PARENT_NODE_ID_ADDRESS + 1;
/// Routing table (256 bytes), reserved for the mesh layer
pub const ROUTES_ADDRESS: u16 = DISTANCE_ADDRESS + 1;
/// Controller configuration (24 bytes reserved)
pub const CONTROLLER_CONFIG_ADDRESS: u16 = ROUTES_ADDRESS + 256;
/// Firmware configuration (8 bytes), reserved for over-the-air updates
pub(crate) const FIRMWARE_CONFIG_ADDRESS: u16 = CONTROLLER_CONFIG_ADDRESS + 24;
/// First byte of the application state slots
pub const LOCAL_CONFIG_ADDRESS: u16 = FIRMWARE_CONFIG_ADDRESS + 8;

/// Value of an erased storage cell
pub const ERASED: u8 = 0xFF;

/// Byte-addressable persisted storage
pub trait Storage {
    fn read_byte(&self, address: u16) -> u8;

    fn write_byte(&mut self, address: u16, value: u8);

    fn read_block(&self, address: u16, buffer: &mut [u8]) {
        for (offset, byte) in buffer.iter_mut().enumerate() {
            *byte = self.read_byte(address.wrapping_add(offset as u16));
        }
    }

    fn write_block(&mut self, address: u16, data: &[u8]) {
        for (offset, byte) in data.iter().enumerate() {
            self.write_byte(address.wrapping_add(offset as u16), *byte);
        }
    }
}

/// In-memory storage starting out erased, counting byte writes
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    bytes: Vec<u8>,
    writes: usize,
}

impl MemoryStorage {
    /// Storage size of the smallest supported targets
    pub const DEFAULT_SIZE: usize = 1024;

    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![ERASED; size],
            writes: 0,
        }
    }

    /// Number of byte writes performed since creation
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SIZE)
    }
}

impl Storage for MemoryStorage {
    fn read_byte(&self, address: u16) -> u8 {
        self.bytes.get(address as usize).copied().unwrap_or(ERASED)
    }

    fn write_byte(&mut self, address: u16, value: u8) {
        match self.bytes.get_mut(address as usize) {
            Some(cell) => {
                *cell = value;
                self.writes += 1;
            }
            None => warn!("storage write past end: {}", address),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_starts_erased() {
        let storage = MemoryStorage::default();
        assert_eq!(storage.read_byte(NODE_ID_ADDRESS), ERASED);
        assert_eq!(storage.read_byte(LOCAL_CONFIG_ADDRESS), ERASED);
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn test_block_access() {
        let mut storage = MemoryStorage::new(16);
        storage.write_block(4, &[1, 2, 3]);
        let mut buffer = [0u8; 3];
        storage.read_block(4, &mut buffer);
        assert_eq!(buffer, [1, 2, 3]);
        assert_eq!(storage.write_count(), 3);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut storage = MemoryStorage::new(4);
        storage.write_byte(10, 1);
        assert_eq!(storage.write_count(), 0);
        assert_eq!(storage.read_byte(10), ERASED);
    }

    #[test]
    fn test_layout_offsets() {
        assert_eq!(PARENT_NODE_ID_ADDRESS, 1);
        assert_eq!(DISTANCE_ADDRESS, 2);
        assert_eq!(ROUTES_ADDRESS, 3);
        assert_eq!(CONTROLLER_CONFIG_ADDRESS, 259);
        assert_eq!(FIRMWARE_CONFIG_ADDRESS, 283);
        assert_eq!(LOCAL_CONFIG_ADDRESS, 291);
    }
}
