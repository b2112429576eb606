//! Node identity and controller configuration state.
//!
//! Both records are persisted with rkyv at fixed storage offsets and
//! validated on load. Their archived form is a single byte each, so the
//! storage image matches the layout the rest of the network expects.

use rkyv::{check_archived_root, to_bytes, Archive, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{NodeError, Result};
use crate::storage::{Storage, CONTROLLER_CONFIG_ADDRESS, ERASED, NODE_ID_ADDRESS};
use crate::types::UnitSystem;
use crate::{AUTO, GATEWAY_ADDRESS};

/// Persisted node address
///
/// Holds [`AUTO`] until the gateway assigns an address. Never deleted, only
/// overwritten.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct NodeIdentity {
    pub node_id: u8,
}

impl NodeIdentity {
    pub fn load<S: Storage>(storage: &S) -> Result<Self> {
        let mut bytes = [0u8; std::mem::size_of::<ArchivedNodeIdentity>()];
        storage.read_block(NODE_ID_ADDRESS, &mut bytes);
        let archived = check_archived_root::<NodeIdentity>(&bytes)
            .map_err(|_| NodeError::Storage("invalid node identity record".to_string()))?;
        Ok(Self {
            node_id: archived.node_id,
        })
    }

    pub fn store<S: Storage>(&self, storage: &mut S) -> Result<()> {
        let bytes = to_bytes::<_, 16>(self)
            .map_err(|_| NodeError::Storage("failed to archive node identity".to_string()))?;
        storage.write_block(NODE_ID_ADDRESS, &bytes);
        Ok(())
    }
}

/// Persisted controller preferences
///
/// `is_metric` is 1 for metric, 0 for imperial and [`ERASED`] when the
/// controller never sent a preference.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct ControllerConfig {
    pub is_metric: u8,
}

impl ControllerConfig {
    pub fn new(units: UnitSystem) -> Self {
        Self {
            is_metric: (units == UnitSystem::Metric) as u8,
        }
    }

    /// Stored preference, `None` when unset
    pub fn unit_system(&self) -> Option<UnitSystem> {
        match self.is_metric {
            ERASED => None,
            0 => Some(UnitSystem::Imperial),
            _ => Some(UnitSystem::Metric),
        }
    }

    pub fn load<S: Storage>(storage: &S) -> Result<Self> {
        let mut bytes = [0u8; std::mem::size_of::<ArchivedControllerConfig>()];
        storage.read_block(CONTROLLER_CONFIG_ADDRESS, &mut bytes);
        let archived = check_archived_root::<ControllerConfig>(&bytes)
            .map_err(|_| NodeError::Storage("invalid controller config record".to_string()))?;
        Ok(Self {
            is_metric: archived.is_metric,
        })
    }

    pub fn store<S: Storage>(&self, storage: &mut S) -> Result<()> {
        let bytes = to_bytes::<_, 16>(self)
            .map_err(|_| NodeError::Storage("failed to archive controller config".to_string()))?;
        storage.write_block(CONTROLLER_CONFIG_ADDRESS, &bytes);
        Ok(())
    }
}

/// Address lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityPhase {
    /// No address; sends other than identity requests are refused
    Unassigned,
    /// Identity request sent, waiting for the gateway
    Requesting,
    /// Address held (assigned by the gateway, loaded, or static)
    Assigned,
    /// Gateway has no address left; the node never transmits again
    Exhausted,
}

/// In-memory view of the persisted identity and configuration
#[derive(Debug, Clone)]
pub struct IdentityState {
    identity: NodeIdentity,
    config: ControllerConfig,
    phase: IdentityPhase,
}

impl IdentityState {
    /// Load both records; an unset preference defaults to metric
    pub fn load<S: Storage>(storage: &S) -> Result<Self> {
        let identity = NodeIdentity::load(storage)?;
        let mut config = ControllerConfig::load(storage)?;
        if config.unit_system().is_none() {
            config = ControllerConfig::new(UnitSystem::Metric);
        }
        let phase = if identity.node_id == AUTO {
            IdentityPhase::Unassigned
        } else {
            IdentityPhase::Assigned
        };
        Ok(Self {
            identity,
            config,
            phase,
        })
    }

    pub fn address(&self) -> u8 {
        self.identity.node_id
    }

    pub fn phase(&self) -> IdentityPhase {
        self.phase
    }

    pub fn has_address(&self) -> bool {
        self.phase == IdentityPhase::Assigned
    }

    pub fn config(&self) -> ControllerConfig {
        self.config
    }

    pub fn preference(&self) -> UnitSystem {
        self.config.unit_system().unwrap_or_default()
    }

    /// Use a fixed address chosen by the application; not persisted
    pub fn use_static_address(&mut self, address: u8) {
        self.identity.node_id = address;
        self.phase = if address == AUTO {
            IdentityPhase::Unassigned
        } else {
            IdentityPhase::Assigned
        };
    }

    pub(crate) fn start_request(&mut self) {
        if self.phase == IdentityPhase::Unassigned {
            self.phase = IdentityPhase::Requesting;
        }
    }

    pub(crate) fn finish_request(&mut self) {
        if self.phase == IdentityPhase::Requesting {
            self.phase = IdentityPhase::Unassigned;
        }
    }

    /// Adopt an address handed out by the gateway
    ///
    /// # Errors
    /// - `AddressAlreadyAssigned` if the node already holds an address
    /// - `IdentityExhausted` if the gateway answered with [`AUTO`]; the node
    ///   is left in [`IdentityPhase::Exhausted`] for good
    /// - `ReservedAddress` for the gateway's own address; nothing is stored
    pub fn adopt_address<S: Storage>(&mut self, storage: &mut S, address: u8) -> Result<()> {
        match self.phase {
            IdentityPhase::Exhausted => return Err(NodeError::Halted),
            IdentityPhase::Assigned => {
                return Err(NodeError::AddressAlreadyAssigned(self.identity.node_id))
            }
            IdentityPhase::Unassigned | IdentityPhase::Requesting => {}
        }

        if address == AUTO {
            warn!("gateway address pool full");
            self.phase = IdentityPhase::Exhausted;
            return Err(NodeError::IdentityExhausted);
        }
        if address == GATEWAY_ADDRESS {
            return Err(NodeError::ReservedAddress(address));
        }

        self.identity.node_id = address;
        self.identity.store(storage)?;
        self.phase = IdentityPhase::Assigned;
        debug!("id={}", address);
        Ok(())
    }

    /// Record the controller's unit preference, writing storage only on change
    ///
    /// Returns whether storage was written.
    pub fn update_preference<S: Storage>(
        &mut self,
        storage: &mut S,
        units: UnitSystem,
    ) -> Result<bool> {
        let config = ControllerConfig::new(units);
        if config == self.config {
            return Ok(false);
        }
        config.store(storage)?;
        self.config = config;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_erased_storage_loads_unassigned_metric() {
        let storage = MemoryStorage::default();
        let state = IdentityState::load(&storage).unwrap();
        assert_eq!(state.address(), AUTO);
        assert_eq!(state.phase(), IdentityPhase::Unassigned);
        assert_eq!(state.preference(), UnitSystem::Metric);
    }

    #[test]
    fn test_adopt_address_persists_single_byte() {
        let mut storage = MemoryStorage::default();
        let mut state = IdentityState::load(&storage).unwrap();
        state.adopt_address(&mut storage, 7).unwrap();

        assert_eq!(state.address(), 7);
        assert!(state.has_address());
        assert_eq!(storage.read_byte(NODE_ID_ADDRESS), 7);
        assert_eq!(storage.write_count(), 1);

        let reloaded = IdentityState::load(&storage).unwrap();
        assert_eq!(reloaded.address(), 7);
    }

    #[test]
    fn test_adopt_requires_unassigned() {
        let mut storage = MemoryStorage::default();
        storage.write_byte(NODE_ID_ADDRESS, 3);
        let mut state = IdentityState::load(&storage).unwrap();
        assert_eq!(
            state.adopt_address(&mut storage, 9),
            Err(NodeError::AddressAlreadyAssigned(3))
        );
    }

    #[test]
    fn test_adopting_auto_exhausts_identity() {
        let mut storage = MemoryStorage::default();
        let mut state = IdentityState::load(&storage).unwrap();
        assert_eq!(
            state.adopt_address(&mut storage, AUTO),
            Err(NodeError::IdentityExhausted)
        );
        assert_eq!(state.phase(), IdentityPhase::Exhausted);
        assert_eq!(state.adopt_address(&mut storage, 4), Err(NodeError::Halted));
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn test_gateway_address_is_never_adopted() {
        let mut storage = MemoryStorage::default();
        let mut state = IdentityState::load(&storage).unwrap();
        assert_eq!(
            state.adopt_address(&mut storage, GATEWAY_ADDRESS),
            Err(NodeError::ReservedAddress(GATEWAY_ADDRESS))
        );
        assert_eq!(state.phase(), IdentityPhase::Unassigned);
        assert_eq!(storage.write_count(), 0);
    }

    #[test]
    fn test_update_preference_writes_on_change_only() {
        let mut storage = MemoryStorage::default();
        storage.write_byte(CONTROLLER_CONFIG_ADDRESS, 1);
        let baseline = storage.write_count();
        let mut state = IdentityState::load(&storage).unwrap();

        assert!(!state.update_preference(&mut storage, UnitSystem::Metric).unwrap());
        assert_eq!(storage.write_count(), baseline);

        assert!(state.update_preference(&mut storage, UnitSystem::Imperial).unwrap());
        assert_eq!(storage.write_count(), baseline + 1);
        assert_eq!(storage.read_byte(CONTROLLER_CONFIG_ADDRESS), 0);
        assert_eq!(state.preference(), UnitSystem::Imperial);
    }

    #[test]
    fn test_static_address_is_not_persisted() {
        let storage = MemoryStorage::default();
        let mut state = IdentityState::load(&storage).unwrap();
        state.use_static_address(42);
        assert_eq!(state.address(), 42);
        assert!(state.has_address());
        assert_eq!(storage.write_count(), 0);
    }
}
