use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::RegistryError;

pub const ENDPOINT_CAPACITY: usize = 6;

pub type EndpointSlots = [EndpointSlot; ENDPOINT_CAPACITY];

/// One destination record. Host and port stay text until send time.
///
/// Slots built with `new` or stored in a registry are normalized: both fields
/// are trimmed, and a slot missing either half is fully empty. A normalized
/// slot survives the settings file unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointSlot {
    pub host: String,
    pub port: String,
}

impl EndpointSlot {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
        .normalized()
    }

    pub fn normalized(self) -> Self {
        let host = self.host.trim();
        let port = self.port.trim();
        if host.is_empty() || port.is_empty() {
            return Self::default();
        }
        Self {
            host: host.to_string(),
            port: port.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.host.trim().is_empty() || self.port.trim().is_empty()
    }
}

/// Six destination slots shared between the operator, discovery and the
/// broadcaster. Clones share the same table.
#[derive(Clone, Debug, Default)]
pub struct EndpointRegistry {
    slots: Arc<Mutex<EndpointSlots>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: EndpointSlots) -> Self {
        Self {
            slots: Arc::new(Mutex::new(slots.map(EndpointSlot::normalized))),
        }
    }

    pub fn capacity(&self) -> usize {
        ENDPOINT_CAPACITY
    }

    pub fn set(
        &self,
        index: usize,
        host: impl Into<String>,
        port: impl Into<String>,
    ) -> Result<(), RegistryError> {
        if index >= ENDPOINT_CAPACITY {
            return Err(RegistryError::SlotOutOfRange {
                index,
                capacity: ENDPOINT_CAPACITY,
            });
        }
        self.lock()[index] = EndpointSlot::new(host, port);
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<EndpointSlot, RegistryError> {
        self.lock()
            .get(index)
            .cloned()
            .ok_or(RegistryError::SlotOutOfRange {
                index,
                capacity: ENDPOINT_CAPACITY,
            })
    }

    pub fn replace_all(&self, slots: EndpointSlots) {
        *self.lock() = slots.map(EndpointSlot::normalized);
    }

    /// Writes into the first empty slot, returning its index, or `None` when
    /// every slot is already occupied.
    pub fn claim_free(&self, host: impl Into<String>, port: impl Into<String>) -> Option<usize> {
        let mut slots = self.lock();
        let index = slots.iter().position(EndpointSlot::is_empty)?;
        slots[index] = EndpointSlot::new(host, port);
        Some(index)
    }

    pub fn snapshot(&self) -> EndpointSlots {
        self.lock().clone()
    }

    pub fn occupied(&self) -> usize {
        self.lock().iter().filter(|slot| !slot.is_empty()).count()
    }

    fn lock(&self) -> MutexGuard<'_, EndpointSlots> {
        // Slots are replaced whole, so a poisoned table is still consistent.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
