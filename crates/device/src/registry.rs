//! The concurrent index of live device sessions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::Device;
use crate::error::DeviceError;
use crate::id::DeviceId;

/// ID → device map with a ceiling on resident entries.
///
/// All operations hold the one reader-writer lock and never yield under
/// it. Predicates and visitors therefore must not call back into anything
/// that takes registry locks, or they will deadlock.
#[derive(Debug)]
pub(crate) struct Registry {
    devices: RwLock<HashMap<DeviceId, Arc<Device>>>,
    max_devices: usize,
}

impl Registry {
    pub(crate) fn new(initial_capacity: usize, max_devices: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::with_capacity(initial_capacity)),
            max_devices,
        }
    }

    pub(crate) fn max_devices(&self) -> usize {
        self.max_devices
    }

    pub(crate) fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Admits a device.
    ///
    /// A resident device under the same ID is atomically replaced and
    /// returned so the caller can close it; replacement does not change
    /// the resident count. Otherwise the insert fails when the registry
    /// is already at its ceiling.
    pub(crate) fn add(&self, device: Arc<Device>) -> Result<Option<Arc<Device>>, DeviceError> {
        let mut devices = self.devices.write();

        if devices.contains_key(device.id()) {
            let id = device.id().clone();
            return Ok(devices.insert(id, device));
        }

        if devices.len() >= self.max_devices {
            return Err(DeviceError::CapacityExceeded {
                limit: self.max_devices,
            });
        }

        let id = device.id().clone();
        devices.insert(id, device);
        Ok(None)
    }

    /// Removes `device` only while it is still the resident entry for its
    /// ID, so a stale pump cleanup cannot evict a fresh replacement.
    pub(crate) fn remove(&self, device: &Arc<Device>) -> bool {
        let mut devices = self.devices.write();
        match devices.get(device.id()) {
            Some(resident) if Arc::ptr_eq(resident, device) => {
                devices.remove(device.id());
                true
            }
            _ => false,
        }
    }

    /// Removes whatever device is resident under `id`.
    pub(crate) fn remove_id(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.write().remove(id)
    }

    pub(crate) fn get(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.read().get(id).cloned()
    }

    /// Applies `visitor` to every resident device; returns how many were
    /// visited.
    pub(crate) fn visit_all(&self, mut visitor: impl FnMut(&Arc<Device>)) -> usize {
        let devices = self.devices.read();
        for device in devices.values() {
            visitor(device);
        }
        devices.len()
    }

    /// Applies `visitor` to every device whose ID satisfies `predicate`.
    pub(crate) fn visit_if(
        &self,
        predicate: impl Fn(&DeviceId) -> bool,
        mut visitor: impl FnMut(&Arc<Device>),
    ) -> usize {
        let devices = self.devices.read();
        let mut visited = 0;
        for (id, device) in devices.iter() {
            if predicate(id) {
                visitor(device);
                visited += 1;
            }
        }
        visited
    }

    /// Removes every device whose ID satisfies `predicate`, applying
    /// `on_removed` to each.
    pub(crate) fn remove_if(
        &self,
        predicate: impl Fn(&DeviceId) -> bool,
        mut on_removed: impl FnMut(&Arc<Device>),
    ) -> usize {
        let mut devices = self.devices.write();
        let matching: Vec<DeviceId> = devices.keys().filter(|id| predicate(id)).cloned().collect();

        let mut removed = 0;
        for id in matching {
            if let Some(device) = devices.remove(&id) {
                on_removed(&device);
                removed += 1;
            }
        }
        removed
    }
}
