//! Deduplicating registry of devices seen during a scan.

use std::collections::HashMap;

use wishring_types::RingDevice;

/// Tracks devices observed during a single scan session.
///
/// Each address is emitted to the consumer at most once per session, but
/// later advertisements still supersede the stored record so that signal
/// strength and name stay current.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, RingDevice>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation. Returns `true` when this is the first time
    /// the address has been seen this session, meaning the device should be
    /// emitted to the consumer.
    pub fn observe(&mut self, device: RingDevice) -> bool {
        self.devices
            .insert(device.address.clone(), device)
            .is_none()
    }

    /// Returns the most recent record for an address, if seen.
    pub fn get(&self, address: &str) -> Option<&RingDevice> {
        self.devices.get(address)
    }

    /// All devices seen this session, strongest signal first.
    pub fn devices(&self) -> Vec<RingDevice> {
        let mut all: Vec<_> = self.devices.values().cloned().collect();
        all.sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength));
        all
    }

    /// Number of distinct addresses seen.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` if nothing has been observed yet.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Forgets everything, starting a fresh session.
    pub fn clear(&mut self) {
        self.devices.clear();
    }
}
