//! DeviceMask type for the coordinator's per-device bitmasks

use serde::{Deserialize, Serialize};

/// Number of hardware buzzers a 16-bit status mask can address.
pub const MAX_HARDWARE_DEVICES: u8 = 16;

/// 16-bit device bitmask as reported by the coordinator.
///
/// Bit `i` describes hardware device `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceMask(pub u16);

impl DeviceMask {
    /// Create a new DeviceMask from a raw u16 value.
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Check if a specific bit is set.
    pub fn is_set(&self, bit: u8) -> bool {
        bit < MAX_HARDWARE_DEVICES && (self.0 & (1 << bit)) != 0
    }

    /// Check whether the bit for a 1-based device address is set.
    pub fn contains(&self, device: u8) -> bool {
        device != 0 && self.is_set(device - 1)
    }

    /// Build a mask from 1-based device addresses; out-of-range addresses are ignored.
    pub fn from_devices<I: IntoIterator<Item = u8>>(devices: I) -> Self {
        let bits = devices
            .into_iter()
            .filter(|d| (1..=MAX_HARDWARE_DEVICES).contains(d))
            .fold(0u16, |acc, d| acc | (1 << (d - 1)));
        Self(bits)
    }

    /// Iterate the 1-based device addresses whose bits are set.
    pub fn devices(&self) -> impl Iterator<Item = u8> + '_ {
        (0..MAX_HARDWARE_DEVICES).filter(|bit| self.is_set(*bit)).map(|bit| bit + 1)
    }

    /// Get the raw u16 value.
    pub fn value(&self) -> u16 {
        self.0
    }
}
