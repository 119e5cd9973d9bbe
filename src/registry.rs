//! Device liveness registry
//!
//! Tracks the last reported state of every buzzer the coordinator has told us
//! about. Entries are created on first sight and never removed; a device that goes
//! silent simply becomes stale.
//!
//! A device is online only while both hold:
//!
//! - its most recent report said `online`, and
//! - that report is younger than the staleness threshold.
//!
//! The registry's own threshold is the authoritative one used by the engine.
//! Display layers may ask with a looser threshold through [`DeviceRegistry::is_online`].

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

use crate::types::{DeviceId, DeviceReport, StatusSnapshot};

/// Authoritative staleness threshold used when none is configured.
pub const DEFAULT_STALENESS: Duration = Duration::from_millis(60_000);

/// Last known state of one buzzer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: DeviceId,
    /// Last reported online flag (not staleness-adjusted)
    pub online: bool,
    pub armed: bool,
    pub pressed: bool,
    pub mac: Option<String>,
    pub battery_pct: Option<u8>,
    pub battery_volts: Option<f32>,
    pub last_seen_at: SystemTime,
    /// Never moves backwards and is never cleared by an offline report
    pub last_online_at: Option<SystemTime>,
}

impl Device {
    fn new(id: DeviceId, seen_at: SystemTime) -> Self {
        Self {
            id,
            online: false,
            armed: false,
            pressed: false,
            mac: None,
            battery_pct: None,
            battery_volts: None,
            last_seen_at: seen_at,
            last_online_at: None,
        }
    }

    /// Online check against an explicit threshold.
    pub fn is_online(&self, now: SystemTime, threshold: Duration) -> bool {
        // A report stamped in the future (clock step) counts as fresh.
        let age = now.duration_since(self.last_seen_at).unwrap_or(Duration::ZERO);
        self.online && age < threshold
    }

    fn seen(&mut self, at: SystemTime) {
        self.last_seen_at = self.last_seen_at.max(at);
    }

    fn set_online(&mut self, online: bool, at: SystemTime) {
        self.online = online;
        if online {
            self.last_online_at = Some(self.last_online_at.map_or(at, |prev| prev.max(at)));
        }
    }

    fn observable(&self) -> (bool, bool, bool, Option<u8>) {
        (self.online, self.armed, self.pressed, self.battery_pct)
    }

    /// View of this device resolved against the authoritative and display thresholds.
    pub fn status(&self, now: SystemTime, threshold: Duration, display_threshold: Duration) -> DeviceStatus {
        DeviceStatus {
            device_id: self.id.clone(),
            online: self.is_online(now, threshold),
            display_online: self.is_online(now, display_threshold),
            armed: self.armed,
            pressed: self.pressed,
            battery_pct: self.battery_pct,
            battery_volts: self.battery_volts,
            mac: self.mac.clone(),
            last_seen_at: self.last_seen_at,
            last_online_at: self.last_online_at,
        }
    }
}

/// Device state as published to displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub device_id: DeviceId,
    /// Staleness-adjusted with the authoritative threshold
    pub online: bool,
    /// Staleness-adjusted with the display threshold
    pub display_online: bool,
    pub armed: bool,
    pub pressed: bool,
    pub battery_pct: Option<u8>,
    pub battery_volts: Option<f32>,
    pub mac: Option<String>,
    pub last_seen_at: SystemTime,
    pub last_online_at: Option<SystemTime>,
}

/// Registry of every device seen on this stream.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Device>,
    staleness: Duration,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS)
    }
}

impl DeviceRegistry {
    /// Create an empty registry with the authoritative staleness threshold.
    pub fn new(staleness: Duration) -> Self {
        Self { devices: HashMap::new(), staleness }
    }

    /// Authoritative staleness threshold.
    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    fn entry(&mut self, id: DeviceId, at: SystemTime) -> &mut Device {
        self.devices.entry(id).or_insert_with_key(|id| {
            debug!(device_id = %id, "New device registered");
            Device::new(id.clone(), at)
        })
    }

    /// Apply a single-device report received at `received_at`.
    ///
    /// Returns the id if the device's observable status (online, armed, pressed,
    /// battery) changed, including when the device was first created.
    pub fn apply_report(&mut self, report: &DeviceReport, received_at: SystemTime) -> Option<DeviceId> {
        let Some(id) = report.device_id.clone() else {
            trace!("Ignoring device report without an id");
            return None;
        };

        let is_new = !self.devices.contains_key(&id);
        let device = self.entry(id.clone(), received_at);
        let before = device.observable();

        device.seen(received_at);
        if let Some(online) = report.online {
            device.set_online(online, received_at);
        }
        if let Some(armed) = report.armed {
            device.armed = armed;
        }
        if let Some(pressed) = report.pressed {
            device.pressed = pressed;
        }
        if let Some(mac) = &report.mac {
            device.mac = Some(mac.clone());
        }
        if let Some(pct) = report.battery_pct {
            device.battery_pct = Some(pct);
        }
        if let Some(volts) = report.battery_volts {
            device.battery_volts = Some(volts);
        }

        (is_new || device.observable() != before).then_some(id)
    }

    /// Apply a coordinator status snapshot received at `received_at`.
    ///
    /// Only devices present in the snapshot's device mask are touched. Returns the
    /// ids whose observable status changed.
    pub fn apply_snapshot(&mut self, snapshot: &StatusSnapshot, received_at: SystemTime) -> Vec<DeviceId> {
        let mut changed = Vec::new();

        for address in snapshot.device_mask.devices() {
            let id = DeviceId::Hardware(address);
            let is_new = !self.devices.contains_key(&id);
            let device = self.entry(id.clone(), received_at);
            let before = device.observable();

            device.seen(received_at);
            device.set_online(true, received_at);
            device.armed = snapshot.armed_mask.contains(address);
            device.pressed = snapshot.pressed_mask.contains(address);

            if is_new || device.observable() != before {
                changed.push(id);
            }
        }

        changed
    }

    /// Online check against an explicit threshold (e.g. a display's debounce window).
    pub fn is_online(&self, id: &DeviceId, now: SystemTime, threshold: Duration) -> bool {
        self.devices.get(id).is_some_and(|d| d.is_online(now, threshold))
    }

    /// Online check against the authoritative threshold.
    pub fn is_live(&self, id: &DeviceId, now: SystemTime) -> bool {
        self.is_online(id, now, self.staleness)
    }

    /// Look up one device.
    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Every device, ordered by id.
    pub fn statuses(&self, now: SystemTime, display_threshold: Duration) -> Vec<DeviceStatus> {
        let mut statuses: Vec<DeviceStatus> =
            self.devices.values().map(|d| d.status(now, self.staleness, display_threshold)).collect();
        statuses.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        statuses
    }

    /// Hardware addresses currently live by the authoritative threshold, ascending.
    pub fn live_addresses(&self, now: SystemTime) -> Vec<u8> {
        let mut addresses: Vec<u8> = self
            .devices
            .values()
            .filter(|d| d.is_online(now, self.staleness))
            .filter_map(|d| d.id.address())
            .collect();
        addresses.sort_unstable();
        addresses
    }

    /// Number of known devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no device has reported yet.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
