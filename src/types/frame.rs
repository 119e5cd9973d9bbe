//! Decoded protocol messages

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{DeviceId, DeviceMask};

/// A press reported by the coordinator.
///
/// `device_timestamp` and `delta_ms` come from the coordinator's own clock and are
/// kept for diagnostics; arbitration timing uses the host receipt time instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonPress {
    pub device_id: DeviceId,
    pub device_timestamp: u32,
    pub delta_ms: u32,
    pub position: u8,
}

/// Periodic summary of every hardware buzzer behind the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Devices currently present and reachable
    pub device_mask: DeviceMask,
    pub armed_mask: DeviceMask,
    pub pressed_mask: DeviceMask,
    pub device_timestamp: u32,
    pub game_id: u32,
}

/// Detailed report for a single device.
///
/// Flags are `None` when the report did not carry them (or carried them in a
/// non-boolean encoding); a missing flag leaves the registry's state untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceReport {
    pub device_id: Option<DeviceId>,
    pub online: Option<bool>,
    pub armed: Option<bool>,
    pub pressed: Option<bool>,
    pub mac: Option<String>,
    pub battery_pct: Option<u8>,
    pub battery_volts: Option<f32>,
    /// Fields whose values were not understood, kept verbatim
    pub raw: BTreeMap<String, String>,
}

impl DeviceReport {
    /// Empty report for a device; callers fill in the fields they know.
    pub fn for_device(device_id: impl Into<DeviceId>) -> Self {
        Self { device_id: Some(device_id.into()), ..Self::default() }
    }
}

/// One decoded unit of the device-to-host stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    ButtonPress(ButtonPress),
    StatusSnapshot(StatusSnapshot),
    DeviceReport(DeviceReport),
    Acknowledge { text: String },
    ProtocolError { text: String },
}

impl Frame {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::ButtonPress(_) => "button_press",
            Frame::StatusSnapshot(_) => "status_snapshot",
            Frame::DeviceReport(_) => "device_report",
            Frame::Acknowledge { .. } => "acknowledge",
            Frame::ProtocolError { .. } => "protocol_error",
        }
    }
}
