//! Core types shared by the codec, registry and session engine.
//!
//! ## Architecture
//!
//! - [`Frame`] is the closed set of messages the coordinator can send us
//! - [`DeviceId`] names a buzzer, hardware (serial address) or virtual (string)
//! - [`GroupId`] is the identity presses are arbitrated under (team or lone device)
//! - [`DeviceMask`] wraps the coordinator's 16-bit per-device bitmasks
//! - [`UpdateRate`] controls how often display streams are refreshed
//!
//! ## Usage Example
//!
//! ```rust
//! use buzzwire::types::{DeviceId, DeviceMask, StatusSnapshot};
//!
//! let snapshot = StatusSnapshot {
//!     device_mask: DeviceMask::new(0b11),
//!     armed_mask: DeviceMask::new(0b01),
//!     ..StatusSnapshot::default()
//! };
//!
//! assert!(snapshot.device_mask.contains(2));
//! assert!(!snapshot.armed_mask.contains(2));
//! assert_eq!(DeviceId::from("2"), DeviceId::Hardware(2));
//! ```

mod bitfield;
mod frame;
mod ids;
mod update_rate;

pub use bitfield::{DeviceMask, MAX_HARDWARE_DEVICES};
pub use frame::{ButtonPress, DeviceReport, Frame, StatusSnapshot};
pub use ids::{DeviceId, GroupId};
pub use update_rate::UpdateRate;
