//! Binary device-to-host framing
//!
//! ```text
//! ButtonPress (12 bytes)
//!   0     1     2      3..7          7..9        9         10        11
//!   0xAA  0x01  dev    timestamp LE  delta LE    position  reserved  xor
//!
//! StatusSnapshot (17 bytes)
//!   0     1     2..4       4..6      6..8       8..12         12..16     16
//!   0xAA  0x02  present    armed     pressed    timestamp LE  game LE    xor
//! ```
//!
//! The checksum byte is the XOR of every byte before it.

use crate::types::{ButtonPress, DeviceId, DeviceMask, Frame, StatusSnapshot};

/// Header byte of every device-to-host frame.
pub const DEVICE_HEADER: u8 = 0xAA;

pub const BUTTON_PRESS_TYPE: u8 = 0x01;
pub const STATUS_SNAPSHOT_TYPE: u8 = 0x02;

pub const BUTTON_PRESS_LEN: usize = 12;
pub const STATUS_SNAPSHOT_LEN: usize = 17;

/// Longest device-to-host frame; the decoder never holds more than this minus one
/// byte of unconsumed input in binary mode.
pub const MAX_FRAME_LEN: usize = STATUS_SNAPSHOT_LEN;

/// Outcome of inspecting the front of the buffer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Step {
    /// A complete, verified frame spanning `consumed` bytes
    Frame { frame: Frame, consumed: usize },
    /// A complete frame whose checksum did not match; skip all of it
    BadChecksum { consumed: usize },
    /// Not a frame start; skip exactly one byte and retry
    Resync,
    /// Need more bytes before anything can be decided
    Incomplete,
}

/// XOR of all bytes.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

fn frame_len(discriminant: u8) -> Option<usize> {
    match discriminant {
        BUTTON_PRESS_TYPE => Some(BUTTON_PRESS_LEN),
        STATUS_SNAPSHOT_TYPE => Some(STATUS_SNAPSHOT_LEN),
        _ => None,
    }
}

/// Inspect the front of `buf` without consuming anything.
pub(crate) fn step(buf: &[u8]) -> Step {
    let Some(&header) = buf.first() else {
        return Step::Incomplete;
    };
    if header != DEVICE_HEADER {
        return Step::Resync;
    }
    let Some(&discriminant) = buf.get(1) else {
        return Step::Incomplete;
    };
    let Some(len) = frame_len(discriminant) else {
        return Step::Resync;
    };
    if buf.len() < len {
        return Step::Incomplete;
    }

    let bytes = &buf[..len];
    if checksum(&bytes[..len - 1]) != bytes[len - 1] {
        return Step::BadChecksum { consumed: len };
    }

    let frame = match discriminant {
        BUTTON_PRESS_TYPE => Frame::ButtonPress(parse_button_press(bytes)),
        _ => Frame::StatusSnapshot(parse_status_snapshot(bytes)),
    };
    Step::Frame { frame, consumed: len }
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

// Callers guarantee `bytes.len() == BUTTON_PRESS_LEN`.
fn parse_button_press(bytes: &[u8]) -> ButtonPress {
    ButtonPress {
        device_id: DeviceId::Hardware(bytes[2]),
        device_timestamp: u32_at(bytes, 3),
        delta_ms: u32::from(u16_at(bytes, 7)),
        position: bytes[9],
    }
}

// Callers guarantee `bytes.len() == STATUS_SNAPSHOT_LEN`.
fn parse_status_snapshot(bytes: &[u8]) -> StatusSnapshot {
    StatusSnapshot {
        device_mask: DeviceMask::new(u16_at(bytes, 2)),
        armed_mask: DeviceMask::new(u16_at(bytes, 4)),
        pressed_mask: DeviceMask::new(u16_at(bytes, 6)),
        device_timestamp: u32_at(bytes, 8),
        game_id: u32_at(bytes, 12),
    }
}

/// Encode a press the way the coordinator would send it.
///
/// Virtual devices have no serial address and encode as address 0. Deltas beyond
/// the 16-bit field saturate.
pub fn encode_button_press(press: &ButtonPress) -> [u8; BUTTON_PRESS_LEN] {
    let mut out = [0u8; BUTTON_PRESS_LEN];
    out[0] = DEVICE_HEADER;
    out[1] = BUTTON_PRESS_TYPE;
    out[2] = press.device_id.address().unwrap_or(0);
    out[3..7].copy_from_slice(&press.device_timestamp.to_le_bytes());
    let delta = u16::try_from(press.delta_ms).unwrap_or(u16::MAX);
    out[7..9].copy_from_slice(&delta.to_le_bytes());
    out[9] = press.position;
    out[11] = checksum(&out[..11]);
    out
}

/// Encode a status snapshot the way the coordinator would send it.
pub fn encode_status_snapshot(snapshot: &StatusSnapshot) -> [u8; STATUS_SNAPSHOT_LEN] {
    let mut out = [0u8; STATUS_SNAPSHOT_LEN];
    out[0] = DEVICE_HEADER;
    out[1] = STATUS_SNAPSHOT_TYPE;
    out[2..4].copy_from_slice(&snapshot.device_mask.value().to_le_bytes());
    out[4..6].copy_from_slice(&snapshot.armed_mask.value().to_le_bytes());
    out[6..8].copy_from_slice(&snapshot.pressed_mask.value().to_le_bytes());
    out[8..12].copy_from_slice(&snapshot.device_timestamp.to_le_bytes());
    out[12..16].copy_from_slice(&snapshot.game_id.to_le_bytes());
    out[16] = checksum(&out[..16]);
    out
}
