//! Test utilities for building coordinator byte streams
//!
//! This module provides frame builders and a synthetic capture generator used by
//! unit tests, integration tests and the decoder benchmark.

#![cfg(any(test, feature = "benchmark"))]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::codec::binary::{encode_button_press, encode_status_snapshot};
use crate::types::{ButtonPress, DeviceId, DeviceMask, StatusSnapshot};

/// Encoded 12-byte press frame for a hardware device.
pub fn press_bytes(device: u8, delta_ms: u16, position: u8) -> [u8; 12] {
    encode_button_press(&ButtonPress {
        device_id: DeviceId::Hardware(device),
        device_timestamp: u32::from(delta_ms) + 1_000,
        delta_ms: u32::from(delta_ms),
        position,
    })
}

/// Encoded 17-byte status frame with the given masks.
pub fn status_bytes(device_mask: u16, armed_mask: u16, pressed_mask: u16) -> [u8; 17] {
    encode_status_snapshot(&StatusSnapshot {
        device_mask: DeviceMask::new(device_mask),
        armed_mask: DeviceMask::new(armed_mask),
        pressed_mask: DeviceMask::new(pressed_mask),
        device_timestamp: 0,
        game_id: 1,
    })
}

/// Wall-clock instant `ms` milliseconds after a fixed origin.
///
/// Tests use this instead of `SystemTime::now()` so liveness arithmetic is exact.
pub fn wall_clock(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000) + Duration::from_millis(ms)
}

/// Synthetic capture of a noisy serial line.
///
/// Contains `frames` valid frames (presses and status snapshots alternating) with a
/// deterministic pattern of junk bytes between them. Junk never contains the
/// `0xAA` header byte, so every frame is recoverable.
///
/// Returns the stream and the number of valid frames it contains.
pub fn noisy_capture(frames: usize) -> (Vec<u8>, usize) {
    let mut stream = Vec::with_capacity(frames * 20);
    let mut junk_seed: u32 = 0x2545_F491;

    for i in 0..frames {
        junk_seed ^= junk_seed << 13;
        junk_seed ^= junk_seed >> 17;
        junk_seed ^= junk_seed << 5;
        for j in 0..(junk_seed % 4) {
            let byte = (junk_seed >> (j * 8)) as u8;
            stream.push(if byte == 0xAA { 0x55 } else { byte });
        }

        let device = (i % 16) as u8 + 1;
        if i % 2 == 0 {
            stream.extend_from_slice(&press_bytes(device, (i * 37 % 30_000) as u16, (i % 8) as u8 + 1));
        } else {
            stream.extend_from_slice(&status_bytes(0xFFFF, 1 << (i % 16), 0));
        }
    }

    (stream, frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FrameCodec, ProtocolMode};

    #[test]
    fn noisy_capture_decodes_completely() {
        let (stream, expected) = noisy_capture(200);
        let mut codec = FrameCodec::new(ProtocolMode::Binary);
        assert_eq!(codec.decode(&stream).count(), expected);
        assert!(codec.stats().bytes_discarded > 0);
    }

    #[test]
    fn wall_clock_is_monotonic() {
        assert!(wall_clock(1) > wall_clock(0));
        assert_eq!(wall_clock(70_000).duration_since(wall_clock(0)).unwrap(), Duration::from_secs(70));
    }
}
