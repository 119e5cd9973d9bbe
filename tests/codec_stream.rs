//! Decoding realistic serial captures through the public codec API.

use buzzwire::codec::binary::{encode_button_press, encode_status_snapshot};
use buzzwire::codec::{FrameCodec, ProtocolMode};
use buzzwire::types::{ButtonPress, DeviceId, DeviceMask, Frame, StatusSnapshot};
use proptest::prelude::*;

fn press(device: u8, delta_ms: u32, position: u8) -> ButtonPress {
    ButtonPress { device_id: DeviceId::Hardware(device), device_timestamp: 90_000 + delta_ms, delta_ms, position }
}

fn snapshot(present: u16, armed: u16) -> StatusSnapshot {
    StatusSnapshot {
        device_mask: DeviceMask::new(present),
        armed_mask: DeviceMask::new(armed),
        pressed_mask: DeviceMask::new(0),
        device_timestamp: 90_000,
        game_id: 12,
    }
}

/// Boot noise, a corrupted press, then a clean round.
fn capture() -> (Vec<u8>, Vec<Frame>) {
    let mut bytes = vec![0x00, 0xFF, 0x13, 0x37];
    let mut expected = Vec::new();

    let mut corrupted = encode_button_press(&press(4, 10, 1));
    corrupted[11] ^= 0x01;
    bytes.extend_from_slice(&corrupted);

    let status = snapshot(0b1111, 0b1111);
    bytes.extend_from_slice(&encode_status_snapshot(&status));
    expected.push(Frame::StatusSnapshot(status));

    for (i, device) in [3u8, 1, 2].into_iter().enumerate() {
        bytes.push(0x42);
        let p = press(device, 1_000 + 250 * i as u32, i as u8 + 1);
        bytes.extend_from_slice(&encode_button_press(&p));
        expected.push(Frame::ButtonPress(p));
    }
    (bytes, expected)
}

#[test]
fn noisy_capture_recovers_every_valid_frame() {
    let (bytes, expected) = capture();
    let mut codec = FrameCodec::new(ProtocolMode::Binary);

    let frames: Vec<Frame> = codec.decode(&bytes).collect();
    assert_eq!(frames, expected);

    let stats = codec.stats();
    assert_eq!(stats.frames_decoded, expected.len() as u64);
    assert_eq!(stats.checksum_failures, 1);
    assert_eq!(codec.pending(), 0);
}

#[test]
fn byte_at_a_time_matches_one_shot() {
    let (bytes, expected) = capture();
    let mut codec = FrameCodec::new(ProtocolMode::Binary);

    let mut frames = Vec::new();
    for byte in &bytes {
        frames.extend(codec.decode(std::slice::from_ref(byte)));
    }
    assert_eq!(frames, expected);
}

#[test]
fn text_capture_survives_garbage_lines() {
    let input = b"boot v2.1\r\nSTATUS:device_mask=0x0003,armed_mask=0,pressed_mask=0\n\
                  \xff\xfe\nBUZZER:2,5000,1200,1\nNONSENSE:1\nACK:ARM\n";
    let mut codec = FrameCodec::new(ProtocolMode::Text);
    let frames: Vec<Frame> = codec.decode(input).collect();

    let kinds: Vec<&str> = frames.iter().map(Frame::kind).collect();
    assert_eq!(kinds, vec!["status_snapshot", "button_press", "acknowledge"]);
    assert!(codec.stats().lines_ignored >= 2);
}

proptest! {
    #[test]
    fn chunk_boundaries_do_not_change_the_result(cuts in prop::collection::vec(1usize..24, 1..32)) {
        let (bytes, expected) = capture();
        let mut codec = FrameCodec::new(ProtocolMode::Binary);

        let mut frames = Vec::new();
        let mut rest = bytes.as_slice();
        for cut in cuts.iter().cycle() {
            if rest.is_empty() {
                break;
            }
            let (chunk, tail) = rest.split_at((*cut).min(rest.len()));
            frames.extend(codec.decode(chunk));
            rest = tail;
        }
        prop_assert_eq!(frames, expected);
    }
}
