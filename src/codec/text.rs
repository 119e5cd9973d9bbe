//! Legacy line-oriented text protocol
//!
//! ```text
//! BUZZER:3,120034,5120,1
//! STATUS:device_mask=0x0007,armed_mask=3,pressed_mask=0,timestamp=120000,game_id=12
//! DEVICE:3,online=1,armed=0,pressed=0,mac=24:6F:28:AA:10:03,battery_percentage=87,battery_voltage=3.92
//! ACK:ARM
//! ERROR:checksum mismatch
//! ```
//!
//! `1`/`0` is the only accepted boolean encoding. A value that does not parse as
//! the type its key expects is kept verbatim in [`DeviceReport::raw`]. A `STATUS`
//! line with an unparseable mask, timestamp or game id is dropped whole; a
//! snapshot of zeros would mark every device offline.

use std::collections::BTreeMap;

use crate::types::{ButtonPress, DeviceId, DeviceMask, DeviceReport, Frame, StatusSnapshot};

/// Lines longer than this without a terminator are treated as line noise.
pub const MAX_LINE_LEN: usize = 512;

/// Parse one line (without its terminator).
///
/// Returns `None` for blank lines, unknown prefixes, and malformed records.
pub fn parse_line(line: &str) -> Option<Frame> {
    let line = line.trim();
    let (prefix, body) = line.split_once(':')?;

    match prefix {
        "BUZZER" => parse_buzzer(body).map(Frame::ButtonPress),
        "STATUS" => parse_status(body).map(Frame::StatusSnapshot),
        "DEVICE" => parse_device(body).map(Frame::DeviceReport),
        "ACK" => Some(Frame::Acknowledge { text: body.trim().to_string() }),
        "ERROR" => Some(Frame::ProtocolError { text: body.trim().to_string() }),
        _ => None,
    }
}

fn parse_buzzer(body: &str) -> Option<ButtonPress> {
    let mut parts = body.split(',').map(str::trim);
    let device_id: DeviceId = parts.next().filter(|s| !s.is_empty())?.into();
    let device_timestamp = parts.next()?.parse().ok()?;
    let delta_ms = parts.next()?.parse().ok()?;
    let position = parts.next()?.parse().ok()?;
    Some(ButtonPress { device_id, device_timestamp, delta_ms, position })
}

fn key_values(body: &str) -> impl Iterator<Item = (&str, &str)> {
    body.split(',').filter_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        Some((key.trim(), value.trim()))
    })
}

fn parse_u16(value: &str) -> Option<u16> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

fn is_mac(value: &str) -> bool {
    let octets: Vec<&str> = value.split(':').collect();
    octets.len() == 6
        && octets.iter().all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Missing keys stay zero. Unknown keys are skipped.
fn parse_status(body: &str) -> Option<StatusSnapshot> {
    let mut snapshot = StatusSnapshot::default();
    for (key, value) in key_values(body) {
        match key {
            "device_mask" => snapshot.device_mask = DeviceMask::new(parse_u16(value)?),
            "armed_mask" => snapshot.armed_mask = DeviceMask::new(parse_u16(value)?),
            "pressed_mask" => snapshot.pressed_mask = DeviceMask::new(parse_u16(value)?),
            "timestamp" => snapshot.device_timestamp = value.parse().ok()?,
            "game_id" => snapshot.game_id = value.parse().ok()?,
            _ => {}
        }
    }
    Some(snapshot)
}

fn parse_device(body: &str) -> Option<DeviceReport> {
    let (id, fields) = match body.split_once(',') {
        Some((id, fields)) => (id.trim(), fields),
        None => (body.trim(), ""),
    };
    if id.is_empty() {
        return None;
    }

    let mut report = DeviceReport { device_id: Some(id.into()), ..DeviceReport::default() };
    let mut raw = BTreeMap::new();

    for (key, value) in key_values(fields) {
        let understood = match key {
            "online" => parse_flag(value).map(|v| report.online = Some(v)),
            "armed" => parse_flag(value).map(|v| report.armed = Some(v)),
            "pressed" => parse_flag(value).map(|v| report.pressed = Some(v)),
            "mac" if is_mac(value) => {
                report.mac = Some(value.to_ascii_uppercase());
                Some(())
            }
            "battery_percentage" => value.parse::<u8>().ok().map(|v| report.battery_pct = Some(v)),
            "battery_voltage" => value.parse::<f32>().ok().map(|v| report.battery_volts = Some(v)),
            _ => None,
        };
        if understood.is_none() {
            raw.insert(key.to_string(), value.to_string());
        }
    }

    report.raw = raw;
    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buzzer_line() {
        let frame = parse_line("BUZZER:3,120034,5120,1").unwrap();
        assert_eq!(
            frame,
            Frame::ButtonPress(ButtonPress {
                device_id: DeviceId::Hardware(3),
                device_timestamp: 120034,
                delta_ms: 5120,
                position: 1,
            })
        );
    }

    #[test]
    fn malformed_buzzer_line_is_dropped() {
        assert_eq!(parse_line("BUZZER:3,abc,5120,1"), None);
        assert_eq!(parse_line("BUZZER:3,1,2"), None);
        assert_eq!(parse_line("BUZZER:"), None);
    }

    #[test]
    fn status_line_accepts_hex_and_decimal_masks() {
        let frame = parse_line("STATUS:device_mask=0x0007,armed_mask=3,pressed_mask=0,game_id=12").unwrap();
        let Frame::StatusSnapshot(snapshot) = frame else { panic!("expected snapshot") };
        assert_eq!(snapshot.device_mask.value(), 7);
        assert_eq!(snapshot.armed_mask.value(), 3);
        assert_eq!(snapshot.pressed_mask.value(), 0);
        assert_eq!(snapshot.game_id, 12);
    }

    #[test]
    fn status_line_with_garbled_value_is_dropped() {
        assert_eq!(parse_line("STATUS:device_mask=0xZZ,armed_mask=0,pressed_mask=0"), None);
        assert_eq!(parse_line("STATUS:device_mask=7,armed_mask=70000"), None);
        assert_eq!(parse_line("STATUS:device_mask=7,timestamp=soon"), None);
        assert_eq!(parse_line("STATUS:device_mask=7,game_id=-1"), None);

        // Absent keys and unknown keys are not errors.
        let Some(Frame::StatusSnapshot(snapshot)) = parse_line("STATUS:device_mask=5,rssi=-60") else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.device_mask.value(), 5);
        assert_eq!(snapshot.device_timestamp, 0);
    }

    #[test]
    fn device_line_with_all_fields() {
        let frame = parse_line(
            "DEVICE:3,online=1,armed=0,pressed=0,mac=24:6f:28:aa:10:03,battery_percentage=87,battery_voltage=3.92",
        )
        .unwrap();
        let Frame::DeviceReport(report) = frame else { panic!("expected device report") };
        assert_eq!(report.device_id, Some(DeviceId::Hardware(3)));
        assert_eq!(report.online, Some(true));
        assert_eq!(report.armed, Some(false));
        assert_eq!(report.pressed, Some(false));
        assert_eq!(report.mac.as_deref(), Some("24:6F:28:AA:10:03"));
        assert_eq!(report.battery_pct, Some(87));
        assert!((report.battery_volts.unwrap() - 3.92).abs() < 1e-6);
        assert!(report.raw.is_empty());
    }

    #[test]
    fn non_numeric_booleans_are_kept_raw() {
        let Some(Frame::DeviceReport(report)) = parse_line("DEVICE:phone-7,online=true,rssi=-60") else {
            panic!("expected device report");
        };
        assert_eq!(report.device_id, Some(DeviceId::Virtual("phone-7".to_string())));
        assert_eq!(report.online, None);
        assert_eq!(report.raw.get("online").map(String::as_str), Some("true"));
        assert_eq!(report.raw.get("rssi").map(String::as_str), Some("-60"));
    }

    #[test]
    fn ack_and_error_lines() {
        assert_eq!(parse_line("ACK:ARM"), Some(Frame::Acknowledge { text: "ARM".to_string() }));
        assert_eq!(
            parse_line("ERROR: checksum mismatch "),
            Some(Frame::ProtocolError { text: "checksum mismatch".to_string() })
        );
    }

    #[test]
    fn unknown_prefixes_and_blank_lines_are_ignored() {
        assert_eq!(parse_line("WIFI:channel=6"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("no colon here"), None);
    }
}
