//! Identifiers for buzzers and contestant groups

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a single buzzer.
///
/// Hardware buzzers behind the coordinator are addressed by a small integer
/// (1-based, matching the bit positions of status masks plus one). Phone-based
/// virtual buzzers carry an opaque string id.
///
/// Deserialization follows the same rule as [`FromStr`], so `1` and `"1"` both name
/// hardware device 1 and `300` is a virtual id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum DeviceId {
    /// Physical buzzer addressed over the serial link
    Hardware(u8),
    /// Virtual buzzer without a serial address
    Virtual(String),
}

impl DeviceId {
    /// Serial address of this device, if it has one.
    ///
    /// Address `0` is reserved for broadcast and is never a device address.
    pub fn address(&self) -> Option<u8> {
        match self {
            DeviceId::Hardware(id) if *id != 0 => Some(*id),
            _ => None,
        }
    }

    /// Whether this device sits behind the serial coordinator.
    pub fn is_hardware(&self) -> bool {
        self.address().is_some()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Hardware(id) => write!(f, "{id}"),
            DeviceId::Virtual(name) => f.write_str(name),
        }
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    /// Numeric ids in `u8` range map to hardware devices, everything else is virtual.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.parse::<u8>() {
            Ok(id) => DeviceId::Hardware(id),
            Err(_) => DeviceId::Virtual(trimmed.to_string()),
        })
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DeviceIdVisitor)
    }
}

struct DeviceIdVisitor;

impl Visitor<'_> for DeviceIdVisitor {
    type Value = DeviceId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a device address or a device name")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<DeviceId, E> {
        Ok(match u8::try_from(v) {
            Ok(id) => DeviceId::Hardware(id),
            Err(_) => DeviceId::Virtual(v.to_string()),
        })
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<DeviceId, E> {
        Ok(match u8::try_from(v) {
            Ok(id) => DeviceId::Hardware(id),
            Err(_) => DeviceId::Virtual(v.to_string()),
        })
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<DeviceId, E> {
        Ok(DeviceId::from(v))
    }
}

impl From<u8> for DeviceId {
    fn from(id: u8) -> Self {
        DeviceId::Hardware(id)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        // Infallible
        id.parse().unwrap_or_else(|never| match never {})
    }
}

/// Identity a press is arbitrated under.
///
/// Devices mapped to a team in the roster resolve to that team. Unmapped
/// devices keep competing under their own device id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupId {
    /// A team from the game roster
    Team(u32),
    /// Fallback identity for a device with no team mapping
    Device(DeviceId),
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupId::Team(team) => write!(f, "team:{team}"),
            GroupId::Device(device) => write!(f, "device:{device}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_parse_as_hardware() {
        assert_eq!("7".parse::<DeviceId>().unwrap(), DeviceId::Hardware(7));
        assert_eq!(" 12 ".parse::<DeviceId>().unwrap(), DeviceId::Hardware(12));
    }

    #[test]
    fn non_numeric_ids_parse_as_virtual() {
        assert_eq!(DeviceId::from("phone-ab12"), DeviceId::Virtual("phone-ab12".to_string()));
        // Out of u8 range is not a serial address
        assert_eq!(DeviceId::from("300"), DeviceId::Virtual("300".to_string()));
    }

    #[test]
    fn quoted_and_bare_numbers_deserialize_alike() {
        let bare: DeviceId = serde_yaml_ng::from_str("1").unwrap();
        let quoted: DeviceId = serde_yaml_ng::from_str("\"1\"").unwrap();
        assert_eq!(bare, DeviceId::Hardware(1));
        assert_eq!(quoted, DeviceId::Hardware(1));

        let wide: DeviceId = serde_yaml_ng::from_str("300").unwrap();
        assert_eq!(wide, DeviceId::Virtual("300".into()));
        let negative: DeviceId = serde_yaml_ng::from_str("-1").unwrap();
        assert_eq!(negative, DeviceId::Virtual("-1".into()));
        let name: DeviceId = serde_yaml_ng::from_str("phone-ab12").unwrap();
        assert_eq!(name, DeviceId::from("phone-ab12"));
    }

    #[test]
    fn serialized_ids_read_back_unchanged() {
        for id in [DeviceId::Hardware(4), DeviceId::from("phone-ab12"), DeviceId::from("300")] {
            let yaml = serde_yaml_ng::to_string(&id).unwrap();
            assert_eq!(serde_yaml_ng::from_str::<DeviceId>(&yaml).unwrap(), id);
        }
    }

    #[test]
    fn broadcast_address_is_not_a_device() {
        assert_eq!(DeviceId::Hardware(0).address(), None);
        assert_eq!(DeviceId::Hardware(3).address(), Some(3));
        assert!(!DeviceId::from("phone").is_hardware());
    }

    #[test]
    fn group_display_is_prefixed() {
        assert_eq!(GroupId::Team(4).to_string(), "team:4");
        assert_eq!(GroupId::Device(DeviceId::Hardware(2)).to_string(), "device:2");
    }
}
