//! Engine configuration
//!
//! Loaded from YAML; every key is optional.
//!
//! ```yaml
//! serial_port: /dev/ttyUSB0
//! binary_protocol: true
//! time_based_scoring: true
//! staleness_threshold_ms: 60000
//! display_staleness_threshold_ms: 90000
//! game_id: 7
//! roster:
//!   1: 10
//!   2: 10
//!   3: 11
//!   phone-ab12: 11
//! participants: [1, 2, 3]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::arbitration::Roster;
use crate::codec::ProtocolMode;
use crate::registry::DEFAULT_STALENESS;
use crate::{BuzzerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Coordinator device node; `None` runs without hardware
    pub serial_port: Option<PathBuf>,
    /// Binary framing when true, legacy text lines when false
    pub binary_protocol: bool,
    pub time_based_scoring: bool,
    /// Authoritative liveness threshold
    pub staleness_threshold_ms: u64,
    /// Looser threshold for displays, defaults to the authoritative one
    pub display_staleness_threshold_ms: Option<u64>,
    /// How often device liveness is re-evaluated
    pub liveness_poll_ms: u64,
    /// Session id carried in every command frame
    pub game_id: u32,
    /// Events buffered per subscriber before the slowest one starts losing them
    pub event_capacity: usize,
    pub roster: Roster,
    /// Devices armed when a question names no targets; all devices when absent
    pub participants: Option<Vec<u8>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: None,
            binary_protocol: true,
            time_based_scoring: false,
            staleness_threshold_ms: DEFAULT_STALENESS.as_millis() as u64,
            display_staleness_threshold_ms: None,
            liveness_poll_ms: 1_000,
            game_id: 1,
            event_capacity: 256,
            roster: Roster::default(),
            participants: None,
        }
    }
}

impl Config {
    /// Read and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| BuzzerError::io(path.display().to_string(), e))?;
        Self::parse_at(&text, path)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Self::parse_at(text, Path::new("<inline>"))
    }

    fn parse_at(text: &str, path: &Path) -> Result<Self> {
        // An empty document means "all defaults".
        let config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml_ng::from_str::<Config>(text).map_err(|e| BuzzerError::config(path, e.to_string()))?
        };
        config.validate().map_err(|details| BuzzerError::config(path, details))?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.staleness_threshold_ms == 0 {
            return Err("staleness_threshold_ms must be greater than zero".to_string());
        }
        if self.display_staleness_threshold_ms == Some(0) {
            return Err("display_staleness_threshold_ms must be greater than zero".to_string());
        }
        if self.liveness_poll_ms == 0 {
            return Err("liveness_poll_ms must be greater than zero".to_string());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be greater than zero".to_string());
        }
        if let Some(bad) = self.participants.iter().flatten().find(|d| !(1..=16).contains(*d)) {
            return Err(format!("participant {bad} is not a hardware address (1-16)"));
        }
        Ok(())
    }

    pub fn protocol(&self) -> ProtocolMode {
        ProtocolMode::from_binary_flag(self.binary_protocol)
    }

    pub fn staleness(&self) -> Duration {
        Duration::from_millis(self.staleness_threshold_ms)
    }

    pub fn display_staleness(&self) -> Duration {
        self.display_staleness_threshold_ms.map_or_else(|| self.staleness(), Duration::from_millis)
    }

    pub fn liveness_poll(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeviceId, GroupId};

    #[test]
    fn empty_document_is_default() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.staleness(), Duration::from_secs(60));
        assert_eq!(config.protocol(), ProtocolMode::Binary);
    }

    #[test]
    fn full_document_parses() {
        let yaml = r#"
serial_port: /dev/ttyUSB0
binary_protocol: false
time_based_scoring: true
staleness_threshold_ms: 30000
display_staleness_threshold_ms: 90000
game_id: 7
roster:
  1: 10
  2: 10
  phone-ab12: 11
participants: [1, 2]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.serial_port.as_deref(), Some(Path::new("/dev/ttyUSB0")));
        assert_eq!(config.protocol(), ProtocolMode::Text);
        assert!(config.time_based_scoring);
        assert_eq!(config.display_staleness(), Duration::from_secs(90));
        assert_eq!(config.roster.resolve(&DeviceId::Hardware(2)), GroupId::Team(10));
        assert_eq!(config.roster.resolve(&DeviceId::from("phone-ab12")), GroupId::Team(11));
        assert_eq!(config.participants, Some(vec![1, 2]));
    }

    #[test]
    fn quoted_roster_keys_name_hardware_devices() {
        let yaml = r#"
roster:
  "1": 10
  2: 11
  "phone-ab12": 12
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.roster.resolve(&DeviceId::Hardware(1)), GroupId::Team(10));
        assert_eq!(config.roster.resolve(&DeviceId::Hardware(2)), GroupId::Team(11));
        assert_eq!(config.roster.resolve(&DeviceId::from("phone-ab12")), GroupId::Team(12));
    }

    #[test]
    fn display_threshold_defaults_to_authoritative() {
        let config = Config::from_yaml("staleness_threshold_ms: 5000").unwrap();
        assert_eq!(config.display_staleness(), Duration::from_secs(5));
    }

    #[test]
    fn zero_thresholds_are_rejected() {
        let error = Config::from_yaml("staleness_threshold_ms: 0").unwrap_err();
        assert!(matches!(error, BuzzerError::Config { .. }));
        assert!(error.to_string().contains("staleness_threshold_ms"));

        assert!(Config::from_yaml("event_capacity: 0").is_err());
        assert!(Config::from_yaml("participants: [0]").is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = Config::from_yaml("stalenes_threshold_ms: 100").unwrap_err();
        assert!(!error.is_retryable());
    }

    #[test]
    fn load_reports_missing_file() {
        let error = Config::load("/nonexistent/buzzwire.yaml").unwrap_err();
        assert!(matches!(error, BuzzerError::Io { .. }));
    }
}
