//! Update rate control for display-facing streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Update rate for device snapshot streams
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every registry change is delivered
    Immediate,

    /// Throttled to at most this many updates per second
    /// A rate of zero is treated as Immediate
    Max(u32),
}

impl UpdateRate {
    /// Normalize degenerate rates
    pub fn normalize(self) -> Self {
        match self {
            UpdateRate::Max(0) => UpdateRate::Immediate,
            other => other,
        }
    }

    /// Check if throttling is needed
    pub fn needs_throttle(self) -> bool {
        matches!(self.normalize(), UpdateRate::Max(_))
    }

    /// Get throttle interval if needed
    pub fn throttle_interval(self) -> Option<Duration> {
        match self.normalize() {
            UpdateRate::Immediate => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_is_immediate() {
        assert_eq!(UpdateRate::Max(0).normalize(), UpdateRate::Immediate);
        assert!(!UpdateRate::Max(0).needs_throttle());
    }

    #[test]
    fn max_rate_yields_interval() {
        assert_eq!(UpdateRate::Max(4).throttle_interval(), Some(Duration::from_millis(250)));
        assert_eq!(UpdateRate::Immediate.throttle_interval(), None);
    }
}
