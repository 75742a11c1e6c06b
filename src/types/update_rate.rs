//! Delivery rate control for registry change streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How often a registry subscriber wants to be woken up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum UpdateRate {
    /// Every change, as it is applied
    Immediate,

    /// At most this many times per second, latest state wins
    /// A rate of zero is treated as Immediate
    Max(u32),
}

impl UpdateRate {
    /// Collapse degenerate rates.
    pub fn normalize(self) -> Self {
        match self {
            UpdateRate::Max(0) => UpdateRate::Immediate,
            other => other,
        }
    }

    /// Minimum spacing between deliveries, if any.
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
    fn zero_rate_means_immediate() {
        assert_eq!(UpdateRate::Max(0).normalize(), UpdateRate::Immediate);
        assert_eq!(UpdateRate::Max(0).throttle_interval(), None);
    }

    #[test]
    fn max_rate_gives_interval() {
        assert_eq!(UpdateRate::Max(4).throttle_interval(), Some(Duration::from_millis(250)));
        assert_eq!(UpdateRate::Immediate.throttle_interval(), None);
    }
}
