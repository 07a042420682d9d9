use serde::{Deserialize, Serialize};

use crate::complexity::ComplexityLevel;

/// Graphics capability snapshot, computed once at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapabilities {
    pub supports_tier2_graphics: bool,
    pub supports_tier1_graphics: bool,
    pub is_high_performance: bool,
}

impl DeviceCapabilities {
    /// Starting complexity for this device before any frame telemetry exists.
    pub fn initial_complexity(&self) -> ComplexityLevel {
        let level = match (
            self.supports_tier2_graphics,
            self.is_high_performance,
            self.supports_tier1_graphics,
        ) {
            (true, true, _) => 4,
            (true, false, _) => 3,
            (false, _, true) => 2,
            _ => 1,
        };
        ComplexityLevel::clamped(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(tier2: bool, tier1: bool, high: bool) -> DeviceCapabilities {
        DeviceCapabilities {
            supports_tier2_graphics: tier2,
            supports_tier1_graphics: tier1,
            is_high_performance: high,
        }
    }

    #[test]
    fn tier2_high_performance_seeds_four() {
        assert_eq!(caps(true, true, true).initial_complexity().get(), 4);
        assert_eq!(caps(true, false, true).initial_complexity().get(), 4);
    }

    #[test]
    fn tier2_without_high_performance_seeds_three() {
        assert_eq!(caps(true, true, false).initial_complexity().get(), 3);
    }

    #[test]
    fn tier1_only_seeds_two() {
        assert_eq!(caps(false, true, false).initial_complexity().get(), 2);
        assert_eq!(caps(false, true, true).initial_complexity().get(), 2);
    }

    #[test]
    fn no_graphics_seeds_one() {
        assert_eq!(caps(false, false, false).initial_complexity().get(), 1);
        assert_eq!(caps(false, false, true).initial_complexity().get(), 1);
    }

    #[test]
    fn camel_case_on_the_wire() {
        let json = serde_json::to_value(caps(true, true, false)).unwrap();
        assert_eq!(json["supportsTier2Graphics"], true);
        assert_eq!(json["isHighPerformance"], false);
    }
}
