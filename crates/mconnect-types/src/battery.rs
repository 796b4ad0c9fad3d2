//! Battery tiers and their symbolic icon names.

use serde::{Deserialize, Serialize};

/// Icon shown when the battery capability is absent or the device is offline.
pub const BATTERY_MISSING_ICON: &str = "battery-missing-symbolic";

/// Coarse charge level, uPower style.
///
/// Breakpoints are 3, 10, 30 and 60; a level exactly on a breakpoint
/// belongs to the higher tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BatteryTier {
    Empty,
    Caution,
    Low,
    Good,
    Full,
}

impl BatteryTier {
    pub fn from_level(level: u8) -> Self {
        match level {
            0..=2 => Self::Empty,
            3..=9 => Self::Caution,
            10..=29 => Self::Low,
            30..=59 => Self::Good,
            _ => Self::Full,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Caution => "caution",
            Self::Low => "low",
            Self::Good => "good",
            Self::Full => "full",
        }
    }

    /// Symbolic icon name, e.g. `battery-good-charging-symbolic`.
    pub fn icon_name(self, charging: bool) -> String {
        if charging {
            format!("battery-{}-charging-symbolic", self.as_str())
        } else {
            format!("battery-{}-symbolic", self.as_str())
        }
    }
}

impl std::fmt::Display for BatteryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoints_map_to_higher_tier() {
        assert_eq!(BatteryTier::from_level(2), BatteryTier::Empty);
        assert_eq!(BatteryTier::from_level(3), BatteryTier::Caution);
        assert_eq!(BatteryTier::from_level(9), BatteryTier::Caution);
        assert_eq!(BatteryTier::from_level(10), BatteryTier::Low);
        assert_eq!(BatteryTier::from_level(29), BatteryTier::Low);
        assert_eq!(BatteryTier::from_level(30), BatteryTier::Good);
        assert_eq!(BatteryTier::from_level(59), BatteryTier::Good);
        assert_eq!(BatteryTier::from_level(60), BatteryTier::Full);
        assert_eq!(BatteryTier::from_level(100), BatteryTier::Full);
    }

    #[test]
    fn tiers_are_monotonic_over_the_whole_range() {
        let mut previous = BatteryTier::Empty;
        for level in 0..=100u8 {
            let tier = BatteryTier::from_level(level);
            assert!(tier >= previous, "tier dropped at level {level}");
            previous = tier;
        }
    }

    #[test]
    fn icon_names() {
        assert_eq!(BatteryTier::from_level(0).icon_name(false), "battery-empty-symbolic");
        assert_eq!(BatteryTier::from_level(5).icon_name(true), "battery-caution-charging-symbolic");
        assert_eq!(BatteryTier::from_level(85).icon_name(false), "battery-full-symbolic");
        assert_eq!(BatteryTier::from_level(60).icon_name(true), "battery-full-charging-symbolic");
    }
}
