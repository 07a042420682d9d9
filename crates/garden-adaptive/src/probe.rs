use std::num::NonZeroUsize;

use tracing::debug;

use garden_core::DeviceCapabilities;
use garden_settings::DeviceSettings;

/// Answers "what can this device render?" once, at startup.
pub trait DeviceCapabilityProbe: Send + Sync {
    fn probe(&self) -> DeviceCapabilities;
}

/// Derives tiers from host parallelism unless settings force a value.
#[derive(Clone, Debug, Default)]
pub struct HostProbe {
    forced: Option<DeviceCapabilities>,
}

impl HostProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self {
            forced: settings.forced,
        }
    }

    /// `>= 2` cores is tier 1, `>= 4` tier 2, `>= 8` high performance.
    pub fn capabilities_for(cores: usize) -> DeviceCapabilities {
        DeviceCapabilities {
            supports_tier1_graphics: cores >= 2,
            supports_tier2_graphics: cores >= 4,
            is_high_performance: cores >= 8,
        }
    }
}

impl DeviceCapabilityProbe for HostProbe {
    fn probe(&self) -> DeviceCapabilities {
        if let Some(forced) = self.forced {
            debug!(?forced, "using forced device capabilities");
            return forced;
        }
        let cores = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        let caps = Self::capabilities_for(cores);
        debug!(cores, ?caps, "probed device capabilities");
        caps
    }
}

/// Fixed answer, for tests and headless runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticProbe(pub DeviceCapabilities);

impl DeviceCapabilityProbe for StaticProbe {
    fn probe(&self) -> DeviceCapabilities {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use garden_core::ComplexityLevel;

    use super::*;

    #[test]
    fn tiers_follow_core_count() {
        let level = |cores| HostProbe::capabilities_for(cores).initial_complexity().get();
        assert_eq!(level(1), 1);
        assert_eq!(level(2), 2);
        assert_eq!(level(4), 3);
        assert_eq!(level(6), 3);
        assert_eq!(level(8), 4);
        assert_eq!(level(64), 4);
    }

    #[test]
    fn forced_capabilities_win() {
        let forced = DeviceCapabilities {
            supports_tier1_graphics: true,
            ..Default::default()
        };
        let probe = HostProbe::from_settings(&DeviceSettings {
            forced: Some(forced),
        });
        assert_eq!(probe.probe(), forced);
    }

    #[test]
    fn host_probe_is_usable() {
        let level = HostProbe::new().probe().initial_complexity();
        assert!(level >= ComplexityLevel::MIN && level <= ComplexityLevel::MAX);
    }

    #[test]
    fn static_probe_returns_its_value() {
        let caps = DeviceCapabilities {
            supports_tier2_graphics: true,
            supports_tier1_graphics: true,
            is_high_performance: true,
        };
        assert_eq!(StaticProbe(caps).probe(), caps);
    }
}
