//! Cpuacct Configuration
//!
//! Controller-wide settings fixed at construction time.

use bitflags::bitflags;

use crate::error::{CpuacctError, CpuacctResult};
use crate::types::{CpuId, CpuMask, MAX_CPUS};

/// Nanoseconds per second
pub const NSEC_PER_SEC: u64 = 1_000_000_000;

/// Default user-visible clock tick rate
pub const DEFAULT_USER_HZ: u32 = 100;

bitflags! {
    /// Optional statistics the controller allocates and maintains
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CpuacctFeatures: u32 {
        /// Per-group scheduling entities: idle, iowait and steal derivation
        const SCHEDSTATS     = 1 << 0;
        /// Per-group migration counters
        const EXTENDED_STATS = 1 << 1;
    }
}

impl Default for CpuacctFeatures {
    fn default() -> Self {
        Self::all()
    }
}

/// Controller configuration
#[derive(Debug, Clone)]
pub struct CpuacctConfig {
    /// Number of possible CPUs
    pub nr_cpus: usize,
    /// Optional statistics
    pub features: CpuacctFeatures,
    /// CPUs aggregated for non-root groups (`None` = all possible CPUs)
    pub housekeeping: Option<CpuMask>,
    /// Tick rate for clock_t conversion
    pub user_hz: u32,
}

impl Default for CpuacctConfig {
    fn default() -> Self {
        Self {
            nr_cpus: 1,
            features: CpuacctFeatures::default(),
            housekeeping: None,
            user_hz: DEFAULT_USER_HZ,
        }
    }
}

impl CpuacctConfig {
    /// Default configuration for `nr_cpus` CPUs
    pub fn new(nr_cpus: usize) -> Self {
        Self {
            nr_cpus,
            ..Self::default()
        }
    }

    /// Replace the feature set
    pub fn with_features(mut self, features: CpuacctFeatures) -> Self {
        self.features = features;
        self
    }

    /// Restrict non-root aggregation to `mask`
    pub fn with_housekeeping(mut self, mask: CpuMask) -> Self {
        self.housekeeping = Some(mask);
        self
    }

    /// Set the clock_t tick rate
    pub fn with_user_hz(mut self, user_hz: u32) -> Self {
        self.user_hz = user_hz;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> CpuacctResult<()> {
        if self.nr_cpus == 0 || self.nr_cpus > MAX_CPUS {
            return Err(CpuacctError::InvalidConfig("nr_cpus out of range"));
        }
        if self.user_hz == 0 || u64::from(self.user_hz) > NSEC_PER_SEC {
            return Err(CpuacctError::InvalidConfig("user_hz out of range"));
        }
        if let Some(mask) = &self.housekeeping {
            if mask.iter().all(|cpu| cpu.index() >= self.nr_cpus) {
                return Err(CpuacctError::InvalidConfig("no possible housekeeping CPU"));
            }
        }
        Ok(())
    }

    /// Idle/iowait/steal derivation enabled
    #[inline(always)]
    pub fn schedstats_enabled(&self) -> bool {
        self.features.contains(CpuacctFeatures::SCHEDSTATS)
    }

    /// Migration counters enabled
    #[inline(always)]
    pub fn extended_stats_enabled(&self) -> bool {
        self.features.contains(CpuacctFeatures::EXTENDED_STATS)
    }

    /// Iterate possible CPUs
    pub fn possible_cpus(&self) -> impl Iterator<Item = CpuId> {
        (0..self.nr_cpus as u32).map(CpuId)
    }

    /// Whether `cpu` takes part in non-root aggregation
    #[inline]
    pub fn is_housekeeping(&self, cpu: CpuId) -> bool {
        self.housekeeping.map_or(true, |mask| mask.contains(cpu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CpuacctConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.schedstats_enabled());
        assert!(config.extended_stats_enabled());
        assert_eq!(config.possible_cpus().count(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(CpuacctConfig::new(0).validate().is_err());
        assert!(CpuacctConfig::new(MAX_CPUS + 1).validate().is_err());
        assert!(CpuacctConfig::new(4).with_user_hz(0).validate().is_err());

        let mask = CpuMask::from_cpus(&[8]);
        assert_eq!(
            CpuacctConfig::new(4).with_housekeeping(mask).validate(),
            Err(CpuacctError::InvalidConfig("no possible housekeeping CPU"))
        );
    }

    #[test]
    fn test_housekeeping() {
        let config = CpuacctConfig::new(4).with_housekeeping(CpuMask::from_cpus(&[1, 2]));
        assert!(!config.is_housekeeping(CpuId(0)));
        assert!(config.is_housekeeping(CpuId(1)));
        assert!(CpuacctConfig::new(4).is_housekeeping(CpuId(3)));
    }

    #[test]
    fn test_features() {
        let config = CpuacctConfig::new(2).with_features(CpuacctFeatures::SCHEDSTATS);
        assert!(config.schedstats_enabled());
        assert!(!config.extended_stats_enabled());
    }
}
