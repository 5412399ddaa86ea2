//! Per-CPU usage storage
//!
//! Raw runtime counters written by the charge path and classified-time
//! counters written by the tick sampler, one instance of each per group
//! per CPU.

use static_assertions::const_assert_eq;

use crate::cputime::PrevCputime;
use crate::sync::Counter;
use crate::types::{CpuTimeClass, ExecMode, UsageSelector, NR_CPUTIME_CLASSES, NR_STATS};

#[allow(clippy::declare_interior_mutable_const)]
const ZERO: Counter = Counter::new(0);

/// Raw usage of one group on one CPU
#[derive(Debug)]
#[repr(align(64))]
pub struct PerCoreUsage {
    usages: [Counter; NR_STATS],
    /// total -> (user + nice, system)
    pub(crate) prev_cputime1: PrevCputime,
    /// user + nice -> (user, nice)
    pub(crate) prev_cputime2: PrevCputime,
}

const_assert_eq!(core::mem::align_of::<PerCoreUsage>(), 64);

impl PerCoreUsage {
    /// Zeroed usage
    pub const fn new() -> Self {
        Self {
            usages: [ZERO; NR_STATS],
            prev_cputime1: PrevCputime::new(),
            prev_cputime2: PrevCputime::new(),
        }
    }

    /// Add runtime spent in `mode`
    #[inline]
    pub fn charge(&self, mode: ExecMode, cputime: u64) {
        self.usages[mode.index()].add(cputime);
    }

    /// Read one counter or their sum
    pub fn read(&self, selector: UsageSelector) -> u64 {
        match selector {
            UsageSelector::User => self.usages[ExecMode::User.index()].load(),
            UsageSelector::System => self.usages[ExecMode::Kernel.index()].load(),
            UsageSelector::Total => self
                .usages
                .iter()
                .fold(0u64, |acc, c| acc.wrapping_add(c.load())),
        }
    }

    /// Overwrite both counters
    pub fn write(&self, value: u64) {
        for usage in self.usages.iter() {
            usage.store(value);
        }
    }
}

impl Default for PerCoreUsage {
    fn default() -> Self {
        Self::new()
    }
}

/// Tick-sampled time of one group on one CPU
#[derive(Debug)]
#[repr(align(64))]
pub struct PerCoreClassifiedTime {
    cpustat: [Counter; NR_CPUTIME_CLASSES],
}

impl PerCoreClassifiedTime {
    /// Zeroed counters
    pub const fn new() -> Self {
        Self {
            cpustat: [ZERO; NR_CPUTIME_CLASSES],
        }
    }

    /// Add time to a class
    #[inline]
    pub fn add(&self, class: CpuTimeClass, ns: u64) {
        self.cpustat[class.index()].add(ns);
    }

    /// Read a class
    #[inline]
    pub fn get(&self, class: CpuTimeClass) -> u64 {
        self.cpustat[class.index()].load()
    }
}

impl Default for PerCoreClassifiedTime {
    fn default() -> Self {
        Self::new()
    }
}
