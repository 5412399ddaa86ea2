//! Per-CPU clock source
//!
//! The scheduler owns time. The controller only asks it for the current
//! reading of a given CPU's clock when it opens or closes an interval, or
//! when it closes out open intervals for a report.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::types::CpuId;

/// Source of per-CPU monotonic time in nanoseconds
pub trait CoreClock: Send + Sync {
    /// Current clock reading of `cpu`
    fn now(&self, cpu: CpuId) -> u64;
}

/// Clock advanced explicitly by its owner.
///
/// Used by simulators and host tests that drive the scheduler by hand.
#[derive(Debug)]
pub struct ManualClock {
    cpus: Box<[AtomicU64]>,
}

impl ManualClock {
    /// Create a clock for `nr_cpus` CPUs, all reading zero
    pub fn new(nr_cpus: usize) -> Self {
        let cpus: Vec<AtomicU64> = (0..nr_cpus).map(|_| AtomicU64::new(0)).collect();
        Self {
            cpus: cpus.into_boxed_slice(),
        }
    }

    /// Set the reading of one CPU
    pub fn set(&self, cpu: CpuId, ns: u64) {
        if let Some(slot) = self.cpus.get(cpu.index()) {
            slot.store(ns, Ordering::Release);
        }
    }

    /// Advance one CPU
    pub fn advance(&self, cpu: CpuId, delta: u64) {
        if let Some(slot) = self.cpus.get(cpu.index()) {
            slot.fetch_add(delta, Ordering::AcqRel);
        }
    }

    /// Advance every CPU by the same amount
    pub fn advance_all(&self, delta: u64) {
        for slot in self.cpus.iter() {
            slot.fetch_add(delta, Ordering::AcqRel);
        }
    }
}

impl CoreClock for ManualClock {
    fn now(&self, cpu: CpuId) -> u64 {
        self.cpus
            .get(cpu.index())
            .map_or(0, |slot| slot.load(Ordering::Acquire))
    }
}
