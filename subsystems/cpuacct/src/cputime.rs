//! Tick/runtime reconciliation
//!
//! The tick sampler attributes whole ticks to user, nice or system time,
//! while the charge path measures runtime with nanosecond precision. The
//! precise total is split in the ratio of the tick samples, and each half
//! is clamped so that it never falls below what was reported last time.

use spin::Mutex;

/// A reconciled `(left, right)` split of a precise total
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CputimeSplit {
    /// First component (e.g. user time)
    pub left: u64,
    /// Second component (e.g. system time)
    pub right: u64,
}

/// Input of one reconciliation
#[derive(Debug, Clone, Copy, Default)]
pub struct CputimeSample {
    /// Precise runtime to split
    pub sum_exec_runtime: u64,
    /// Tick-sampled weight of the left component
    pub left_ticks: u64,
    /// Tick-sampled weight of the right component
    pub right_ticks: u64,
}

/// Last reported split, the monotonicity floor for the next one
#[derive(Debug, Default)]
pub struct PrevCputime {
    split: Mutex<CputimeSplit>,
}

impl PrevCputime {
    /// Fresh state
    pub const fn new() -> Self {
        Self {
            split: Mutex::new(CputimeSplit { left: 0, right: 0 }),
        }
    }

    #[cfg(test)]
    fn get(&self) -> CputimeSplit {
        *self.split.lock()
    }

    #[cfg(test)]
    fn reset(&self) {
        *self.split.lock() = CputimeSplit::default();
    }
}

/// Split `sample.sum_exec_runtime` in the ratio of the tick samples.
///
/// Both halves of the result are non-decreasing across calls sharing the
/// same `prev`, and sum to the runtime whenever the runtime has grown past
/// the previous report.
pub fn reconcile(sample: &CputimeSample, prev: &PrevCputime) -> CputimeSplit {
    let mut prev = prev.split.lock();
    let rtime = sample.sum_exec_runtime;

    // Nothing new to distribute (or the runtime went backwards after a reset)
    if prev.left.saturating_add(prev.right) >= rtime {
        return *prev;
    }

    let total = u128::from(sample.left_ticks) + u128::from(sample.right_ticks);
    let mut left = if total == 0 {
        rtime
    } else {
        // left_ticks <= total, so the quotient fits in u64
        (u128::from(rtime) * u128::from(sample.left_ticks) / total) as u64
    };

    if left < prev.left {
        left = prev.left;
    }
    let mut right = rtime - left;
    if right < prev.right {
        right = prev.right;
        left = rtime - right;
    }

    *prev = CputimeSplit { left, right };
    *prev
}
