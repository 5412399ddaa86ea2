//! # Helix CPU Accounting
//!
//! Per-group CPU time accounting for a hierarchy of workload groups.
//!
//! The scheduler charges executed runtime to the group a task belongs to,
//! and the charge is propagated to every ancestor. A periodic tick sampler
//! classifies time (user, nice, system, irq, ...) on top of that. Readers
//! combine both: the precise runtime is split in the ratio of the tick
//! samples without ever reporting a component smaller than before.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                              Cpuacct                               │
//! │   config ─ clock ─ root                                            │
//! │                     │                                              │
//! │        ┌────────────┴────────────┐        AccountingGroup          │
//! │        ▼                         ▼        (Arc parent link)        │
//! │   ┌─────────┐               ┌─────────┐                            │
//! │   │ group A │               │ group B │                            │
//! │   └────┬────┘               └─────────┘                            │
//! │        │  per CPU:                                                 │
//! │        │   PerCoreUsage          user/system ns + adjust state     │
//! │        │   PerCoreClassifiedTime one counter per time class        │
//! │        │   GroupEntity           idle/iowait/ineffective windows   │
//! │        │   migrations            counter                           │
//! └────────┴───────────────────────────────────────────────────────────┘
//!
//!   charge ──────▶ usage (group ..= root)      hot path, per-CPU only
//!   tick ────────▶ classified (root, group .. root)
//!   idle/iowait ─▶ entity seqlock / spin lock
//!   read ────────▶ reconcile + snapshot        never excludes writers
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let cpuacct = helix_cpuacct::init(CpuacctConfig::new(4), clock)?;
//! let web = cpuacct.create_group(cpuacct.root())?;
//!
//! cpuacct.charge(&web, CpuId(0), 1_000_000, ExecMode::User);
//! let stat = cpuacct.aggregate_group_stats(&web);
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod clock;
pub mod config;
pub mod cputime;
pub mod entity;
pub mod error;
pub mod group;
pub mod report;
pub mod sync;
pub mod types;
pub mod usage;

mod charge;
mod controller;
mod events;

use alloc::sync::Arc;

use spin::Once;
use static_assertions::assert_impl_all;

pub use clock::{CoreClock, ManualClock};
pub use config::{CpuacctConfig, CpuacctFeatures, DEFAULT_USER_HZ, NSEC_PER_SEC};
pub use controller::Cpuacct;
pub use cputime::{reconcile, CputimeSample, CputimeSplit, PrevCputime};
pub use entity::{derive_steal, EntitySnapshot, EntityState, GroupEntity};
pub use error::{CpuacctError, CpuacctResult};
pub use group::AccountingGroup;
pub use report::{nsec_to_clock_t, CpuacctStat, ProcStat, UsageAllRow, UsageResult};
pub use types::{
    CpuId, CpuMask, CpuTimeClass, ExecMode, GroupId, UsageSelector, MAX_CPUS, NR_CPUTIME_CLASSES,
};

assert_impl_all!(Cpuacct: Send, Sync);
assert_impl_all!(AccountingGroup: Send, Sync);

// =============================================================================
// Global Controller
// =============================================================================

static CPUACCT: Once<Cpuacct> = Once::new();

/// Create the process-wide controller
pub fn init(config: CpuacctConfig, clock: Arc<dyn CoreClock>) -> CpuacctResult<&'static Cpuacct> {
    let cpuacct = Cpuacct::new(config, clock)?;

    let mut installed = false;
    let global = CPUACCT.call_once(|| {
        installed = true;
        cpuacct
    });

    if installed {
        log::info!("cpuacct: global controller ready");
        Ok(global)
    } else {
        Err(CpuacctError::AlreadyInitialized)
    }
}

/// The process-wide controller, if initialized
pub fn get() -> Option<&'static Cpuacct> {
    CPUACCT.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use proptest::prelude::*;
    use std::thread;

    fn controller(nr_cpus: usize) -> (Arc<ManualClock>, Cpuacct) {
        let clock = Arc::new(ManualClock::new(nr_cpus));
        let cpuacct = Cpuacct::new(CpuacctConfig::new(nr_cpus), clock.clone()).unwrap();
        (clock, cpuacct)
    }

    #[test]
    fn test_global_init_once() {
        let clock: Arc<dyn CoreClock> = Arc::new(ManualClock::new(2));
        let cpuacct = init(CpuacctConfig::new(2), Arc::clone(&clock)).unwrap();
        assert_eq!(cpuacct.config().nr_cpus, 2);
        assert!(get().is_some());

        assert_eq!(
            init(CpuacctConfig::new(2), clock).unwrap_err(),
            CpuacctError::AlreadyInitialized
        );
    }

    #[test]
    fn test_hierarchical_conservation() {
        let (_, cpuacct) = controller(2);
        let a = cpuacct.create_group(cpuacct.root()).unwrap();
        let b = cpuacct.create_group(&a).unwrap();
        let c = cpuacct.create_group(&a).unwrap();

        cpuacct.charge(&b, CpuId(0), 100, ExecMode::User);
        cpuacct.charge(&c, CpuId(1), 50, ExecMode::Kernel);
        cpuacct.charge(&a, CpuId(1), 7, ExecMode::User);

        let total = |g: &AccountingGroup| cpuacct.read_usage(g, UsageSelector::Total);
        assert_eq!(total(&a), total(&b) + total(&c) + 7);
        assert_eq!(total(cpuacct.root()), 157);
    }

    #[test]
    fn test_reset_keeps_reconciled_output_monotonic() {
        let (_, cpuacct) = controller(1);
        let g = cpuacct.create_group(cpuacct.root()).unwrap();
        let cpu = CpuId(0);

        cpuacct.charge(&g, cpu, 1_000, ExecMode::User);
        cpuacct.account_field(&g, cpu, CpuTimeClass::User, 1);
        let before = cpuacct.usage_result(&g, cpu).unwrap();
        assert_eq!(before.user, 1_000);

        cpuacct.reset_usage(&g, 0).unwrap();
        assert_eq!(cpuacct.read_usage(&g, UsageSelector::Total), 0);

        cpuacct.charge(&g, cpu, 10, ExecMode::User);
        let after = cpuacct.usage_result(&g, cpu).unwrap();
        assert_eq!(after.user, 1_000);
    }

    #[test]
    fn test_concurrent_charges_on_distinct_cpus() {
        const NR_CPUS: usize = 4;
        const CHARGES: u64 = 10_000;

        let (_, cpuacct) = controller(NR_CPUS);
        let cpuacct = Arc::new(cpuacct);
        let group = cpuacct.create_group(cpuacct.root()).unwrap();

        let workers: Vec<_> = (0..NR_CPUS as u32)
            .map(|cpu| {
                let cpuacct = Arc::clone(&cpuacct);
                let group = Arc::clone(&group);
                thread::spawn(move || {
                    for _ in 0..CHARGES {
                        cpuacct.charge(&group, CpuId(cpu), 3, ExecMode::User);
                        cpuacct.charge(&group, CpuId(cpu), 1, ExecMode::Kernel);
                    }
                })
            })
            .collect();

        // Readers run alongside the writers and only ever see growth
        let mut last = 0;
        for _ in 0..1_000 {
            let now = cpuacct.read_usage(cpuacct.root(), UsageSelector::Total);
            assert!(now >= last);
            last = now;
        }

        for worker in workers {
            worker.join().unwrap();
        }

        let expected = NR_CPUS as u64 * CHARGES * 4;
        assert_eq!(cpuacct.read_usage(&group, UsageSelector::Total), expected);
        assert_eq!(cpuacct.read_usage(cpuacct.root(), UsageSelector::System), expected / 4);
    }

    #[test]
    fn test_concurrent_idle_reads_during_transitions() {
        let (clock, cpuacct) = controller(1);
        let cpuacct = Arc::new(cpuacct);
        let group = cpuacct.create_group(cpuacct.root()).unwrap();
        let cpu = CpuId(0);

        let writer = {
            let cpuacct = Arc::clone(&cpuacct);
            let group = Arc::clone(&group);
            let clock = Arc::clone(&clock);
            thread::spawn(move || {
                for _ in 0..5_000 {
                    clock.advance(cpu, 10);
                    cpuacct.idle_end(&group, cpu);
                    cpuacct.iowait_inc(&group, cpu);
                    clock.advance(cpu, 10);
                    cpuacct.charge(&group, cpu, 10, ExecMode::User);
                    cpuacct.idle_start(&group, cpu);
                    clock.advance(cpu, 5);
                    cpuacct.iowait_dec(&group, cpu);
                }
            })
        };

        let mut last = (0, 0);
        while !writer.is_finished() {
            let res = cpuacct.usage_result(&group, cpu).unwrap();
            let idle_total = res.idle + res.iowait;
            assert!(idle_total >= last.0, "idle went backwards");
            assert!(res.iowait >= last.1, "iowait went backwards");
            last = (idle_total, res.iowait);
        }
        writer.join().unwrap();

        let res = cpuacct.usage_result(&group, cpu).unwrap();
        // Each round runs 10 and idles 15, 5 of them in iowait
        assert_eq!(res.iowait, 5 * 5_000);
        assert_eq!(res.idle + res.iowait, 15 * 5_000);
        assert_eq!(res.steal, 0);
    }

    proptest! {
        #[test]
        fn prop_charges_are_conserved(
            charges in proptest::collection::vec((0usize..3, 0u32..4, 0u64..1_000_000, any::<bool>()), 1..128)
        ) {
            let (_, cpuacct) = controller(4);
            let a = cpuacct.create_group(cpuacct.root()).unwrap();
            let groups = [
                Arc::clone(&a),
                cpuacct.create_group(&a).unwrap(),
                cpuacct.create_group(cpuacct.root()).unwrap(),
            ];

            let mut sum = 0u64;
            for (group, cpu, ns, user) in charges {
                let mode = if user { ExecMode::User } else { ExecMode::Kernel };
                cpuacct.charge(&groups[group], CpuId(cpu), ns, mode);
                sum += ns;
            }

            let total = |g: &AccountingGroup| cpuacct.read_usage(g, UsageSelector::Total);
            prop_assert_eq!(total(cpuacct.root()), sum);
            prop_assert!(total(&groups[0]) >= total(&groups[1]));
            prop_assert_eq!(total(&groups[0]) + total(&groups[2]), sum);

            let percpu: u64 = cpuacct.read_percpu_usage(cpuacct.root(), UsageSelector::Total).iter().sum();
            prop_assert_eq!(percpu, sum);
        }
    }
}
