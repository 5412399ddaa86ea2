//! # Reporting
//!
//! Read side of the controller. Reads never exclude the charge path: raw
//! and classified counters are loaded one field at a time, reconciled
//! splits take the per-CPU adjustment lock, and entity state is copied
//! under the seqlock protocol.
//!
//! All values are nanoseconds; the `*_clock_t` readers convert them with
//! [`nsec_to_clock_t`] at the configured `user_hz`.

use alloc::vec::Vec;

use crate::config::NSEC_PER_SEC;
use crate::controller::Cpuacct;
use crate::cputime::{reconcile, CputimeSample};
use crate::error::CpuacctResult;
use crate::group::AccountingGroup;
use crate::types::{CpuId, CpuTimeClass, UsageSelector};

/// Convert nanoseconds to clock ticks at `user_hz`
#[inline]
pub fn nsec_to_clock_t(ns: u64, user_hz: u32) -> u64 {
    (u128::from(ns) * u128::from(user_hz) / u128::from(NSEC_PER_SEC)) as u64
}

// =============================================================================
// RECORDS
// =============================================================================

/// Statistics of one group on one CPU
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageResult {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
}

/// Statistics of one group summed over its aggregation domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
    pub guest: u64,
    pub guest_nice: u64,
    /// Task migrations onto the group's CPUs
    pub nr_migrations: u64,
}

impl ProcStat {
    fn add(&mut self, res: &UsageResult) {
        self.user += res.user;
        self.nice += res.nice;
        self.system += res.system;
        self.idle += res.idle;
        self.iowait += res.iowait;
        self.irq += res.irq;
        self.softirq += res.softirq;
        self.steal += res.steal;
        self.guest += res.guest;
        self.guest_nice += res.guest_nice;
    }

    /// Time fields converted to clock ticks; `nr_migrations` is unchanged
    pub fn to_clock_t(&self, user_hz: u32) -> Self {
        let t = |ns| nsec_to_clock_t(ns, user_hz);
        Self {
            user: t(self.user),
            nice: t(self.nice),
            system: t(self.system),
            idle: t(self.idle),
            iowait: t(self.iowait),
            irq: t(self.irq),
            softirq: t(self.softirq),
            steal: t(self.steal),
            guest: t(self.guest),
            guest_nice: t(self.guest_nice),
            nr_migrations: self.nr_migrations,
        }
    }
}

/// Tick-sampled user and system time of a group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuacctStat {
    /// user + nice
    pub user: u64,
    /// system + irq + softirq
    pub system: u64,
}

impl CpuacctStat {
    /// Convert to clock ticks
    pub fn to_clock_t(&self, user_hz: u32) -> Self {
        Self {
            user: nsec_to_clock_t(self.user, user_hz),
            system: nsec_to_clock_t(self.system, user_hz),
        }
    }
}

/// One row of the per-CPU usage table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageAllRow {
    pub cpu: CpuId,
    pub user: u64,
    pub system: u64,
}

// =============================================================================
// READS
// =============================================================================

impl Cpuacct {
    /// Raw usage summed over all possible CPUs
    pub fn read_usage(&self, group: &AccountingGroup, selector: UsageSelector) -> u64 {
        self.config()
            .possible_cpus()
            .filter_map(|cpu| group.usage(cpu))
            .fold(0u64, |acc, usage| acc.wrapping_add(usage.read(selector)))
    }

    /// Raw usage per possible CPU, in CPU order
    pub fn read_percpu_usage(&self, group: &AccountingGroup, selector: UsageSelector) -> Vec<u64> {
        self.config()
            .possible_cpus()
            .map(|cpu| group.usage(cpu).map_or(0, |usage| usage.read(selector)))
            .collect()
    }

    /// User and system usage per possible CPU
    pub fn usage_all(&self, group: &AccountingGroup) -> Vec<UsageAllRow> {
        self.config()
            .possible_cpus()
            .filter_map(|cpu| {
                let usage = group.usage(cpu)?;
                Some(UsageAllRow {
                    cpu,
                    user: usage.read(UsageSelector::User),
                    system: usage.read(UsageSelector::System),
                })
            })
            .collect()
    }

    /// Tick-sampled user/system summary over all possible CPUs
    pub fn stat(&self, group: &AccountingGroup) -> CpuacctStat {
        let mut stat = CpuacctStat::default();
        for cpu in self.config().possible_cpus() {
            let Some(cpustat) = group.classified(cpu) else {
                continue;
            };
            stat.user += cpustat.get(CpuTimeClass::User) + cpustat.get(CpuTimeClass::Nice);
            stat.system += cpustat.get(CpuTimeClass::System)
                + cpustat.get(CpuTimeClass::Irq)
                + cpustat.get(CpuTimeClass::Softirq);
        }
        stat
    }

    /// Statistics of `group` on `cpu`.
    ///
    /// For non-root groups user, nice and system are the tick ratios applied
    /// to the precise runtime, and idle, iowait and steal come from the
    /// group's entity (zero without one). The root reports its classified
    /// time as is, which for idle, iowait and steal is the system-wide
    /// figure.
    pub fn usage_result(&self, group: &AccountingGroup, cpu: CpuId) -> CpuacctResult<UsageResult> {
        self.check_cpu(cpu)?;
        let (Some(usage), Some(cpustat)) = (group.usage(cpu), group.classified(cpu)) else {
            return Ok(UsageResult::default());
        };

        let mut res = UsageResult {
            irq: cpustat.get(CpuTimeClass::Irq),
            softirq: cpustat.get(CpuTimeClass::Softirq),
            guest: cpustat.get(CpuTimeClass::Guest),
            guest_nice: cpustat.get(CpuTimeClass::GuestNice),
            ..UsageResult::default()
        };

        let tick_user = cpustat.get(CpuTimeClass::User);
        let tick_nice = cpustat.get(CpuTimeClass::Nice);
        let tick_sys = cpustat.get(CpuTimeClass::System);

        if group.is_root() {
            res.user = tick_user;
            res.nice = tick_nice;
            res.system = tick_sys;
            res.idle = cpustat.get(CpuTimeClass::Idle);
            res.iowait = cpustat.get(CpuTimeClass::Iowait);
            res.steal = cpustat.get(CpuTimeClass::Steal);
            return Ok(res);
        }

        // total -> (user + nice, system)
        let split = reconcile(
            &CputimeSample {
                sum_exec_runtime: usage.read(UsageSelector::Total),
                left_ticks: tick_user + tick_nice,
                right_ticks: tick_sys,
            },
            &usage.prev_cputime1,
        );
        res.system = split.right;

        // user + nice -> (user, nice)
        let split = reconcile(
            &CputimeSample {
                sum_exec_runtime: split.left,
                left_ticks: tick_user,
                right_ticks: tick_nice,
            },
            &usage.prev_cputime2,
        );
        res.user = split.left;
        res.nice = split.right;

        if self.config().schedstats_enabled() {
            if let Some(se) = group.entity(cpu) {
                let snap = se.snapshot(self.clock());
                res.idle = snap.idle;
                res.iowait = snap.iowait;
                res.steal = snap.steal;
            }
        }

        Ok(res)
    }

    /// Statistics of `group` summed over its aggregation domain: every
    /// possible CPU for the root, housekeeping CPUs otherwise.
    pub fn aggregate_group_stats(&self, group: &AccountingGroup) -> ProcStat {
        let mut stat = ProcStat::default();
        let root = group.is_root();

        for cpu in self.config().possible_cpus() {
            if !root && !self.config().is_housekeeping(cpu) {
                continue;
            }
            // Every possible CPU passes the range check
            if let Ok(res) = self.usage_result(group, cpu) {
                stat.add(&res);
            }
            stat.nr_migrations += group.nr_migrations(cpu);
        }

        stat
    }

    /// [`Self::aggregate_group_stats`] in clock ticks at the configured
    /// `user_hz`
    pub fn proc_stat_clock_t(&self, group: &AccountingGroup) -> ProcStat {
        self.aggregate_group_stats(group).to_clock_t(self.config().user_hz)
    }

    /// [`Self::stat`] in clock ticks at the configured `user_hz`
    pub fn stat_clock_t(&self, group: &AccountingGroup) -> CpuacctStat {
        self.stat(group).to_clock_t(self.config().user_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CpuacctConfig, CpuacctFeatures, DEFAULT_USER_HZ};
    use crate::error::CpuacctError;
    use crate::types::{CpuMask, ExecMode};
    use alloc::sync::Arc;

    fn controller(config: CpuacctConfig) -> (Arc<ManualClock>, Cpuacct) {
        let clock = Arc::new(ManualClock::new(config.nr_cpus));
        let cpuacct = Cpuacct::new(config, clock.clone()).unwrap();
        (clock, cpuacct)
    }

    #[test]
    fn test_nsec_to_clock_t() {
        assert_eq!(nsec_to_clock_t(NSEC_PER_SEC, DEFAULT_USER_HZ), 100);
        assert_eq!(nsec_to_clock_t(9_999_999, 100), 0);
        assert_eq!(nsec_to_clock_t(10_000_000, 100), 1);
        assert_eq!(nsec_to_clock_t(NSEC_PER_SEC, 300), 300);
        assert_eq!(nsec_to_clock_t(u64::MAX, 1000), u64::MAX / 1_000_000);
    }

    #[test]
    fn test_usage_reads() {
        let (_, cpuacct) = controller(CpuacctConfig::new(3));
        let g = cpuacct.create_group(cpuacct.root()).unwrap();
        cpuacct.charge(&g, CpuId(0), 10, ExecMode::User);
        cpuacct.charge(&g, CpuId(2), 20, ExecMode::Kernel);
        cpuacct.charge(&g, CpuId(2), 5, ExecMode::User);

        assert_eq!(cpuacct.read_usage(&g, UsageSelector::User), 15);
        assert_eq!(cpuacct.read_usage(&g, UsageSelector::System), 20);
        assert_eq!(cpuacct.read_usage(&g, UsageSelector::Total), 35);
        assert_eq!(cpuacct.read_percpu_usage(&g, UsageSelector::Total), [10, 0, 25]);
        assert_eq!(cpuacct.read_percpu_usage(&g, UsageSelector::System), [0, 0, 20]);

        let rows = cpuacct.usage_all(&g);
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[2],
            UsageAllRow {
                cpu: CpuId(2),
                user: 5,
                system: 20,
            }
        );
    }

    #[test]
    fn test_stat_folds_classes() {
        let (_, cpuacct) = controller(CpuacctConfig::new(2));
        let g = cpuacct.create_group(cpuacct.root()).unwrap();
        let cpu = CpuId(1);
        cpuacct.account_cputime_field(&g, cpu, CpuTimeClass::User, 10_000_000);
        cpuacct.account_cputime_field(&g, cpu, CpuTimeClass::Nice, 10_000_000);
        cpuacct.account_cputime_field(&g, cpu, CpuTimeClass::System, 10_000_000);
        cpuacct.account_cputime_field(&g, cpu, CpuTimeClass::Irq, 20_000_000);
        cpuacct.account_cputime_field(&g, cpu, CpuTimeClass::Softirq, 30_000_000);
        cpuacct.account_cputime_field(&g, cpu, CpuTimeClass::Guest, 99);

        let stat = cpuacct.stat(&g);
        assert_eq!(
            stat,
            CpuacctStat {
                user: 20_000_000,
                system: 60_000_000,
            }
        );
        assert_eq!(stat.to_clock_t(100), CpuacctStat { user: 2, system: 6 });
        assert_eq!(cpuacct.stat(cpuacct.root()), stat);
    }

    #[test]
    fn test_usage_result_reconciles_runtime() {
        let (clock, cpuacct) = controller(CpuacctConfig::new(1));
        let g = cpuacct.create_group(cpuacct.root()).unwrap();
        let cpu = CpuId(0);

        cpuacct.idle_end(&g, cpu);
        cpuacct.charge(&g, cpu, 600, ExecMode::User);
        cpuacct.charge(&g, cpu, 400, ExecMode::Kernel);
        cpuacct.account_field(&g, cpu, CpuTimeClass::User, 20);
        cpuacct.account_field(&g, cpu, CpuTimeClass::Nice, 10);
        cpuacct.account_field(&g, cpu, CpuTimeClass::System, 70);
        cpuacct.account_field(&g, cpu, CpuTimeClass::Irq, 3);
        clock.set(cpu, 1000);

        let res = cpuacct.usage_result(&g, cpu).unwrap();
        assert_eq!(res.system, 700);
        assert_eq!(res.user, 200);
        assert_eq!(res.nice, 100);
        assert_eq!(res.irq, 3);
        assert_eq!(res.idle, 0);
        assert_eq!(res.steal, 0);

        // Tick ratio regresses without new runtime: outputs hold
        cpuacct.account_field(&g, cpu, CpuTimeClass::User, 100);
        let res = cpuacct.usage_result(&g, cpu).unwrap();
        assert_eq!((res.user, res.nice, res.system), (200, 100, 700));
    }

    #[test]
    fn test_usage_result_steal() {
        let (clock, cpuacct) = controller(CpuacctConfig::new(1));
        let g = cpuacct.create_group(cpuacct.root()).unwrap();
        let cpu = CpuId(0);

        // Idle 0..100, runnable but not running 100..500, ran 300
        clock.set(cpu, 100);
        cpuacct.idle_end(&g, cpu);
        cpuacct.charge(&g, cpu, 300, ExecMode::User);
        clock.set(cpu, 500);

        let res = cpuacct.usage_result(&g, cpu).unwrap();
        assert_eq!(res.idle, 100);
        assert_eq!(res.steal, 100);
    }

    #[test]
    fn test_usage_result_out_of_range() {
        let (_, cpuacct) = controller(CpuacctConfig::new(1));
        assert_eq!(
            cpuacct.usage_result(cpuacct.root(), CpuId(1)),
            Err(CpuacctError::CpuOutOfRange(1))
        );
    }

    #[test]
    fn test_usage_result_without_entity_reports_zero_idle() {
        let config = CpuacctConfig::new(1).with_features(CpuacctFeatures::empty());
        let (clock, cpuacct) = controller(config);
        let g = cpuacct.create_group(cpuacct.root()).unwrap();
        clock.set(CpuId(0), 1_000);
        let res = cpuacct.usage_result(&g, CpuId(0)).unwrap();
        assert_eq!((res.idle, res.iowait, res.steal), (0, 0, 0));
    }

    #[test]
    fn test_root_uses_system_wide_classes() {
        let (_, cpuacct) = controller(CpuacctConfig::new(2));
        let root = cpuacct.root();
        let g = cpuacct.create_group(root).unwrap();

        cpuacct.charge(&g, CpuId(0), 1_000, ExecMode::User);
        cpuacct.account_cputime_field(&g, CpuId(0), CpuTimeClass::User, 40);
        cpuacct.account_cputime_field(root, CpuId(0), CpuTimeClass::Idle, 500);
        cpuacct.account_cputime_field(root, CpuId(1), CpuTimeClass::Iowait, 70);
        cpuacct.account_cputime_field(root, CpuId(1), CpuTimeClass::Steal, 9);
        cpuacct.increase_nr_migrations(root, CpuId(1));

        let stat = cpuacct.aggregate_group_stats(root);
        // Raw tick time, not reconciled against the 1000 ns of runtime
        assert_eq!(stat.user, 40);
        assert_eq!(stat.idle, 500);
        assert_eq!(stat.iowait, 70);
        assert_eq!(stat.steal, 9);
        assert_eq!(stat.nr_migrations, 1);
    }

    #[test]
    fn test_aggregate_over_housekeeping_cpus() {
        let config = CpuacctConfig::new(3).with_housekeeping(CpuMask::from_cpus(&[0, 2]));
        let (_, cpuacct) = controller(config);
        let g = cpuacct.create_group(cpuacct.root()).unwrap();

        for cpu in 0..3 {
            cpuacct.charge(&g, CpuId(cpu), 100, ExecMode::Kernel);
            cpuacct.account_field(&g, CpuId(cpu), CpuTimeClass::System, 1);
            cpuacct.account_field(&g, CpuId(cpu), CpuTimeClass::Guest, 5);
            cpuacct.account_field(&g, CpuId(cpu), CpuTimeClass::GuestNice, 6);
            cpuacct.increase_nr_migrations(&g, CpuId(cpu));
        }

        let stat = cpuacct.aggregate_group_stats(&g);
        assert_eq!(stat.system, 200);
        assert_eq!(stat.user, 0);
        assert_eq!(stat.guest, 10);
        assert_eq!(stat.guest_nice, 12);
        assert_eq!(stat.nr_migrations, 2);

        // Raw reads still cover every possible CPU
        assert_eq!(cpuacct.read_usage(&g, UsageSelector::Total), 300);
    }

    #[test]
    fn test_proc_stat_to_clock_t() {
        let stat = ProcStat {
            user: 2 * NSEC_PER_SEC,
            idle: NSEC_PER_SEC / 2,
            nr_migrations: 7,
            ..ProcStat::default()
        };
        let ticks = stat.to_clock_t(100);
        assert_eq!(ticks.user, 200);
        assert_eq!(ticks.idle, 50);
        assert_eq!(ticks.system, 0);
        assert_eq!(ticks.nr_migrations, 7);
    }

    #[test]
    fn test_clock_t_readers_use_configured_hz() {
        let (_, cpuacct) = controller(CpuacctConfig::new(1).with_user_hz(1000));
        let g = cpuacct.create_group(cpuacct.root()).unwrap();
        let cpu = CpuId(0);

        cpuacct.charge(&g, cpu, 3 * NSEC_PER_SEC, ExecMode::User);
        cpuacct.account_field(&g, cpu, CpuTimeClass::User, 1);
        cpuacct.account_cputime_field(&g, cpu, CpuTimeClass::System, NSEC_PER_SEC / 2);
        cpuacct.increase_nr_migrations(&g, cpu);

        let stat = cpuacct.stat_clock_t(&g);
        assert_eq!(stat.system, 500);
        assert_eq!(stat, cpuacct.stat(&g).to_clock_t(1000));

        let ticks = cpuacct.proc_stat_clock_t(&g);
        assert_eq!(ticks, cpuacct.aggregate_group_stats(&g).to_clock_t(1000));
        assert_eq!(ticks.nr_migrations, 1);

        // Same figures at the default rate are ten times coarser
        let (_, coarse) = controller(CpuacctConfig::new(1));
        let h = coarse.create_group(coarse.root()).unwrap();
        coarse.account_cputime_field(&h, cpu, CpuTimeClass::System, NSEC_PER_SEC / 2);
        assert_eq!(coarse.stat_clock_t(&h).system, 50);
    }
}
