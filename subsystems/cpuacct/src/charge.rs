//! Charge paths
//!
//! Called from the scheduler with only the local CPU's exclusivity held.
//! Every update is a single counter add on the calling CPU's slot, so no
//! path here takes a cross-CPU lock or returns an error.

use crate::controller::Cpuacct;
use crate::error::{CpuacctError, CpuacctResult};
use crate::group::AccountingGroup;
use crate::types::{CpuId, CpuTimeClass, ExecMode};

impl Cpuacct {
    /// Charge `cputime` ns of execution in `mode` to `group` and every
    /// ancestor, root included.
    pub fn charge(&self, group: &AccountingGroup, cpu: CpuId, cputime: u64, mode: ExecMode) {
        let Some(cpu) = self.cpu_slot(cpu) else {
            return;
        };

        for ca in group.hierarchy() {
            if let Some(usage) = ca.usage(cpu) {
                usage.charge(mode, cputime);
            }
            if let Some(se) = ca.entity(cpu) {
                se.account_exec(cputime);
            }
        }
    }

    /// Add `val` ns of classified time to `group` and its ancestors.
    ///
    /// Stops before the root: the root's classified time is the
    /// system-wide statistic, maintained by the tick sampler.
    pub fn account_field(&self, group: &AccountingGroup, cpu: CpuId, class: CpuTimeClass, val: u64) {
        let Some(cpu) = self.cpu_slot(cpu) else {
            return;
        };

        for ca in group.hierarchy().take_while(|ca| !ca.is_root()) {
            if let Some(stat) = ca.classified(cpu) {
                stat.add(class, val);
            }
        }
    }

    /// Tick sampler entry point: update the system-wide statistic on the
    /// root, then the group's own hierarchy.
    pub fn account_cputime_field(
        &self,
        group: &AccountingGroup,
        cpu: CpuId,
        class: CpuTimeClass,
        val: u64,
    ) {
        let Some(cpu) = self.cpu_slot(cpu) else {
            return;
        };

        if let Some(stat) = self.root().classified(cpu) {
            stat.add(class, val);
        }
        self.account_field(group, cpu, class, val);
    }

    /// A task of `group` migrated onto `cpu`
    pub fn increase_nr_migrations(&self, group: &AccountingGroup, cpu: CpuId) {
        if !self.config().extended_stats_enabled() {
            return;
        }
        let Some(cpu) = self.cpu_slot(cpu) else {
            return;
        };
        if let Some(counter) = group.migration_counter(cpu) {
            counter.add(1);
        }
    }

    /// Zero the raw usage counters of `group` on every CPU.
    ///
    /// Only `0` is accepted. Reconciled outputs are left untouched and stay
    /// monotonic across the reset.
    pub fn reset_usage(&self, group: &AccountingGroup, val: u64) -> CpuacctResult<()> {
        if val != 0 {
            log::warn!("cpuacct: rejected usage reset to {} on group {}", val, group.id().0);
            return Err(CpuacctError::InvalidArgument);
        }

        for usage in group.usages() {
            usage.write(0);
        }
        log::debug!("cpuacct: usage reset on group {}", group.id().0);
        Ok(())
    }
}
