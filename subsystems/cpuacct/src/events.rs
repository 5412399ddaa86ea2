//! Idle, iowait and availability events
//!
//! Forwarded by the scheduler to the group's entity on the affected CPU,
//! stamped with that CPU's clock. Groups without entities (the root, or
//! groups created with schedstats disabled) ignore them.

use crate::controller::Cpuacct;
use crate::entity::GroupEntity;
use crate::group::AccountingGroup;
use crate::types::{CpuId, CpuMask};

impl Cpuacct {
    fn entity_of<'g>(&self, group: &'g AccountingGroup, cpu: CpuId) -> Option<&'g GroupEntity> {
        if !self.config().schedstats_enabled() {
            return None;
        }
        group.entity(self.cpu_slot(cpu)?)
    }

    /// The group ran out of runnable work on `cpu`
    pub fn idle_start(&self, group: &AccountingGroup, cpu: CpuId) {
        if let Some(se) = self.entity_of(group, cpu) {
            se.idle_start(self.clock());
        }
    }

    /// The group has runnable work on `cpu` again
    pub fn idle_end(&self, group: &AccountingGroup, cpu: CpuId) {
        if let Some(se) = self.entity_of(group, cpu) {
            se.idle_end(self.clock());
        }
    }

    /// A task of the group blocked on I/O on `cpu`
    pub fn iowait_inc(&self, group: &AccountingGroup, cpu: CpuId) {
        if let Some(se) = self.entity_of(group, cpu) {
            se.iowait_inc(self.clock());
        }
    }

    /// A task of the group finished waiting on I/O on `cpu`
    pub fn iowait_dec(&self, group: &AccountingGroup, cpu: CpuId) {
        if let Some(se) = self.entity_of(group, cpu) {
            se.iowait_dec(self.clock());
        }
    }

    /// The group's allowed CPU set changed.
    ///
    /// Returned CPUs leave the ineffective state and start idling; removed
    /// CPUs close their idle interval and become ineffective. A CPU in both
    /// masks ends up ineffective.
    pub fn availability_changed(&self, group: &AccountingGroup, added: &CpuMask, removed: &CpuMask) {
        if !self.config().schedstats_enabled() {
            return;
        }

        let mut returned = 0usize;
        for cpu in added.iter() {
            if let Some(se) = group.entity(cpu) {
                returned += se.mark_available(self.clock()) as usize;
            }
        }

        let mut withdrawn = 0usize;
        for cpu in removed.iter() {
            if let Some(se) = group.entity(cpu) {
                withdrawn += se.mark_unavailable(self.clock()) as usize;
            }
        }

        log::trace!(
            "cpuacct: group {} availability changed (+{} -{})",
            group.id().0,
            returned,
            withdrawn
        );
    }
}
