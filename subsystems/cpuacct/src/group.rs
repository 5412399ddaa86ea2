//! # Accounting Groups
//!
//! Nodes of the accounting tree. Each group owns one slot of every per-CPU
//! structure per possible CPU and holds a strong reference to its parent,
//! so the ancestor chain outlives every descendant.
//!
//! ```text
//!            root (depth 0, no entities)
//!           /    \
//!        web      batch (depth 1)
//!       /   \
//!    api    static (depth 2)
//! ```
//!
//! Charges walk from the charged group towards the root through
//! [`AccountingGroup::hierarchy`].

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::entity::GroupEntity;
use crate::error::CpuacctResult;
use crate::sync::Counter;
use crate::types::{CpuId, GroupId};
use crate::usage::{PerCoreClassifiedTime, PerCoreUsage};

/// Allocate one slot per CPU, failing instead of aborting on exhaustion
pub(crate) fn alloc_percpu<T>(
    nr_cpus: usize,
    mut init: impl FnMut(CpuId) -> T,
) -> CpuacctResult<Box<[T]>> {
    let mut slots = Vec::new();
    slots.try_reserve_exact(nr_cpus)?;
    for cpu in 0..nr_cpus as u32 {
        slots.push(init(CpuId(cpu)));
    }
    Ok(slots.into_boxed_slice())
}

// =============================================================================
// ACCOUNTING GROUP
// =============================================================================

/// A node of the accounting tree
pub struct AccountingGroup {
    id: GroupId,
    parent: Option<Arc<AccountingGroup>>,
    depth: u32,
    cpuusage: Box<[PerCoreUsage]>,
    cpustat: Box<[PerCoreClassifiedTime]>,
    migrations: Option<Box<[Counter]>>,
    entities: Option<Box<[GroupEntity]>>,
}

impl AccountingGroup {
    pub(crate) fn new(
        id: GroupId,
        parent: Option<Arc<AccountingGroup>>,
        nr_cpus: usize,
        with_migrations: bool,
        entity_clock: Option<&dyn Fn(CpuId) -> u64>,
    ) -> CpuacctResult<Self> {
        let depth = parent.as_ref().map_or(0, |p| p.depth + 1);
        let cpuusage = alloc_percpu(nr_cpus, |_| PerCoreUsage::new())?;
        let cpustat = alloc_percpu(nr_cpus, |_| PerCoreClassifiedTime::new())?;
        let migrations = if with_migrations {
            Some(alloc_percpu(nr_cpus, |_| Counter::new(0))?)
        } else {
            None
        };
        let entities = match entity_clock {
            Some(now) => Some(alloc_percpu(nr_cpus, |cpu| GroupEntity::new(cpu, now(cpu)))?),
            None => None,
        };

        Ok(Self {
            id,
            parent,
            depth,
            cpuusage,
            cpustat,
            migrations,
            entities,
        })
    }

    /// Group identifier
    #[inline(always)]
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Parent group, `None` for the root
    #[inline]
    pub fn parent(&self) -> Option<&Arc<AccountingGroup>> {
        self.parent.as_ref()
    }

    /// Number of hops to the root
    #[inline(always)]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Check if this is the root group
    #[inline(always)]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Number of per-CPU slots
    #[inline]
    pub fn nr_cpus(&self) -> usize {
        self.cpuusage.len()
    }

    /// This group followed by each ancestor up to and including the root
    pub fn hierarchy(&self) -> impl Iterator<Item = &AccountingGroup> + '_ {
        core::iter::successors(Some(self), |group| group.parent.as_deref())
    }

    /// Raw usage on `cpu`
    #[inline]
    pub fn usage(&self, cpu: CpuId) -> Option<&PerCoreUsage> {
        self.cpuusage.get(cpu.index())
    }

    /// Classified time on `cpu`
    #[inline]
    pub fn classified(&self, cpu: CpuId) -> Option<&PerCoreClassifiedTime> {
        self.cpustat.get(cpu.index())
    }

    /// Scheduling entity on `cpu`, absent for the root and when schedstats
    /// were disabled at creation
    #[inline]
    pub fn entity(&self, cpu: CpuId) -> Option<&GroupEntity> {
        self.entities.as_ref()?.get(cpu.index())
    }

    /// Migrations into this group on `cpu`, 0 when not tracked
    pub fn nr_migrations(&self, cpu: CpuId) -> u64 {
        self.migration_counter(cpu).map_or(0, Counter::load)
    }

    #[inline]
    pub(crate) fn migration_counter(&self, cpu: CpuId) -> Option<&Counter> {
        self.migrations.as_ref()?.get(cpu.index())
    }

    pub(crate) fn usages(&self) -> &[PerCoreUsage] {
        &self.cpuusage
    }
}

impl Drop for AccountingGroup {
    fn drop(&mut self) {
        log::debug!("cpuacct: group {} freed", self.id.0);
    }
}

impl fmt::Debug for AccountingGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountingGroup")
            .field("id", &self.id)
            .field("parent", &self.parent.as_ref().map(|p| p.id))
            .field("depth", &self.depth)
            .field("nr_cpus", &self.nr_cpus())
            .field("entities", &self.entities.is_some())
            .field("migrations", &self.migrations.is_some())
            .finish()
    }
}
