//! The CPU accounting controller
//!
//! [`Cpuacct`] owns the configuration, the scheduler's clock and the root
//! group. Every accounting operation is a method on it; they are split over
//! the `charge`, `events` and `report` modules.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::clock::CoreClock;
use crate::config::CpuacctConfig;
use crate::error::{CpuacctError, CpuacctResult};
use crate::group::AccountingGroup;
use crate::types::{CpuId, GroupId};

/// CPU accounting controller
pub struct Cpuacct {
    config: CpuacctConfig,
    clock: Arc<dyn CoreClock>,
    root: Arc<AccountingGroup>,
    next_id: AtomicU64,
}

impl Cpuacct {
    /// Create a controller and its root group
    pub fn new(config: CpuacctConfig, clock: Arc<dyn CoreClock>) -> CpuacctResult<Self> {
        config.validate()?;

        // The root has no scheduling entity: its idle/iowait/steal come
        // from the system-wide classes.
        let root = AccountingGroup::new(
            GroupId::ROOT,
            None,
            config.nr_cpus,
            config.extended_stats_enabled(),
            None,
        )?;

        log::debug!(
            "cpuacct: initialized ({} cpus, features {:?})",
            config.nr_cpus,
            config.features
        );

        Ok(Self {
            config,
            clock,
            root: Arc::new(root),
            next_id: AtomicU64::new(GroupId::ROOT.raw() + 1),
        })
    }

    /// The root group
    #[inline]
    pub fn root(&self) -> &Arc<AccountingGroup> {
        &self.root
    }

    /// Controller configuration
    #[inline]
    pub fn config(&self) -> &CpuacctConfig {
        &self.config
    }

    /// The scheduler's clock
    #[inline]
    pub fn clock(&self) -> &dyn CoreClock {
        self.clock.as_ref()
    }

    /// Create a child of `parent` with zeroed statistics.
    ///
    /// All per-CPU storage is allocated up front; on failure nothing is
    /// linked into the tree.
    pub fn create_group(&self, parent: &Arc<AccountingGroup>) -> CpuacctResult<Arc<AccountingGroup>> {
        if parent.nr_cpus() != self.config.nr_cpus {
            return Err(CpuacctError::InvalidArgument);
        }

        let id = GroupId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let clock = self.clock.as_ref();
        let now = |cpu: CpuId| clock.now(cpu);
        let entity_clock = if self.config.schedstats_enabled() {
            Some(&now as &dyn Fn(CpuId) -> u64)
        } else {
            None
        };

        let group = AccountingGroup::new(
            id,
            Some(Arc::clone(parent)),
            self.config.nr_cpus,
            self.config.extended_stats_enabled(),
            entity_clock,
        )
        .map_err(|err| {
            log::warn!("cpuacct: failed to create group under {}: {}", parent.id().0, err);
            err
        })?;

        log::debug!(
            "cpuacct: created group {} (parent {}, depth {})",
            id.0,
            parent.id().0,
            group.depth()
        );
        Ok(Arc::new(group))
    }

    /// Slot index for `cpu` on an infallible path; out-of-range ids are
    /// dropped with a warning
    #[inline]
    pub(crate) fn cpu_slot(&self, cpu: CpuId) -> Option<CpuId> {
        if cpu.index() < self.config.nr_cpus {
            Some(cpu)
        } else {
            log::warn!("cpuacct: cpu {} out of range", cpu.0);
            None
        }
    }

    /// Range check for fallible paths
    #[inline]
    pub(crate) fn check_cpu(&self, cpu: CpuId) -> CpuacctResult<()> {
        if cpu.index() < self.config.nr_cpus {
            Ok(())
        } else {
            Err(CpuacctError::CpuOutOfRange(cpu.0))
        }
    }
}

impl fmt::Debug for Cpuacct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpuacct")
            .field("config", &self.config)
            .field("root", &self.root)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}
