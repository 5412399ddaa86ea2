//! Group Scheduling Entity
//!
//! The per-CPU handle the scheduler keeps for a group. It records when the
//! group has nothing to run on that CPU (idle), when that idleness is spent
//! waiting on I/O (iowait), and when the CPU was withdrawn from the group's
//! allowed set (ineffective). Steal time is derived from these at report
//! time, never stored.
//!
//! ## State machine
//!
//! ```text
//!              idle_start                 mark_unavailable
//!   Running ─────────────▶ Idle ─────────────────────────▶ Ineffective
//!      ▲      idle_end      │ ▲        mark_available          │
//!      └────────────────────┘ └────────────────────────────────┘
//!      │                 mark_unavailable                       ▲
//!      └────────────────────────────────────────────────────────┘
//! ```
//!
//! At most one of the idle and ineffective intervals is open at a time.
//! Transitions not shown are ignored.
//!
//! Every transition samples the clock inside the window's write section,
//! so a stamp is never older than a reading a concurrent snapshot already
//! closed an interval against. The iowait lock is taken before the window's
//! write side and held across the transition.

use spin::Mutex;

use crate::clock::CoreClock;
use crate::sync::{Counter, SeqLock};
use crate::types::CpuId;

/// Placement state of a group on one CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Group has runnable work here
    Running,
    /// Nothing runnable; idle interval open
    Idle,
    /// CPU removed from the group's allowed set; ineffective interval open
    Ineffective,
}

#[derive(Debug, Clone, Copy)]
struct IdleWindow {
    state: EntityState,
    idle_sum: u64,
    idle_start: u64,
    ineffective_sum: u64,
    ineffective_start: u64,
}

#[derive(Debug, Default)]
struct IowaitState {
    nr_iowait: u32,
    /// Mirrors `IdleWindow::state == Idle`
    idle: bool,
    iowait_sum: u64,
    iowait_start: Option<u64>,
}

impl IowaitState {
    fn open(&mut self, now: u64) {
        self.idle = true;
        if self.nr_iowait > 0 {
            self.iowait_start = Some(now);
        }
    }

    fn close(&mut self, now: u64) {
        self.idle = false;
        if let Some(start) = self.iowait_start.take() {
            self.iowait_sum += now.saturating_sub(start);
        }
    }

    fn total(&self, now: u64) -> u64 {
        self.iowait_sum + self.iowait_start.map_or(0, |start| now.saturating_sub(start))
    }
}

/// Idle, iowait, ineffective and steal time of a group on one CPU,
/// with open intervals closed out at `clock`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntitySnapshot {
    /// Clock reading the snapshot was taken at
    pub clock: u64,
    /// Idle time excluding iowait
    pub idle: u64,
    /// Iowait time
    pub iowait: u64,
    /// Time the CPU was unavailable to the group
    pub ineffective: u64,
    /// Time the group neither ran, idled nor was excluded
    pub steal: u64,
}

/// Derive steal time: wall time since init not covered by idle, execution
/// or ineffective time. Never negative.
#[inline]
pub fn derive_steal(elapsed: u64, idle: u64, exec_raw: u64, ineffective: u64) -> u64 {
    let complement = idle.saturating_add(exec_raw).saturating_add(ineffective);
    elapsed.saturating_sub(complement)
}

/// Per-CPU scheduling entity of an accounting group
#[derive(Debug)]
pub struct GroupEntity {
    cpu: CpuId,
    window: SeqLock<IdleWindow>,
    iowait: Mutex<IowaitState>,
    sum_exec_raw: Counter,
    init_time: u64,
}

impl GroupEntity {
    /// Create an entity for `cpu`, idle since `now`
    pub fn new(cpu: CpuId, now: u64) -> Self {
        Self {
            cpu,
            window: SeqLock::new(IdleWindow {
                state: EntityState::Idle,
                idle_sum: 0,
                idle_start: now,
                ineffective_sum: 0,
                ineffective_start: 0,
            }),
            iowait: Mutex::new(IowaitState {
                idle: true,
                ..IowaitState::default()
            }),
            sum_exec_raw: Counter::new(0),
            init_time: now,
        }
    }

    /// CPU this entity lives on
    #[inline(always)]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    /// Clock reading at creation
    #[inline(always)]
    pub fn init_time(&self) -> u64 {
        self.init_time
    }

    /// Current placement state
    pub fn state(&self) -> EntityState {
        self.window.read().state
    }

    /// Runtime executed by the group on this CPU
    #[inline]
    pub fn sum_exec_raw(&self) -> u64 {
        self.sum_exec_raw.load()
    }

    /// Accumulate executed runtime
    #[inline]
    pub fn account_exec(&self, ns: u64) {
        self.sum_exec_raw.add(ns);
    }

    /// Number of tasks of the group blocked on I/O here
    pub fn nr_iowait(&self) -> u32 {
        self.iowait.lock().nr_iowait
    }

    /// `Running -> Idle`. Returns whether the transition happened.
    pub fn idle_start(&self, clock: &dyn CoreClock) -> bool {
        let mut io = self.iowait.lock();
        let opened = self.window.write(|w| {
            if w.state != EntityState::Running {
                return None;
            }
            let now = clock.now(self.cpu);
            w.state = EntityState::Idle;
            w.idle_start = now;
            Some(now)
        });

        match opened {
            Some(now) => {
                io.open(now);
                true
            },
            None => {
                log::trace!("cpuacct: idle_start ignored on cpu {}", self.cpu.0);
                false
            },
        }
    }

    /// `Idle -> Running`. Returns whether the transition happened.
    pub fn idle_end(&self, clock: &dyn CoreClock) -> bool {
        let mut io = self.iowait.lock();
        let closed = self.window.write(|w| {
            if w.state != EntityState::Idle {
                return None;
            }
            let now = clock.now(self.cpu);
            w.idle_sum += now.saturating_sub(w.idle_start);
            w.idle_start = 0;
            w.state = EntityState::Running;
            Some(now)
        });

        match closed {
            Some(now) => {
                io.close(now);
                true
            },
            None => {
                log::trace!("cpuacct: idle_end ignored on cpu {}", self.cpu.0);
                false
            },
        }
    }

    /// A task of the group started waiting on I/O
    pub fn iowait_inc(&self, clock: &dyn CoreClock) {
        let mut io = self.iowait.lock();
        io.nr_iowait += 1;
        if io.nr_iowait == 1 && io.idle {
            io.iowait_start = Some(clock.now(self.cpu));
        }
    }

    /// A task of the group stopped waiting on I/O
    pub fn iowait_dec(&self, clock: &dyn CoreClock) {
        let mut io = self.iowait.lock();
        if io.nr_iowait == 0 {
            log::warn!("cpuacct: iowait underflow on cpu {}", self.cpu.0);
            return;
        }
        io.nr_iowait -= 1;
        if io.nr_iowait == 0 {
            if let Some(start) = io.iowait_start.take() {
                io.iowait_sum += clock.now(self.cpu).saturating_sub(start);
            }
        }
    }

    /// CPU returned to the group: `Ineffective -> Idle`.
    pub fn mark_available(&self, clock: &dyn CoreClock) -> bool {
        let mut io = self.iowait.lock();
        let reopened = self.window.write(|w| {
            if w.state != EntityState::Ineffective {
                return None;
            }
            let now = clock.now(self.cpu);
            w.ineffective_sum += now.saturating_sub(w.ineffective_start);
            w.ineffective_start = 0;
            w.state = EntityState::Idle;
            w.idle_start = now;
            Some(now)
        });

        if let Some(now) = reopened {
            io.open(now);
        }
        reopened.is_some()
    }

    /// CPU withdrawn from the group: `Running | Idle -> Ineffective`.
    pub fn mark_unavailable(&self, clock: &dyn CoreClock) -> bool {
        let mut io = self.iowait.lock();
        let withdrawn = self.window.write(|w| {
            if w.state == EntityState::Ineffective {
                return None;
            }
            let now = clock.now(self.cpu);
            match w.state {
                EntityState::Idle => {
                    w.idle_sum += now.saturating_sub(w.idle_start);
                    w.idle_start = 0;
                },
                EntityState::Running | EntityState::Ineffective => {},
            }
            w.state = EntityState::Ineffective;
            w.ineffective_start = now;
            Some(now)
        });

        if let Some(now) = withdrawn {
            io.close(now);
        }
        withdrawn.is_some()
    }

    /// Snapshot with open intervals closed out against `clock`
    pub fn snapshot(&self, clock: &dyn CoreClock) -> EntitySnapshot {
        self.snapshot_counted(clock).0
    }

    /// Snapshot plus the number of seqlock retries it took
    pub fn snapshot_counted(&self, clock: &dyn CoreClock) -> (EntitySnapshot, u32) {
        let cpu = self.cpu;
        let ((window, now), retries) = self.window.read_counted(|w| (w, clock.now(cpu)));

        let mut idle = window.idle_sum;
        if window.state == EntityState::Idle && now > window.idle_start {
            idle += now - window.idle_start;
        }

        let mut ineffective = window.ineffective_sum;
        if window.state == EntityState::Ineffective {
            ineffective += now.saturating_sub(window.ineffective_start);
        }

        let iowait = self.iowait.lock().total(now);

        let steal = derive_steal(
            now.saturating_sub(self.init_time),
            idle,
            self.sum_exec_raw(),
            ineffective,
        );

        let snapshot = EntitySnapshot {
            clock: now,
            idle: idle.saturating_sub(iowait),
            iowait,
            ineffective,
            steal,
        };
        (snapshot, retries)
    }
}
