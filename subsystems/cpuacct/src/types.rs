//! Core types for CPU accounting
//!
//! Identifiers, CPU masks and the time-class taxonomy shared by every
//! accounting path.

use core::fmt;

/// Maximum CPUs supported
pub const MAX_CPUS: usize = 256;

const MASK_WORDS: usize = MAX_CPUS / 64;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Unique CPU identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuId(pub u32);

impl CpuId {
    /// Create a new CPU ID
    #[inline(always)]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    #[inline(always)]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Index into per-CPU arrays
    #[inline(always)]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Accounting group identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub u64);

impl GroupId {
    /// The root group
    pub const ROOT: GroupId = GroupId(0);

    /// Get the raw ID value
    #[inline(always)]
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

// ============================================================================
// EXECUTION MODE / SELECTORS
// ============================================================================

/// Privilege level a charged slice of runtime was spent in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ExecMode {
    /// User mode
    User   = 0,
    /// Kernel mode
    Kernel = 1,
}

/// Number of raw usage counters per CPU
pub const NR_STATS: usize = 2;

impl ExecMode {
    /// Index into the raw usage counters
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Name as shown in usage tables
    pub const fn name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Kernel => "system",
        }
    }
}

/// Which raw usage counter(s) a read returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageSelector {
    /// User-mode time only
    User,
    /// Kernel-mode time only
    System,
    /// Sum of both
    Total,
}

// ============================================================================
// TIME CLASSES
// ============================================================================

/// Tick-sampled CPU time class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum CpuTimeClass {
    User      = 0,
    Nice      = 1,
    System    = 2,
    Softirq   = 3,
    Irq       = 4,
    /// Populated only on the root group
    Idle      = 5,
    /// Populated only on the root group
    Iowait    = 6,
    Steal     = 7,
    Guest     = 8,
    GuestNice = 9,
}

/// Number of time classes
pub const NR_CPUTIME_CLASSES: usize = 10;

impl CpuTimeClass {
    /// All classes in index order
    pub const ALL: [CpuTimeClass; NR_CPUTIME_CLASSES] = [
        Self::User,
        Self::Nice,
        Self::System,
        Self::Softirq,
        Self::Irq,
        Self::Idle,
        Self::Iowait,
        Self::Steal,
        Self::Guest,
        Self::GuestNice,
    ];

    /// Index into classified-time counters
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Class name
    pub const fn name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Nice => "nice",
            Self::System => "system",
            Self::Softirq => "softirq",
            Self::Irq => "irq",
            Self::Idle => "idle",
            Self::Iowait => "iowait",
            Self::Steal => "steal",
            Self::Guest => "guest",
            Self::GuestNice => "guest_nice",
        }
    }
}

// ============================================================================
// CPU MASK
// ============================================================================

/// Fixed-size set of CPUs
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuMask {
    bits: [u64; MASK_WORDS],
}

impl CpuMask {
    /// Empty mask
    pub const fn new() -> Self {
        Self {
            bits: [0; MASK_WORDS],
        }
    }

    /// Mask of CPUs `0..nr_cpus`
    pub fn first(nr_cpus: usize) -> Self {
        let mut mask = Self::new();
        for cpu in 0..nr_cpus.min(MAX_CPUS) {
            mask.set(CpuId(cpu as u32));
        }
        mask
    }

    /// Build a mask from raw CPU ids; ids beyond `MAX_CPUS` are dropped
    pub fn from_cpus(cpus: &[u32]) -> Self {
        let mut mask = Self::new();
        for &cpu in cpus {
            mask.set(CpuId(cpu));
        }
        mask
    }

    /// Add a CPU
    #[inline]
    pub fn set(&mut self, cpu: CpuId) {
        if cpu.index() < MAX_CPUS {
            self.bits[cpu.index() / 64] |= 1 << (cpu.index() % 64);
        }
    }

    /// Remove a CPU
    #[inline]
    pub fn clear(&mut self, cpu: CpuId) {
        if cpu.index() < MAX_CPUS {
            self.bits[cpu.index() / 64] &= !(1 << (cpu.index() % 64));
        }
    }

    /// Test membership
    #[inline]
    pub fn contains(&self, cpu: CpuId) -> bool {
        cpu.index() < MAX_CPUS && self.bits[cpu.index() / 64] & (1 << (cpu.index() % 64)) != 0
    }

    /// Number of CPUs in the mask
    pub fn weight(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// Iterate CPUs in ascending order
    pub fn iter(&self) -> impl Iterator<Item = CpuId> + '_ {
        (0..MAX_CPUS)
            .map(|cpu| CpuId(cpu as u32))
            .filter(move |&cpu| self.contains(cpu))
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|c| c.0)).finish()
    }
}
