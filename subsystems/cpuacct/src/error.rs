//! Error types for the CPU accounting controller.

use alloc::collections::TryReserveError;
use core::fmt;

/// Result type for cpuacct operations
pub type CpuacctResult<T> = Result<T, CpuacctError>;

/// Cpuacct error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuacctError {
    /// Invalid argument (e.g. a non-zero usage reset)
    InvalidArgument,
    /// Per-CPU storage could not be allocated
    OutOfMemory,
    /// CPU id beyond the configured possible CPUs
    CpuOutOfRange(u32),
    /// Configuration rejected
    InvalidConfig(&'static str),
    /// Global controller already initialized
    AlreadyInitialized,
}

impl fmt::Display for CpuacctError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "Invalid argument"),
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::CpuOutOfRange(cpu) => write!(f, "CPU {} out of range", cpu),
            Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::AlreadyInitialized => write!(f, "Cpuacct already initialized"),
        }
    }
}

impl From<TryReserveError> for CpuacctError {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}
