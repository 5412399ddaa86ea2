//! Synchronization primitives for per-CPU accounting state.
//!
//! Counters have a single writer per CPU: every update is one atomic
//! read-modify-write and every remote read one atomic load, so readers
//! never exclude the hot path. Targets without 64-bit atomics fall back to
//! a spin lock around each counter.
//!
//! Multi-field state (the idle window) lives in a [`SeqLock`]: writers bump
//! the sequence to odd, update, then bump it back to even; readers retry
//! until they observe the same even sequence around their copy.

use core::cell::UnsafeCell;
use core::sync::atomic::{fence, AtomicU32, Ordering};

use cfg_if::cfg_if;
use spin::Mutex;

// ============================================================================
// Counter
// ============================================================================

cfg_if! {
    if #[cfg(target_has_atomic = "64")] {
        use core::sync::atomic::AtomicU64;

        /// Monotonic nanosecond counter.
        #[derive(Debug, Default)]
        #[repr(transparent)]
        pub struct Counter {
            value: AtomicU64,
        }

        impl Counter {
            /// Create a new counter with initial value
            pub const fn new(initial: u64) -> Self {
                Self {
                    value: AtomicU64::new(initial),
                }
            }

            /// Load current value
            #[inline]
            pub fn load(&self) -> u64 {
                self.value.load(Ordering::Relaxed)
            }

            /// Add to the counter
            #[inline]
            pub fn add(&self, delta: u64) {
                self.value.fetch_add(delta, Ordering::Relaxed);
            }

            /// Overwrite the counter (reset path only)
            #[inline]
            pub fn store(&self, value: u64) {
                self.value.store(value, Ordering::Relaxed);
            }
        }
    } else {
        /// Monotonic nanosecond counter.
        ///
        /// 64-bit loads are not single-copy atomic here, so each access
        /// takes a short spin lock.
        #[derive(Debug, Default)]
        pub struct Counter {
            value: Mutex<u64>,
        }

        impl Counter {
            /// Create a new counter with initial value
            pub const fn new(initial: u64) -> Self {
                Self {
                    value: Mutex::new(initial),
                }
            }

            /// Load current value
            #[inline]
            pub fn load(&self) -> u64 {
                *self.value.lock()
            }

            /// Add to the counter
            #[inline]
            pub fn add(&self, delta: u64) {
                let mut value = self.value.lock();
                *value = value.wrapping_add(delta);
            }

            /// Overwrite the counter (reset path only)
            #[inline]
            pub fn store(&self, value: u64) {
                *self.value.lock() = value;
            }
        }
    }
}

// ============================================================================
// Sequence Lock (SeqLock)
// ============================================================================

/// Sequence lock for multi-field snapshots.
///
/// Writers serialize on an internal spin lock; readers are lock-free and
/// retry when a write overlapped their copy.
pub struct SeqLock<T> {
    sequence: AtomicU32,
    writer: Mutex<()>,
    data: UnsafeCell<T>,
}

// SAFETY: writers are serialized by `writer`, readers only keep copies
// validated against the sequence counter.
unsafe impl<T: Send> Send for SeqLock<T> {}
unsafe impl<T: Send> Sync for SeqLock<T> {}

impl<T: Copy> SeqLock<T> {
    /// Create a new SeqLock
    pub const fn new(data: T) -> Self {
        Self {
            sequence: AtomicU32::new(0),
            writer: Mutex::new(()),
            data: UnsafeCell::new(data),
        }
    }

    /// Read a consistent copy of the data.
    #[inline]
    pub fn read(&self) -> T {
        self.read_with(|data| data)
    }

    /// Read a consistent copy and project it through `f`.
    ///
    /// `f` may run on a torn copy that is then discarded, so it must not
    /// have side effects or panic on arbitrary field values. It is the
    /// place to sample anything that must be ordered with the snapshot
    /// (e.g. a clock reading).
    #[inline]
    pub fn read_with<R>(&self, f: impl FnMut(T) -> R) -> R {
        self.read_counted(f).0
    }

    /// Like [`read_with`](Self::read_with), also returning how many times
    /// the read was retried.
    pub fn read_counted<R>(&self, mut f: impl FnMut(T) -> R) -> (R, u32) {
        let mut retries = 0;
        loop {
            // Wait for even sequence (no write in progress)
            let seq1 = loop {
                let s = self.sequence.load(Ordering::Acquire);
                if s & 1 == 0 {
                    break s;
                }
                core::hint::spin_loop();
            };

            // SAFETY: the copy is only returned if no writer ran meanwhile
            let data = unsafe { core::ptr::read_volatile(self.data.get()) };
            let result = f(data);

            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == seq1 {
                return (result, retries);
            }

            retries += 1;
            core::hint::spin_loop();
        }
    }

    /// Update the data under the write side of the lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _guard = self.writer.lock();

        let prev = self.sequence.fetch_add(1, Ordering::Acquire);
        debug_assert!(prev & 1 == 0, "Nested write detected");
        fence(Ordering::Release);

        // SAFETY: writers are serialized; readers detect the odd sequence
        let result = f(unsafe { &mut *self.data.get() });

        self.sequence.fetch_add(1, Ordering::Release);
        result
    }

    /// Current sequence value (even when no write is in progress)
    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence.load(Ordering::Acquire)
    }
}

impl<T: Copy + core::fmt::Debug> core::fmt::Debug for SeqLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SeqLock")
            .field("sequence", &self.sequence())
            .field("data", &self.read())
            .finish()
    }
}
