//! Counting policy abstraction.
//!
//! This module provides the `AtomicPolicy` trait for choosing between
//! plain single-threaded counters and atomic counters on the control block.

use std::cell::Cell;
use std::sync::atomic::{fence, AtomicUsize, Ordering};

/// Counts above this are treated as a leak of handles and abort the process.
const MAX_REFCOUNT: usize = isize::MAX as usize;

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::SingleThreaded {}
    impl Sealed for super::ThreadSafe {}
    impl Sealed for std::cell::Cell<usize> {}
    impl Sealed for std::sync::atomic::AtomicUsize {}
}

/// Trait abstracting over the counter storage of a control block.
///
/// The set of policies is closed: [`SingleThreaded`] and [`ThreadSafe`].
/// Control blocks free memory based on what the counters report, so the
/// trait is sealed and cannot be implemented outside this crate.
///
/// ```compile_fail
/// use shared_pointer::AtomicPolicy;
/// use std::cell::Cell;
///
/// struct Custom;
///
/// impl AtomicPolicy for Custom {
///     type Counter = Cell<usize>;
///
///     fn new_counter(initial: usize) -> Self::Counter {
///         Cell::new(initial)
///     }
/// }
/// ```
pub trait AtomicPolicy: sealed::Sealed + 'static {
    /// Counter type for reference counting (Cell<usize> or AtomicUsize).
    type Counter: Counter;

    /// Create a new counter initialized to the given value.
    fn new_counter(initial: usize) -> Self::Counter;
}

/// Trait for counter operations, abstracting Cell vs Atomic.
///
/// Sealed like [`AtomicPolicy`]; only `Cell<usize>` and `AtomicUsize`
/// implement it.
///
/// ```compile_fail
/// use shared_pointer::Counter;
/// use std::cell::Cell;
///
/// struct Stuck(Cell<usize>);
///
/// impl Counter for Stuck {
///     fn get(&self) -> usize { self.0.get() }
///     fn increment(&self) -> usize { 1 }
///     fn decrement(&self) -> usize { 0 }
///     fn increment_if_nonzero(&self) -> bool { true }
/// }
/// ```
pub trait Counter: sealed::Sealed {
    /// Current value.
    fn get(&self) -> usize;

    /// Add one, returning the new value.
    fn increment(&self) -> usize;

    /// Subtract one, returning the new value.
    ///
    /// Panics if the counter is already zero. When the result is zero the
    /// caller observes every write made by previous holders.
    fn decrement(&self) -> usize;

    /// Add one only if the counter is not zero. Returns whether it did.
    ///
    /// Check and increment happen as one step, so a counter that reached
    /// zero stays there.
    fn increment_if_nonzero(&self) -> bool;
}

#[cold]
fn overflow() -> ! {
    std::process::abort()
}

// ============================================================================
// SingleThreaded Policy
// ============================================================================

/// Single-threaded policy using Cell counters.
///
/// Handles built on it are neither `Send` nor `Sync`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleThreaded;

impl AtomicPolicy for SingleThreaded {
    type Counter = Cell<usize>;

    #[inline]
    fn new_counter(initial: usize) -> Self::Counter {
        Cell::new(initial)
    }
}

impl Counter for Cell<usize> {
    #[inline]
    fn get(&self) -> usize {
        Cell::get(self)
    }

    #[inline]
    fn increment(&self) -> usize {
        let val = Cell::get(self);
        if val >= MAX_REFCOUNT {
            overflow();
        }
        self.set(val + 1);
        val + 1
    }

    #[inline]
    fn decrement(&self) -> usize {
        let val = Cell::get(self);
        assert!(val > 0, "reference count underflow: handle released twice");
        self.set(val - 1);
        val - 1
    }

    #[inline]
    fn increment_if_nonzero(&self) -> bool {
        if Cell::get(self) == 0 {
            return false;
        }
        self.increment();
        true
    }
}

// ============================================================================
// ThreadSafe Policy
// ============================================================================

/// Thread-safe policy using AtomicUsize counters.
///
/// Safe for sharing across thread boundaries when `T: Send + Sync`.
/// Slightly higher overhead due to atomic operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSafe;

impl AtomicPolicy for ThreadSafe {
    type Counter = AtomicUsize;

    #[inline]
    fn new_counter(initial: usize) -> Self::Counter {
        AtomicUsize::new(initial)
    }
}

impl Counter for AtomicUsize {
    #[inline]
    fn get(&self) -> usize {
        self.load(Ordering::Acquire)
    }

    #[inline]
    fn increment(&self) -> usize {
        // A new reference can only be made from an existing one, so no
        // ordering is needed here.
        let prev = self.fetch_add(1, Ordering::Relaxed);
        if prev >= MAX_REFCOUNT {
            overflow();
        }
        prev + 1
    }

    #[inline]
    fn decrement(&self) -> usize {
        let prev = self.fetch_sub(1, Ordering::Release);
        assert!(prev > 0, "reference count underflow: handle released twice");
        if prev == 1 {
            fence(Ordering::Acquire);
        }
        prev - 1
    }

    fn increment_if_nonzero(&self) -> bool {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            if current >= MAX_REFCOUNT {
                overflow();
            }
            match self.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Policy used by the [`Shared`](crate::Shared) and [`Weak`](crate::Weak)
/// aliases. Selected with the `thread-safe` cargo feature.
#[cfg(not(feature = "thread-safe"))]
pub type DefaultPolicy = SingleThreaded;

/// Policy used by the [`Shared`](crate::Shared) and [`Weak`](crate::Weak)
/// aliases. Selected with the `thread-safe` cargo feature.
#[cfg(feature = "thread-safe")]
pub type DefaultPolicy = ThreadSafe;
