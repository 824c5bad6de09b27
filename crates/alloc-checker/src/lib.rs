//! Allocation and drop bookkeeping for tests.
//!
//! Two collaborators, both injected explicitly by the test that uses them:
//!
//! - [`CountingAllocator`] wraps the system allocator. A test binary opts in
//!   with `#[global_allocator]`; counts are kept per thread, so concurrently
//!   running tests do not see each other's allocations. It can also be told
//!   to fail the next allocation on the current thread with
//!   [`fail_next_allocation`].
//! - [`DropCounter`] hands out [`DropProbe`] values that record how many
//!   times they were dropped.
//!
//! ```
//! use alloc_checker::DropCounter;
//!
//! let drops = DropCounter::new();
//! let probe = drops.probe(3);
//! assert_eq!(probe.value(), 3);
//! drop(probe);
//! assert_eq!(drops.count(), 1);
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

thread_local! {
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
    static DEALLOCATIONS: Cell<usize> = const { Cell::new(0) };
    static FAIL_NEXT: Cell<bool> = const { Cell::new(false) };
}

fn bump(counter: &'static std::thread::LocalKey<Cell<usize>>) {
    // The thread may be tearing down its locals; nothing to record then.
    let _ = counter.try_with(|c| c.set(c.get() + 1));
}

/// Make the next allocation on this thread return null.
///
/// The switch is consumed by that allocation. Failed allocations are not
/// counted. Only takes effect in a binary using [`CountingAllocator`].
pub fn fail_next_allocation() {
    FAIL_NEXT.with(|flag| flag.set(true));
}

/// Turn off a pending [`fail_next_allocation`] that was never consumed.
pub fn cancel_allocation_failure() {
    FAIL_NEXT.with(|flag| flag.set(false));
}

fn take_failure() -> bool {
    FAIL_NEXT.try_with(|flag| flag.replace(false)).unwrap_or(false)
}

/// System allocator that counts allocations and deallocations per thread.
///
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: alloc_checker::CountingAllocator = alloc_checker::CountingAllocator;
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct CountingAllocator;

// SAFETY: every call is forwarded to `System` unchanged.
unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if take_failure() {
            return std::ptr::null_mut();
        }
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            bump(&ALLOCATIONS);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        bump(&DEALLOCATIONS);
        unsafe { System.dealloc(ptr, layout) }
    }
}

/// Allocation totals of the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocStats {
    pub allocations: usize,
    pub deallocations: usize,
}

impl AllocStats {
    /// Totals recorded on this thread so far.
    pub fn current() -> Self {
        Self {
            allocations: ALLOCATIONS.with(Cell::get),
            deallocations: DEALLOCATIONS.with(Cell::get),
        }
    }

    /// Allocations not yet freed, relative to `baseline`.
    pub fn live_since(&self, baseline: &AllocStats) -> isize {
        let allocs = (self.allocations - baseline.allocations) as isize;
        let frees = (self.deallocations - baseline.deallocations) as isize;
        allocs - frees
    }
}

/// Records allocation activity on the current thread from the moment it
/// was created.
///
/// Only meaningful in a test binary that installs [`CountingAllocator`].
#[derive(Debug)]
pub struct AllocScope {
    baseline: AllocStats,
}

impl AllocScope {
    pub fn begin() -> Self {
        Self {
            baseline: AllocStats::current(),
        }
    }

    /// Allocations made since the scope began.
    pub fn allocations(&self) -> usize {
        AllocStats::current().allocations - self.baseline.allocations
    }

    /// Deallocations made since the scope began.
    pub fn deallocations(&self) -> usize {
        AllocStats::current().deallocations - self.baseline.deallocations
    }

    /// Allocations made since the scope began and not yet freed.
    pub fn live(&self) -> isize {
        AllocStats::current().live_since(&self.baseline)
    }

    /// Panics unless every allocation since the scope began was freed.
    #[track_caller]
    pub fn assert_balanced(&self) {
        let live = self.live();
        assert_eq!(live, 0, "{live} allocation(s) leaked or double-freed");
    }
}

/// Shared tally of [`DropProbe`] drops.
#[derive(Debug, Clone, Default)]
pub struct DropCounter {
    drops: Arc<AtomicUsize>,
}

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new probe carrying `value`, reporting its drop to this counter.
    pub fn probe(&self, value: i64) -> DropProbe {
        DropProbe {
            value,
            drops: Arc::clone(&self.drops),
        }
    }

    /// How many probes from this counter have been dropped.
    pub fn count(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

/// A value that records its own drop.
#[derive(Debug)]
pub struct DropProbe {
    value: i64,
    drops: Arc<AtomicUsize>,
}

impl DropProbe {
    pub fn value(&self) -> i64 {
        self.value
    }
}

impl PartialEq for DropProbe {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_counter_counts_each_probe() {
        let drops = DropCounter::new();
        let a = drops.probe(1);
        let b = drops.probe(2);
        assert_eq!(drops.count(), 0);
        drop(a);
        assert_eq!(drops.count(), 1);
        drop(b);
        assert_eq!(drops.count(), 2);
    }

    #[test]
    fn test_probe_equality_by_value() {
        let drops = DropCounter::new();
        assert_eq!(drops.probe(5), drops.probe(5));
        assert_ne!(drops.probe(5), drops.probe(6));
    }

    #[test]
    fn test_failure_switch_is_consumed_once() {
        fail_next_allocation();
        assert!(take_failure());
        assert!(!take_failure());

        fail_next_allocation();
        cancel_allocation_failure();
        assert!(!take_failure());
    }

    #[test]
    fn test_live_since_baseline() {
        let base = AllocStats {
            allocations: 3,
            deallocations: 1,
        };
        let now = AllocStats {
            allocations: 5,
            deallocations: 4,
        };
        assert_eq!(now.live_since(&base), -1);
    }
}
