//! Weak (observing) handle.

use crate::block::ControlBlock;
use crate::policy::{AtomicPolicy, DefaultPolicy, SingleThreaded, ThreadSafe};
use crate::shared::GenericShared;
use std::fmt;
use std::ptr::NonNull;

/// A weak (non-owning) handle to a shared value.
///
/// Weak handles keep the control block allocated but never the value.
/// They can be promoted back to a [`GenericShared`] as long as some strong
/// handle is still alive.
///
/// # Example
///
/// ```
/// use shared_pointer::{Shared, Weak};
///
/// let mut owner = Shared::new(42);
/// let mut observer = Weak::from_shared(&owner);
///
/// assert_eq!(*observer.lock().get(), 42);
///
/// owner.clear();
///
/// // The value is gone, promotion yields an empty handle.
/// assert!(observer.lock().is_empty());
/// ```
pub struct GenericWeak<T, P: AtomicPolicy = DefaultPolicy> {
    block: Option<NonNull<ControlBlock<T, P>>>,
}

/// Weak handle using the crate's default counting policy.
pub type Weak<T> = GenericWeak<T, DefaultPolicy>;

/// Weak handle with atomic counters, shareable across threads.
pub type ThreadSafeWeak<T> = GenericWeak<T, ThreadSafe>;

/// Weak handle with plain counters. Neither `Send` nor `Sync`.
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<shared_pointer::LocalWeak<i32>>();
/// ```
///
/// ```compile_fail
/// fn assert_sync<T: Sync>() {}
/// assert_sync::<shared_pointer::LocalWeak<i32>>();
/// ```
pub type LocalWeak<T> = GenericWeak<T, SingleThreaded>;

// SAFETY: a weak handle can be promoted to a strong one on another thread,
// so it carries the same bounds as `GenericShared`.
unsafe impl<T: Send + Sync, P: AtomicPolicy> Send for GenericWeak<T, P>
where
    P::Counter: Sync,
{
}
// SAFETY: see above.
unsafe impl<T: Send + Sync, P: AtomicPolicy> Sync for GenericWeak<T, P>
where
    P::Counter: Sync,
{
}

impl<T, P: AtomicPolicy> GenericWeak<T, P> {
    /// Create an empty weak handle.
    #[inline]
    pub const fn new() -> Self {
        Self { block: None }
    }

    /// Observe the block of `shared`. Only the weak count is incremented.
    pub fn from_shared(shared: &GenericShared<T, P>) -> Self {
        let block = shared.block();
        if let Some(block) = block {
            // SAFETY: `shared` holds a strong reference to the block.
            unsafe { block.as_ref() }.weak_ref();
        }
        Self { block }
    }

    #[inline]
    fn block_ref(&self) -> Option<&ControlBlock<T, P>> {
        // SAFETY: our weak reference keeps the block allocated.
        self.block.map(|block| unsafe { &*block.as_ptr() })
    }

    /// Promote to a strong handle.
    ///
    /// Returns an empty handle if this handle is empty or the value has
    /// already been destroyed. In the latter case this handle also releases
    /// its reference and becomes empty, since the block can never hold a
    /// value again.
    pub fn lock(&mut self) -> GenericShared<T, P> {
        let promoted = self.upgrade();
        if promoted.is_empty() && self.block.is_some() {
            log::trace!(
                target: "shared_pointer",
                "weak handle found an orphaned block, releasing it"
            );
            self.reset();
        }
        promoted
    }

    /// Promote to a strong handle without modifying this handle.
    ///
    /// Same result as [`Self::lock`], but an expired handle keeps its
    /// reference to the block.
    pub fn upgrade(&self) -> GenericShared<T, P> {
        match self.block {
            // SAFETY: `try_strong_ref` took the strong and weak reference
            // handed over to the new handle.
            Some(block) if unsafe { block.as_ref() }.try_strong_ref() => unsafe {
                GenericShared::adopt(block)
            },
            _ => GenericShared::empty(),
        }
    }

    /// Returns true if the handle refers to no block.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// Returns true if promotion would fail: the handle is empty or the
    /// value was destroyed.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.block_ref().map_or(true, |block| !block.is_alive())
    }

    /// Number of strong handles alive on the block, `None` if empty.
    #[inline]
    pub fn strong_count(&self) -> Option<usize> {
        self.block_ref().map(ControlBlock::strong_count)
    }

    /// Number of references keeping the block allocated, `None` if empty.
    #[inline]
    pub fn weak_count(&self) -> Option<usize> {
        self.block_ref().map(ControlBlock::weak_count)
    }

    /// Returns true if both handles refer to one block, or both are empty.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }

    /// Make this handle observe `other`'s block.
    ///
    /// No-op when both already refer to the same block. If `other`'s value
    /// was already destroyed this handle becomes empty instead.
    pub fn assign(&mut self, other: &Self) {
        if Self::ptr_eq(self, other) {
            return;
        }
        let adopted = other.clone();
        self.reset();
        self.block = adopted.into_block();
    }

    /// Release the block reference, leaving the handle empty.
    pub fn reset(&mut self) {
        if let Some(block) = self.block.take() {
            // SAFETY: this handle owned one weak reference.
            unsafe { ControlBlock::weak_deref(block) };
        }
    }

    fn into_block(self) -> Option<NonNull<ControlBlock<T, P>>> {
        let block = self.block;
        std::mem::forget(self);
        block
    }
}

/// Copies of a weak handle whose value is already destroyed come out empty.
impl<T, P: AtomicPolicy> Clone for GenericWeak<T, P> {
    fn clone(&self) -> Self {
        match self.block_ref() {
            Some(block) if block.is_alive() => {
                block.weak_ref();
                Self { block: self.block }
            }
            _ => Self::new(),
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl<T, P: AtomicPolicy> Drop for GenericWeak<T, P> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T, P: AtomicPolicy> Default for GenericWeak<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, P: AtomicPolicy> From<&GenericShared<T, P>> for GenericWeak<T, P> {
    fn from(shared: &GenericShared<T, P>) -> Self {
        Self::from_shared(shared)
    }
}

impl<T, P: AtomicPolicy> fmt::Debug for GenericWeak<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block_ref() {
            Some(block) => f
                .debug_struct("Weak")
                .field("strong", &block.strong_count())
                .field("weak", &block.weak_count())
                .finish(),
            None => f.write_str("Weak(Empty)"),
        }
    }
}
