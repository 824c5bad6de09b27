//! Strong (owning) handle.

use crate::block::ControlBlock;
use crate::error::Result;
use crate::policy::{AtomicPolicy, DefaultPolicy, SingleThreaded, ThreadSafe};
use crate::weak::GenericWeak;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

/// A strong handle granting shared ownership of a heap value.
///
/// Every clone shares one control block. The value is dropped when the last
/// strong handle goes away; the block itself lives on while any
/// [`GenericWeak`] still refers to it.
///
/// A handle may also be empty. Empty handles own no block and cost no
/// allocation.
///
/// # Example
///
/// ```
/// use shared_pointer::Shared;
///
/// let owner = Shared::new(vec![1, 2, 3]);
/// let copy = owner.clone();
///
/// assert_eq!(owner.strong_count(), Some(2));
/// assert_eq!(*copy.get(), vec![1, 2, 3]);
/// ```
pub struct GenericShared<T, P: AtomicPolicy = DefaultPolicy> {
    block: Option<NonNull<ControlBlock<T, P>>>,
    _owns: PhantomData<ControlBlock<T, P>>,
}

/// Strong handle using the crate's default counting policy.
pub type Shared<T> = GenericShared<T, DefaultPolicy>;

/// Strong handle with atomic counters, shareable across threads.
pub type ThreadSafeShared<T> = GenericShared<T, ThreadSafe>;

/// Strong handle with plain counters. Neither `Send` nor `Sync`.
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<shared_pointer::LocalShared<i32>>();
/// ```
///
/// ```compile_fail
/// fn assert_sync<T: Sync>() {}
/// assert_sync::<shared_pointer::LocalShared<i32>>();
/// ```
pub type LocalShared<T> = GenericShared<T, SingleThreaded>;

// SAFETY: only counters that are Sync (the `ThreadSafe` policy) qualify,
// which makes ref/deref race-free. The value itself is shared between
// threads so it must be Send + Sync, like `Arc<T>`.
unsafe impl<T: Send + Sync, P: AtomicPolicy> Send for GenericShared<T, P>
where
    P::Counter: Sync,
{
}
// SAFETY: see above.
unsafe impl<T: Send + Sync, P: AtomicPolicy> Sync for GenericShared<T, P>
where
    P::Counter: Sync,
{
}

impl<T, P: AtomicPolicy> GenericShared<T, P> {
    /// Create an empty handle. Does not allocate.
    #[inline]
    pub const fn empty() -> Self {
        Self {
            block: None,
            _owns: PhantomData,
        }
    }

    /// Allocate a new control block owning `value`.
    pub fn new(value: T) -> Self {
        Self::from_block(ControlBlock::allocate(value))
    }

    /// Like [`Self::new`] but reports allocation failure instead of aborting.
    pub fn try_new(value: T) -> Result<Self> {
        ControlBlock::try_allocate(value).map(Self::from_block)
    }

    /// Create a handle from an optional value. `None` gives an empty handle.
    pub fn from_option(value: Option<T>) -> Self {
        value.map_or_else(Self::empty, Self::new)
    }

    #[inline]
    fn from_block(block: NonNull<ControlBlock<T, P>>) -> Self {
        Self {
            block: Some(block),
            _owns: PhantomData,
        }
    }

    /// Wrap a block whose strong and weak references were already taken on
    /// behalf of the new handle.
    ///
    /// # Safety
    ///
    /// One strong and one weak reference on `block` must be transferred to
    /// the returned handle.
    #[inline]
    pub(crate) unsafe fn adopt(block: NonNull<ControlBlock<T, P>>) -> Self {
        Self::from_block(block)
    }

    #[inline]
    pub(crate) fn block(&self) -> Option<NonNull<ControlBlock<T, P>>> {
        self.block
    }

    #[inline]
    fn block_ref(&self) -> Option<&ControlBlock<T, P>> {
        // SAFETY: our strong reference keeps the block allocated.
        self.block.map(|block| unsafe { &*block.as_ptr() })
    }

    /// Returns true if the handle owns no value.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// Borrow the value.
    ///
    /// # Panics
    ///
    /// Panics if the handle is empty, like dereferencing a null pointer.
    /// Check [`Self::is_empty`] or use [`Self::try_get`] first.
    #[inline]
    #[track_caller]
    pub fn get(&self) -> &T {
        match self.try_get() {
            Some(value) => value,
            None => empty_dereference(),
        }
    }

    /// Borrow the value, or `None` for an empty handle.
    #[inline]
    pub fn try_get(&self) -> Option<&T> {
        // SAFETY: we hold a strong reference for as long as `self` is borrowed.
        self.block_ref().map(|block| unsafe { block.value() })
    }

    /// Mutable access, only if this handle is the sole reference of any kind.
    ///
    /// Returns `None` when the handle is empty, shared with other strong
    /// handles, or observed by weak handles.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let block = self.block_ref()?;
        if block.strong_count() != 1 || block.weak_count() != 1 {
            return None;
        }
        // SAFETY: counts prove no other handle exists, and `&mut self`
        // prevents new ones from being made while the borrow lives.
        Some(unsafe { block.value_mut() })
    }

    /// Number of strong handles sharing the block, `None` if empty.
    #[inline]
    pub fn strong_count(&self) -> Option<usize> {
        self.block_ref().map(ControlBlock::strong_count)
    }

    /// Number of references (strong and weak) keeping the block allocated,
    /// `None` if empty.
    #[inline]
    pub fn weak_count(&self) -> Option<usize> {
        self.block_ref().map(ControlBlock::weak_count)
    }

    /// Returns true if both handles share one block, or both are empty.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }

    /// Make this handle share `other`'s block.
    ///
    /// Assigning a handle to itself, or to a handle already sharing the
    /// same block, leaves every count untouched.
    pub fn assign(&mut self, other: &Self) {
        if Self::ptr_eq(self, other) {
            return;
        }
        let adopted = other.clone();
        self.release();
        self.block = adopted.into_block();
    }

    /// Release the current block and take ownership of `value` instead.
    ///
    /// The old reference is released first, so a value owned only by this
    /// handle is dropped before the new block is allocated. `None` leaves
    /// the handle empty.
    pub fn reset(&mut self, value: Option<T>) {
        self.release();
        self.block = Self::from_option(value).into_block();
    }

    /// Like [`Self::reset`] but reports allocation failure.
    ///
    /// The new block is allocated before the old reference is released, so
    /// on failure the handle keeps its previous block and `value` is dropped.
    pub fn try_reset(&mut self, value: Option<T>) -> Result<()> {
        let replacement = match value {
            Some(value) => Self::try_new(value)?,
            None => Self::empty(),
        };
        self.release();
        self.block = replacement.into_block();
        Ok(())
    }

    /// Release the current block, leaving the handle empty.
    #[inline]
    pub fn clear(&mut self) {
        self.release();
    }

    /// Create a weak handle observing the same block.
    #[inline]
    pub fn downgrade(&self) -> GenericWeak<T, P> {
        GenericWeak::from_shared(self)
    }

    fn into_block(self) -> Option<NonNull<ControlBlock<T, P>>> {
        let block = self.block;
        std::mem::forget(self);
        block
    }

    fn release(&mut self) {
        if let Some(block) = self.block.take() {
            // SAFETY: this handle owned one strong and one weak reference,
            // and `take` makes sure it is released only once.
            unsafe {
                block.as_ref().strong_deref();
                ControlBlock::weak_deref(block);
            }
        }
    }
}

#[cold]
#[track_caller]
fn empty_dereference() -> ! {
    unreachable!("dereferenced an empty shared handle")
}

impl<T, P: AtomicPolicy> Clone for GenericShared<T, P> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block_ref() {
            block.strong_ref();
            block.weak_ref();
        }
        Self {
            block: self.block,
            _owns: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl<T, P: AtomicPolicy> Drop for GenericShared<T, P> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T, P: AtomicPolicy> Default for GenericShared<T, P> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T, P: AtomicPolicy> From<T> for GenericShared<T, P> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T, P: AtomicPolicy> Deref for GenericShared<T, P> {
    type Target = T;

    #[inline]
    #[track_caller]
    fn deref(&self) -> &Self::Target {
        self.get()
    }
}

impl<T: fmt::Debug, P: AtomicPolicy> fmt::Debug for GenericShared<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block_ref() {
            Some(block) => f
                .debug_struct("Shared")
                // SAFETY: `self` holds a strong reference.
                .field("value", unsafe { block.value() })
                .field("strong", &block.strong_count())
                .field("weak", &block.weak_count())
                .finish(),
            None => f.write_str("Shared(Empty)"),
        }
    }
}
