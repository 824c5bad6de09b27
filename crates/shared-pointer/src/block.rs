//! The control block shared by every handle to one value.
//!
//! A block owns the value slot and two counters. The strong count tracks
//! live [`GenericShared`](crate::GenericShared) handles; the weak count
//! tracks every handle of either kind, since each strong handle also holds
//! one weak share. The value is destroyed when the strong count reaches
//! zero and the block itself is freed when the weak count does.

use crate::error::{Error, Result};
use crate::policy::{AtomicPolicy, Counter};
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};

pub(crate) struct ControlBlock<T, P: AtomicPolicy> {
    value: UnsafeCell<Option<T>>,
    strong: P::Counter,
    weak: P::Counter,
}

impl<T, P: AtomicPolicy> ControlBlock<T, P> {
    /// Allocate a block owning `value` with strong = 1, weak = 1.
    ///
    /// Allocation failure is reported through [`handle_alloc_error`].
    pub(crate) fn allocate(value: T) -> NonNull<Self> {
        match Self::try_allocate(value) {
            Ok(block) => block,
            Err(_) => handle_alloc_error(Layout::new::<Self>()),
        }
    }

    /// Allocate a block owning `value` with strong = 1, weak = 1.
    ///
    /// On failure `value` is dropped and no block exists.
    pub(crate) fn try_allocate(value: T) -> Result<NonNull<Self>> {
        let layout = Layout::new::<Self>();
        // SAFETY: the block is never zero-sized, it always holds two counters.
        let raw = unsafe { alloc(layout) }.cast::<Self>();
        let Some(block) = NonNull::new(raw) else {
            return Err(Error::AllocFailed {
                size: layout.size(),
                align: layout.align(),
            });
        };

        // SAFETY: freshly allocated with the layout of Self.
        unsafe {
            block.as_ptr().write(Self {
                value: UnsafeCell::new(Some(value)),
                strong: P::new_counter(1),
                weak: P::new_counter(1),
            });
        }
        log::trace!(target: "shared_pointer", "allocated control block {:p}", block);
        Ok(block)
    }

    #[inline]
    pub(crate) fn strong_count(&self) -> usize {
        self.strong.get()
    }

    #[inline]
    pub(crate) fn weak_count(&self) -> usize {
        self.weak.get()
    }

    /// Whether the value has not been destroyed yet.
    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.strong.get() > 0
    }

    /// Take one more strong reference. The caller must already hold one.
    #[inline]
    pub(crate) fn strong_ref(&self) {
        let count = self.strong.increment();
        assert!(count > 1, "strong reference taken on a destroyed value");
    }

    /// Take one more weak reference. The caller must already hold one.
    #[inline]
    pub(crate) fn weak_ref(&self) {
        let count = self.weak.increment();
        assert!(count > 1, "weak reference taken on a freed control block");
    }

    /// Take a strong and a weak reference if the value is still alive.
    ///
    /// The caller must hold a weak reference. Returns whether the value was
    /// alive; a destroyed value is never revived.
    pub(crate) fn try_strong_ref(&self) -> bool {
        if !self.strong.increment_if_nonzero() {
            return false;
        }
        self.weak_ref();
        true
    }

    /// Drop one strong reference, destroying the value on the last one.
    ///
    /// Returns whether the value was destroyed. The weak share held by the
    /// same handle must be released separately with [`Self::weak_deref`].
    ///
    /// # Safety
    ///
    /// The caller must own the strong reference being released.
    pub(crate) unsafe fn strong_deref(&self) -> bool {
        if self.strong.decrement() > 0 {
            return false;
        }

        // SAFETY: strong just reached zero, nobody else reads the slot.
        let value = unsafe { (*self.value.get()).take() };
        assert!(value.is_some(), "value destroyed twice");
        drop(value);
        log::trace!(target: "shared_pointer", "destroyed value of control block {:p}", self);
        true
    }

    /// Drop one weak reference, freeing the block on the last one.
    ///
    /// # Safety
    ///
    /// The caller must own the weak reference being released and must not
    /// touch `this` afterwards.
    pub(crate) unsafe fn weak_deref(this: NonNull<Self>) {
        // SAFETY: the caller's weak reference keeps the block allocated.
        let block = unsafe { this.as_ref() };
        if block.weak.decrement() > 0 {
            return;
        }
        debug_assert_eq!(block.strong.get(), 0, "block freed with live strong handles");

        // SAFETY: weak reached zero, this is the last reference to the block.
        unsafe {
            debug_assert!((*block.value.get()).is_none());
            ptr::drop_in_place(this.as_ptr());
            dealloc(this.as_ptr().cast(), Layout::new::<Self>());
        }
        log::trace!(target: "shared_pointer", "freed control block {:p}", this);
    }

    /// Shared access to the value.
    ///
    /// # Safety
    ///
    /// The caller must hold a strong reference for the lifetime `'a`.
    #[inline]
    pub(crate) unsafe fn value<'a>(&self) -> &'a T {
        // SAFETY: a live strong reference keeps the slot filled and unmoved.
        match unsafe { &*self.value.get() } {
            Some(value) => value,
            None => unreachable!("strong handle over a destroyed value"),
        }
    }

    /// Exclusive access to the value.
    ///
    /// # Safety
    ///
    /// The caller must hold the only reference of any kind for `'a`.
    #[inline]
    pub(crate) unsafe fn value_mut<'a>(&self) -> &'a mut T {
        // SAFETY: no other handle exists that could observe the slot.
        match unsafe { &mut *self.value.get() } {
            Some(value) => value,
            None => unreachable!("strong handle over a destroyed value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{SingleThreaded, ThreadSafe};
    use alloc_checker::DropCounter;

    type Block<T> = ControlBlock<T, SingleThreaded>;

    #[test]
    fn test_allocate_starts_at_one_one() {
        let block = Block::allocate(7);
        let b = unsafe { block.as_ref() };
        assert_eq!(b.strong_count(), 1);
        assert_eq!(b.weak_count(), 1);
        assert!(b.is_alive());
        assert_eq!(unsafe { *b.value() }, 7);

        unsafe {
            assert!(b.strong_deref());
            Block::weak_deref(block);
        }
    }

    #[test]
    fn test_strong_zero_destroys_value_but_keeps_block() {
        let drops = DropCounter::new();
        let block = Block::allocate(drops.probe(1));
        let b = unsafe { block.as_ref() };

        b.weak_ref();
        assert_eq!(b.weak_count(), 2);

        unsafe {
            assert!(b.strong_deref());
            Block::weak_deref(block);
        }
        assert_eq!(drops.count(), 1);
        assert!(!b.is_alive());
        assert_eq!(b.strong_count(), 0);
        assert_eq!(b.weak_count(), 1);

        unsafe { Block::weak_deref(block) };
        assert_eq!(drops.count(), 1);
    }

    #[test]
    fn test_strong_deref_above_zero_keeps_value() {
        let drops = DropCounter::new();
        let block = Block::allocate(drops.probe(1));
        let b = unsafe { block.as_ref() };

        b.strong_ref();
        b.weak_ref();
        unsafe {
            assert!(!b.strong_deref());
            Block::weak_deref(block);
        }
        assert_eq!(drops.count(), 0);
        assert_eq!(b.strong_count(), 1);
        assert_eq!(b.weak_count(), 1);

        unsafe {
            assert!(b.strong_deref());
            Block::weak_deref(block);
        }
        assert_eq!(drops.count(), 1);
    }

    #[test]
    fn test_try_strong_ref_only_while_alive() {
        let block = ControlBlock::<String, ThreadSafe>::allocate("alive".to_string());
        let b = unsafe { block.as_ref() };
        b.weak_ref();

        assert!(b.try_strong_ref());
        assert_eq!(b.strong_count(), 2);
        assert_eq!(b.weak_count(), 3);

        unsafe {
            b.strong_deref();
            ControlBlock::weak_deref(block);
            b.strong_deref();
            ControlBlock::weak_deref(block);
        }

        assert!(!b.try_strong_ref());
        assert_eq!(b.strong_count(), 0);
        assert_eq!(b.weak_count(), 1);

        unsafe { ControlBlock::weak_deref(block) };
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_double_strong_release_is_fatal() {
        let block = Block::allocate(0u8);
        let b = unsafe { block.as_ref() };
        b.weak_ref();
        unsafe {
            b.strong_deref();
            // Leaks the block; the panic is what matters here.
            b.strong_deref();
        }
    }
}
