//! # Shared-Pointer
//!
//! Reference-counted ownership with strong and weak handles over one
//! control block.
//!
//! ## Features
//!
//! - **Strong handles** ([`Shared`]): shared ownership, the value is dropped
//!   with the last one
//! - **Weak handles** ([`Weak`]): observe the value without keeping it alive,
//!   and promote back with [`Weak::lock`] while it still exists
//! - **Empty handles**: constructing from `None` allocates nothing
//! - **Generic counting policy**: `SingleThreaded` or `ThreadSafe` via the
//!   `AtomicPolicy` trait; the `thread-safe` feature picks the default
//!
//! Reference cycles of strong handles are never collected. Break them with
//! weak handles.
//!
//! ## Quick Start
//!
//! ```rust
//! use shared_pointer::{Shared, Weak};
//!
//! let mut owner = Shared::new("hello".to_string());
//! let mut observer = Weak::from_shared(&owner);
//!
//! let promoted = observer.lock();
//! assert_eq!(promoted.get(), "hello");
//! assert_eq!(owner.strong_count(), Some(2));
//!
//! drop(promoted);
//! owner.reset(None); // value dropped here
//! assert!(observer.lock().is_empty());
//! ```

mod block;
mod error;
mod policy;
mod shared;
mod weak;

pub use error::{Error, Result};
pub use policy::{AtomicPolicy, Counter, DefaultPolicy, SingleThreaded, ThreadSafe};
pub use shared::{GenericShared, LocalShared, Shared, ThreadSafeShared};
pub use weak::{GenericWeak, LocalWeak, ThreadSafeWeak, Weak};
