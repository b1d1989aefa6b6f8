//! Synchronization primitives used throughout the crate.
//!
//! The routing index is read on every forwarded HTLC and written only when links come and go, so
//! it sits behind a [`FairRwLock`] rather than a plain [`RwLock`].

pub(crate) mod fairrwlock;

pub use fairrwlock::FairRwLock;
#[allow(unused_imports)]
pub use std::sync::{
	Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
