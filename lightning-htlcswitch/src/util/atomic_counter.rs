//! A monotonic id source shared between threads.

use core::sync::atomic::{AtomicU64, Ordering};

/// Hands out consecutive ids starting at the given value.
pub(crate) struct AtomicCounter {
	counter: AtomicU64,
}

impl AtomicCounter {
	pub(crate) fn new() -> Self {
		Self::starting_at(0)
	}

	pub(crate) fn starting_at(first: u64) -> Self {
		Self { counter: AtomicU64::new(first) }
	}

	pub(crate) fn next(&self) -> u64 {
		self.counter.fetch_add(1, Ordering::AcqRel)
	}
}
