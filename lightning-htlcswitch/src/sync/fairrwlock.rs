use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockResult};

/// A [`RwLock`] which does not let a stream of readers starve a writer.
///
/// Every forwarded HTLC takes a read lock on the switch's link index, while link registration and
/// short channel id updates take the write lock. With libstd's `RwLock` on pthreads, a busy node
/// could delay a re-registration after a reorg indefinitely. Here, once a writer is waiting, new
/// readers queue up behind it by briefly taking the write lock themselves.
pub struct FairRwLock<T> {
	lock: RwLock<T>,
	waiting_writers: AtomicUsize,
}

impl<T> FairRwLock<T> {
	pub fn new(t: T) -> Self {
		Self { lock: RwLock::new(t), waiting_writers: AtomicUsize::new(0) }
	}

	// Relaxed is fine for the counter, the inner RwLock orders everything else.
	pub fn write(&self) -> LockResult<RwLockWriteGuard<'_, T>> {
		self.waiting_writers.fetch_add(1, Ordering::Relaxed);
		let res = self.lock.write();
		self.waiting_writers.fetch_sub(1, Ordering::Relaxed);
		res
	}

	pub fn read(&self) -> LockResult<RwLockReadGuard<'_, T>> {
		if self.waiting_writers.load(Ordering::Relaxed) != 0 {
			let _queue_behind_writer = self.lock.write();
		}
		self.lock.read()
	}

	#[allow(dead_code)]
	pub fn try_write(&self) -> TryLockResult<RwLockWriteGuard<'_, T>> {
		self.lock.try_write()
	}
}
