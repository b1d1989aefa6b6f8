// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A FIFO queue handing work from any thread to a single link worker.

use crate::prelude::*;
use crate::sync::{Condvar, Mutex};

struct MailboxState<T> {
	queue: VecDeque<T>,
	closed: bool,
}

/// Producers never block beyond the queue lock. The consumer blocks in [`Mailbox::next`] until
/// an item is pushed or the mailbox is closed.
pub(crate) struct Mailbox<T> {
	state: Mutex<MailboxState<T>>,
	condvar: Condvar,
}

impl<T> Mailbox<T> {
	pub(crate) fn new() -> Self {
		Self {
			state: Mutex::new(MailboxState { queue: VecDeque::new(), closed: false }),
			condvar: Condvar::new(),
		}
	}

	/// Queues `item`, handing it back if the mailbox was already closed.
	pub(crate) fn push(&self, item: T) -> Result<(), T> {
		let mut state = self.state.lock().unwrap();
		if state.closed {
			return Err(item);
		}
		state.queue.push_back(item);
		core::mem::drop(state);
		self.condvar.notify_one();
		Ok(())
	}

	/// Blocks until an item is available. Returns `None` once the mailbox is closed, even if items
	/// are left, which must then be collected with [`Mailbox::drain`].
	pub(crate) fn next(&self) -> Option<T> {
		let mut state = self.state.lock().unwrap();
		loop {
			if state.closed {
				return None;
			}
			if let Some(item) = state.queue.pop_front() {
				return Some(item);
			}
			state = self.condvar.wait(state).unwrap();
		}
	}

	/// Refuses further pushes and wakes the consumer. Returns false if already closed.
	pub(crate) fn close(&self) -> bool {
		let mut state = self.state.lock().unwrap();
		if state.closed {
			return false;
		}
		state.closed = true;
		core::mem::drop(state);
		self.condvar.notify_all();
		true
	}

	/// Takes everything still queued, in order.
	pub(crate) fn drain(&self) -> Vec<T> {
		self.state.lock().unwrap().queue.drain(..).collect()
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.state.lock().unwrap().queue.len()
	}
}
