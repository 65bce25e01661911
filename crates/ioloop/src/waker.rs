use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

/// Cross-thread signal interrupting a sleeping loop iteration.
///
/// Wakeups are latched: a [`Waker::wake`] issued while the loop is busy is
/// observed by the next wait instead of being lost.
#[derive(Debug, Clone, Default)]
pub struct Waker {
	inner: Arc<Signal>,
}

#[derive(Debug, Default)]
struct Signal {
	pending: Mutex<bool>,
	cond: Condvar,
}

impl Waker {
	/// Creates an unsignalled waker.
	pub fn new() -> Self {
		Self::default()
	}

	/// Signals the loop.
	pub fn wake(&self) {
		let mut pending = self.inner.pending.lock();
		*pending = true;
		self.inner.cond.notify_all();
	}

	/// Blocks until woken or `deadline` passes; returns true if woken.
	pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
		let mut pending = self.inner.pending.lock();
		while !*pending {
			if self.inner.cond.wait_until(&mut pending, deadline).timed_out() {
				break;
			}
		}
		std::mem::take(&mut *pending)
	}
}
