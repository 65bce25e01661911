//! Deadline-ordered timer queue with cancel-by-handle.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::Task;

/// Handle identifying one scheduled timer, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
	/// Raw handle value, for logging.
	pub const fn raw(self) -> u64 {
		self.0
	}
}

/// Timers keyed by `(deadline, handle)` so equal deadlines fire in scheduling order.
#[derive(Default)]
pub(crate) struct TimerQueue {
	next: u64,
	by_deadline: BTreeMap<(Instant, TimerHandle), Task>,
	deadlines: HashMap<TimerHandle, Instant>,
}

impl TimerQueue {
	pub fn insert(&mut self, deadline: Instant, task: Task) -> TimerHandle {
		self.next = self.next.wrapping_add(1);
		let handle = TimerHandle(self.next);
		self.by_deadline.insert((deadline, handle), task);
		self.deadlines.insert(handle, deadline);
		handle
	}

	/// Removes a timer; returns false if it already fired or was cancelled.
	pub fn cancel(&mut self, handle: TimerHandle) -> bool {
		match self.deadlines.remove(&handle) {
			Some(deadline) => self.by_deadline.remove(&(deadline, handle)).is_some(),
			None => false,
		}
	}

	pub fn next_deadline(&self) -> Option<Instant> {
		self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
	}

	/// Removes and returns every timer due at `now`, earliest first.
	pub fn pop_expired(&mut self, now: Instant) -> Vec<Task> {
		let mut due = Vec::new();
		while let Some(entry) = self.by_deadline.first_entry() {
			let (deadline, handle) = *entry.key();
			if deadline > now {
				break;
			}
			due.push(entry.remove());
			self.deadlines.remove(&handle);
		}
		due
	}

	pub fn len(&self) -> usize {
		self.deadlines.len()
	}
}
