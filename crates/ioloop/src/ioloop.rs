//! The readiness loop.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::timer::{TimerHandle, TimerQueue};
use crate::waker::Waker;
use crate::{Handler, Interest};

/// Upper bound on one idle wait when no timer is due sooner.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Deferred unit of work executed on the loop thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifier of a registered [`Handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

struct Registration {
	handler: Arc<dyn Handler>,
	interest: Interest,
	dirty: bool,
}

#[derive(Default)]
struct LoopState {
	next_handler: u64,
	handlers: BTreeMap<HandlerId, Registration>,
	callbacks: VecDeque<Task>,
	timers: TimerQueue,
}

/// Single-threaded scheduler dispatching handler readiness, timers and deferred tasks.
///
/// Registration, timer scheduling and deferred tasks may be requested from any
/// thread. Dispatch happens inside [`IoLoop::run_once`], which [`IoLoop::start`]
/// calls repeatedly on a dedicated thread.
pub struct IoLoop {
	state: Mutex<LoopState>,
	waker: Waker,
	running: AtomicBool,
	stopping: AtomicBool,
	thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for IoLoop {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("IoLoop")
			.field("handlers", &state.handlers.len())
			.field("timers", &state.timers.len())
			.field("running", &self.is_running())
			.finish_non_exhaustive()
	}
}

impl Default for IoLoop {
	fn default() -> Self {
		Self::new()
	}
}

impl IoLoop {
	/// Creates a stopped loop with no handlers.
	pub fn new() -> Self {
		Self {
			state: Mutex::new(LoopState::default()),
			waker: Waker::new(),
			running: AtomicBool::new(false),
			stopping: AtomicBool::new(false),
			thread: Mutex::new(None),
		}
	}

	/// Returns the process-wide loop, creating it on first use.
	///
	/// The shared loop is not started implicitly; callers check
	/// [`IoLoop::is_running`] and call [`IoLoop::start`]. It lives until
	/// [`IoLoop::stop`] or process exit.
	pub fn shared() -> Arc<Self> {
		static SHARED: OnceLock<Arc<IoLoop>> = OnceLock::new();
		Arc::clone(SHARED.get_or_init(|| Arc::new(Self::new())))
	}

	/// Returns a waker that interrupts this loop's idle wait.
	pub fn waker(&self) -> Waker {
		self.waker.clone()
	}

	/// Registers a handler; its interest is read on the next iteration.
	pub fn add_handler(&self, handler: Arc<dyn Handler>) -> HandlerId {
		handler.attach(&self.waker);
		let id = {
			let mut state = self.state.lock();
			state.next_handler = state.next_handler.wrapping_add(1);
			let id = HandlerId(state.next_handler);
			state.handlers.insert(
				id,
				Registration {
					handler,
					interest: Interest::empty(),
					dirty: true,
				},
			);
			id
		};
		trace!(handler = ?id, "ioloop.handler.add");
		self.waker.wake();
		id
	}

	/// Unregisters a handler; returns false if it was not registered.
	pub fn remove_handler(&self, id: HandlerId) -> bool {
		let removed = self.state.lock().handlers.remove(&id).is_some();
		trace!(handler = ?id, removed, "ioloop.handler.remove");
		removed
	}

	/// Asks the loop to re-read the handler's interest set.
	///
	/// The refresh happens on the loop thread, so this never calls back into
	/// the handler and is safe to invoke while the handler holds its own locks.
	pub fn update_handler(&self, id: HandlerId) {
		if let Some(registration) = self.state.lock().handlers.get_mut(&id) {
			registration.dirty = true;
		}
		self.waker.wake();
	}

	/// Interest currently cached for a handler.
	pub fn handler_interest(&self, id: HandlerId) -> Option<Interest> {
		self.state.lock().handlers.get(&id).map(|r| r.interest)
	}

	/// Queues a task to run on the loop thread during the next iteration.
	pub fn add_callback(&self, task: impl FnOnce() + Send + 'static) {
		self.state.lock().callbacks.push_back(Box::new(task));
		self.waker.wake();
	}

	/// Schedules a task at an absolute deadline.
	pub fn call_at(&self, deadline: Instant, task: impl FnOnce() + Send + 'static) -> TimerHandle {
		let handle = self.state.lock().timers.insert(deadline, Box::new(task));
		self.waker.wake();
		handle
	}

	/// Schedules a task after a delay.
	///
	/// Returns `None`, dropping the task, when the deadline lies beyond what
	/// [`Instant`] can represent; such a timer would never fire anyway.
	pub fn call_later(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> Option<TimerHandle> {
		let Some(deadline) = Instant::now().checked_add(delay) else {
			debug!(?delay, "ioloop.timer.unrepresentable");
			return None;
		};
		Some(self.call_at(deadline, task))
	}

	/// Cancels a timer; returns false if it already fired or was cancelled.
	pub fn cancel_timer(&self, handle: TimerHandle) -> bool {
		self.state.lock().timers.cancel(handle)
	}

	/// Number of registered handlers.
	pub fn handler_count(&self) -> usize {
		self.state.lock().handlers.len()
	}

	/// Number of scheduled timers.
	pub fn timer_count(&self) -> usize {
		self.state.lock().timers.len()
	}

	/// Returns true while the loop thread is running.
	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::Acquire)
	}

	/// Spawns the loop thread. Calling `start` on a running loop does nothing.
	///
	/// If a stop is still in progress, waits for the old thread to exit before
	/// spawning, so at most one thread ever drives the loop. Called from the
	/// loop thread after [`IoLoop::stop`], it cancels the pending stop.
	///
	/// # Errors
	///
	/// Returns the OS error if the thread cannot be spawned.
	pub fn start(self: &Arc<Self>) -> std::io::Result<()> {
		loop {
			let mut thread = self.thread.lock();
			if thread.is_none() {
				return self.spawn(&mut thread);
			}
			if thread
				.as_ref()
				.is_some_and(|handle| handle.thread().id() == std::thread::current().id())
			{
				self.stopping.store(false, Ordering::Release);
				return Ok(());
			}
			let finished = thread.as_ref().is_some_and(JoinHandle::is_finished);
			if !finished && !self.stopping.load(Ordering::Acquire) {
				return Ok(());
			}
			let exiting = thread.take();
			drop(thread);
			if let Some(handle) = exiting {
				join(handle);
			}
		}
	}

	fn spawn(self: &Arc<Self>, thread: &mut Option<JoinHandle<()>>) -> std::io::Result<()> {
		self.stopping.store(false, Ordering::Release);
		self.running.store(true, Ordering::Release);
		let this = Arc::clone(self);
		let spawned = std::thread::Builder::new()
			.name("fadeaway-ioloop".into())
			.spawn(move || this.run());
		match spawned {
			Ok(handle) => {
				*thread = Some(handle);
				Ok(())
			}
			Err(e) => {
				self.running.store(false, Ordering::Release);
				Err(e)
			}
		}
	}

	/// Stops the loop thread and waits for it to exit.
	///
	/// Handlers, timers and queued tasks stay registered, so a later
	/// [`IoLoop::start`] resumes where the loop left off. Calling `stop` from
	/// the loop thread itself requests the exit without joining; the thread
	/// handle is kept so that a concurrent `start` waits for the exit.
	pub fn stop(&self) {
		self.stopping.store(true, Ordering::Release);
		self.waker.wake();
		let mut thread = self.thread.lock();
		if thread
			.as_ref()
			.is_some_and(|handle| handle.thread().id() == std::thread::current().id())
		{
			return;
		}
		let handle = thread.take();
		drop(thread);
		if let Some(handle) = handle {
			join(handle);
		}
	}

	fn run(&self) {
		info!("ioloop.start");
		while !self.stopping.load(Ordering::Acquire) {
			self.run_once(POLL_INTERVAL);
		}
		self.running.store(false, Ordering::Release);
		info!("ioloop.stop");
	}

	/// Runs one iteration: deferred tasks, due timers, then one readiness pass.
	///
	/// When the iteration did no work it sleeps until woken, until the next
	/// timer is due, or for at most `max_wait`. Returns the number of tasks,
	/// timers and handler callbacks executed.
	pub fn run_once(&self, max_wait: Duration) -> usize {
		let mut work = 0;

		let callbacks = std::mem::take(&mut self.state.lock().callbacks);
		for task in callbacks {
			task();
			work += 1;
		}

		let due = self.state.lock().timers.pop_expired(Instant::now());
		for task in due {
			task();
			work += 1;
		}

		work += self.dispatch_ready();

		if work == 0 {
			let now = Instant::now();
			let mut deadline = now.checked_add(max_wait).unwrap_or(now + POLL_INTERVAL);
			if let Some(next) = self.state.lock().timers.next_deadline() {
				deadline = deadline.min(next);
			}
			if deadline > now {
				self.waker.wait_until(deadline);
			}
		}
		work
	}

	fn dispatch_ready(&self) -> usize {
		let snapshot: Vec<(HandlerId, Arc<dyn Handler>, Option<Interest>)> = {
			let mut state = self.state.lock();
			state
				.handlers
				.iter_mut()
				.map(|(id, r)| {
					let cached = if std::mem::take(&mut r.dirty) { None } else { Some(r.interest) };
					(*id, Arc::clone(&r.handler), cached)
				})
				.collect()
		};

		let mut work = 0;
		for (id, handler, cached) in snapshot {
			let interest = match cached {
				Some(interest) => interest,
				None => {
					let interest = handler.interest();
					match self.state.lock().handlers.get_mut(&id) {
						Some(r) => r.interest = interest,
						None => continue,
					}
					debug!(handler = ?id, ?interest, "ioloop.handler.interest");
					interest
				}
			};
			if interest.is_empty() {
				continue;
			}

			let ready = handler.readiness() & interest;
			if ready.contains(Interest::READABLE) && self.is_registered(id) {
				handler.on_readable();
				work += 1;
			}
			if ready.contains(Interest::WRITABLE) && self.is_registered(id) {
				handler.on_writable();
				work += 1;
			}
		}
		work
	}

	fn is_registered(&self, id: HandlerId) -> bool {
		self.state.lock().handlers.contains_key(&id)
	}
}

fn join(handle: JoinHandle<()>) {
	if handle.join().is_err() {
		tracing::error!("ioloop.thread_panicked");
	}
}

#[cfg(test)]
mod tests;
