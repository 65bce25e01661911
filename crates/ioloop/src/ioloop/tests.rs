use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use super::*;

/// Handler whose interest and readiness are set by the test.
#[derive(Default)]
struct ScriptedHandler {
	interest: Mutex<Interest>,
	readiness: Mutex<Interest>,
	reads: AtomicUsize,
	writes: AtomicUsize,
	attached: AtomicUsize,
}

impl Handler for ScriptedHandler {
	fn interest(&self) -> Interest {
		*self.interest.lock()
	}

	fn readiness(&self) -> Interest {
		*self.readiness.lock()
	}

	fn on_readable(&self) {
		self.reads.fetch_add(1, Ordering::SeqCst);
	}

	fn on_writable(&self) {
		self.writes.fetch_add(1, Ordering::SeqCst);
	}

	fn attach(&self, _waker: &Waker) {
		self.attached.fetch_add(1, Ordering::SeqCst);
	}
}

const NO_WAIT: Duration = Duration::ZERO;

#[test]
fn deferred_callbacks_run_in_order() {
	let ioloop = IoLoop::new();
	let log = Arc::new(Mutex::new(Vec::new()));
	for i in 0..3 {
		let log = Arc::clone(&log);
		ioloop.add_callback(move || log.lock().push(i));
	}

	assert_eq!(ioloop.run_once(NO_WAIT), 3);
	assert_eq!(*log.lock(), vec![0, 1, 2]);
	assert_eq!(ioloop.run_once(NO_WAIT), 0);
}

#[test]
fn timers_fire_once_due_and_cancelled_timers_do_not() {
	let ioloop = IoLoop::new();
	let fired = Arc::new(AtomicUsize::new(0));

	let f = Arc::clone(&fired);
	let _ = ioloop.call_later(Duration::from_millis(5), move || {
		f.fetch_add(1, Ordering::SeqCst);
	});
	let f = Arc::clone(&fired);
	let cancelled = ioloop
		.call_later(Duration::from_millis(5), move || {
			f.fetch_add(100, Ordering::SeqCst);
		})
		.unwrap();
	assert!(ioloop.cancel_timer(cancelled));
	assert_eq!(ioloop.timer_count(), 1);

	let deadline = Instant::now() + Duration::from_secs(2);
	while ioloop.timer_count() > 0 && Instant::now() < deadline {
		ioloop.run_once(Duration::from_millis(20));
	}

	assert_eq!(fired.load(Ordering::SeqCst), 1);
	assert_eq!(ioloop.timer_count(), 0);
}

#[test]
fn dispatch_requires_interest_and_readiness() {
	let ioloop = IoLoop::new();
	let handler = Arc::new(ScriptedHandler::default());
	*handler.interest.lock() = Interest::READABLE;
	*handler.readiness.lock() = Interest::READABLE | Interest::WRITABLE;
	let id = ioloop.add_handler(handler.clone());

	assert_eq!(handler.attached.load(Ordering::SeqCst), 1);
	assert_eq!(ioloop.run_once(NO_WAIT), 1);
	assert_eq!(ioloop.handler_interest(id), Some(Interest::READABLE));
	assert_eq!(handler.reads.load(Ordering::SeqCst), 1);
	assert_eq!(handler.writes.load(Ordering::SeqCst), 0);
}

#[test]
fn interest_changes_are_seen_only_after_update() {
	let ioloop = IoLoop::new();
	let handler = Arc::new(ScriptedHandler::default());
	*handler.readiness.lock() = Interest::WRITABLE;
	let id = ioloop.add_handler(handler.clone());

	ioloop.run_once(NO_WAIT);
	assert_eq!(handler.writes.load(Ordering::SeqCst), 0);

	*handler.interest.lock() = Interest::WRITABLE;
	ioloop.run_once(NO_WAIT);
	assert_eq!(handler.writes.load(Ordering::SeqCst), 0, "stale cached interest");

	ioloop.update_handler(id);
	ioloop.run_once(NO_WAIT);
	assert_eq!(handler.writes.load(Ordering::SeqCst), 1);
}

#[test]
fn removed_handler_is_not_dispatched() {
	let ioloop = IoLoop::new();
	let handler = Arc::new(ScriptedHandler::default());
	*handler.interest.lock() = Interest::READABLE;
	*handler.readiness.lock() = Interest::READABLE;
	let id = ioloop.add_handler(handler.clone());

	assert!(ioloop.remove_handler(id));
	assert!(!ioloop.remove_handler(id));
	ioloop.run_once(NO_WAIT);
	assert_eq!(handler.reads.load(Ordering::SeqCst), 0);
	assert_eq!(ioloop.handler_count(), 0);
}

#[test]
fn started_loop_runs_tasks_until_stopped() {
	let ioloop = Arc::new(IoLoop::new());
	assert!(!ioloop.is_running());
	ioloop.start().unwrap();
	ioloop.start().unwrap();
	assert!(ioloop.is_running());

	let (tx, rx) = std::sync::mpsc::channel();
	let _ = ioloop.call_later(Duration::from_millis(10), move || {
		let _ = tx.send(std::thread::current().name().map(str::to_owned));
	});
	let thread_name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
	assert_eq!(thread_name.as_deref(), Some("fadeaway-ioloop"));

	ioloop.stop();
	assert!(!ioloop.is_running());
}

#[test]
fn shared_loop_is_a_single_instance() {
	assert!(Arc::ptr_eq(&IoLoop::shared(), &IoLoop::shared()));
}

#[test]
fn unrepresentable_delay_schedules_nothing() {
	let ioloop = IoLoop::new();
	assert!(ioloop.call_later(Duration::MAX, || {}).is_none());
	assert_eq!(ioloop.timer_count(), 0);
	assert_eq!(ioloop.run_once(Duration::MAX), 0);
}

#[test]
fn start_waits_for_a_loop_stopping_itself() {
	let ioloop = Arc::new(IoLoop::new());
	ioloop.start().unwrap();

	let old_done = Arc::new(AtomicBool::new(false));
	let (tx, rx) = std::sync::mpsc::channel();
	let (this, done) = (Arc::clone(&ioloop), Arc::clone(&old_done));
	ioloop.add_callback(move || {
		this.stop();
		tx.send(()).unwrap();
		std::thread::sleep(Duration::from_millis(50));
		done.store(true, Ordering::SeqCst);
	});
	rx.recv_timeout(Duration::from_secs(2)).unwrap();

	ioloop.start().unwrap();
	assert!(old_done.load(Ordering::SeqCst));
	assert!(ioloop.is_running());

	let (tx, rx) = std::sync::mpsc::channel();
	ioloop.add_callback(move || tx.send(()).unwrap());
	rx.recv_timeout(Duration::from_secs(2)).unwrap();
	ioloop.stop();
	assert!(!ioloop.is_running());
}

#[test]
fn start_on_loop_thread_cancels_pending_stop() {
	let ioloop = Arc::new(IoLoop::new());
	ioloop.start().unwrap();

	let this = Arc::clone(&ioloop);
	let (tx, rx) = std::sync::mpsc::channel();
	ioloop.add_callback(move || {
		this.stop();
		this.start().unwrap();
		tx.send(()).unwrap();
	});
	rx.recv_timeout(Duration::from_secs(2)).unwrap();

	let (tx, rx) = std::sync::mpsc::channel();
	ioloop.add_callback(move || tx.send(()).unwrap());
	rx.recv_timeout(Duration::from_secs(2)).unwrap();
	assert!(ioloop.is_running());
	ioloop.stop();
}
