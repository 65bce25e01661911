//! Cooperative readiness loop driving RPC clients and connection supervisors.
//!
//! This crate provides the scheduler primitives the client crates are written against:
//! * [`Handler`]: An I/O participant exposing interest, readiness and dispatch callbacks
//! * [`IoLoop`]: A single-threaded loop dispatching readiness, timers and deferred tasks
//! * [`Interest`]: Readable/writable condition set
//! * [`Waker`]: Cross-thread signal used by sockets to interrupt a sleeping loop
//!
//! Every handler callback, timer and deferred task runs on the loop's own thread,
//! so a handler never observes two of its callbacks overlapping.

#![warn(missing_docs)]

mod ioloop;
mod timer;
mod waker;

pub use ioloop::{HandlerId, IoLoop, POLL_INTERVAL, Task};
pub use timer::TimerHandle;
pub use waker::Waker;

bitflags::bitflags! {
	/// Set of I/O conditions a handler wants watched, or that a socket reports.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct Interest: u8 {
		/// Input is available.
		const READABLE = 0b01;
		/// Output capacity is available.
		const WRITABLE = 0b10;
	}
}

/// An I/O participant registered with an [`IoLoop`].
///
/// The loop caches [`Handler::interest`] and only re-reads it after
/// [`IoLoop::update_handler`]. On every iteration it intersects the cached
/// interest with [`Handler::readiness`] and dispatches at most one
/// `on_readable` and one `on_writable` call.
pub trait Handler: Send + Sync + 'static {
	/// Conditions this handler wants to be dispatched for.
	fn interest(&self) -> Interest;

	/// Conditions currently satisfied by the underlying socket.
	fn readiness(&self) -> Interest;

	/// Called when readable interest and readiness coincide.
	fn on_readable(&self) {}

	/// Called when writable interest and readiness coincide.
	fn on_writable(&self) {}

	/// Called once when the handler is registered, so the socket can wake the loop.
	fn attach(&self, _waker: &Waker) {}
}
