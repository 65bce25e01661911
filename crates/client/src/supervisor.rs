//! Connection availability supervision.
//!
//! A [`Supervisor`] turns the raw connect/disconnect events of a monitored
//! socket into availability callbacks. Callbacks fire once per transition:
//! a repeated event with no opposite event in between changes nothing.

use std::sync::Arc;

use fadeaway_ioloop::{Handler, Interest, Waker};
use fadeaway_transport::{ConnectionEvent, ConnectionEventKind, MonitorSocket};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Availability of the supervised endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Availability {
	/// No event observed yet.
	#[default]
	Unknown,
	/// The socket is linked to the endpoint.
	Available,
	/// The link was lost; the socket reconnects on its own.
	Unavailable,
}

type Notify = Arc<dyn Fn() + Send + Sync + 'static>;

/// Availability state machine for one monitored endpoint.
pub struct Supervisor {
	endpoint: String,
	state: Mutex<Availability>,
	on_available: Option<Notify>,
	on_unavailable: Option<Notify>,
}

impl std::fmt::Debug for Supervisor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Supervisor")
			.field("endpoint", &self.endpoint)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl Supervisor {
	/// Creates a supervisor in the [`Availability::Unknown`] state with no callbacks.
	pub fn new(endpoint: impl Into<String>) -> Self {
		Self {
			endpoint: endpoint.into(),
			state: Mutex::new(Availability::Unknown),
			on_available: None,
			on_unavailable: None,
		}
	}

	/// Sets the callback run on every transition to [`Availability::Available`].
	#[must_use]
	pub fn on_available(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
		self.on_available = Some(Arc::new(callback));
		self
	}

	/// Sets the callback run on every transition to [`Availability::Unavailable`].
	#[must_use]
	pub fn on_unavailable(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
		self.on_unavailable = Some(Arc::new(callback));
		self
	}

	/// Name of the monitored endpoint.
	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	/// Current availability.
	pub fn state(&self) -> Availability {
		*self.state.lock()
	}

	/// Applies one event; returns true if it caused a transition.
	///
	/// The matching callback runs after the state lock is released.
	pub fn handle_event(&self, event: &ConnectionEvent) -> bool {
		let next = match event.kind {
			ConnectionEventKind::Connected => Availability::Available,
			ConnectionEventKind::Disconnected => Availability::Unavailable,
		};
		let previous = std::mem::replace(&mut *self.state.lock(), next);
		if previous == next {
			return false;
		}

		info!(endpoint = %self.endpoint, address = %event.address, from = ?previous, to = ?next, "supervisor.transition");
		let callback = match next {
			Availability::Available => self.on_available.as_ref(),
			_ => self.on_unavailable.as_ref(),
		};
		if let Some(callback) = callback {
			callback();
		}
		true
	}
}

/// Loop handler feeding a monitor socket into a [`Supervisor`].
pub(crate) struct SupervisorHandler<M> {
	supervisor: Arc<Supervisor>,
	monitor: M,
}

impl<M: MonitorSocket> SupervisorHandler<M> {
	pub(crate) fn new(supervisor: Arc<Supervisor>, monitor: M) -> Self {
		Self { supervisor, monitor }
	}
}

impl<M: MonitorSocket> Handler for SupervisorHandler<M> {
	fn interest(&self) -> Interest {
		Interest::READABLE
	}

	fn readiness(&self) -> Interest {
		self.monitor.readiness()
	}

	fn on_readable(&self) {
		match self.monitor.try_recv() {
			Ok(Some(event)) => {
				self.supervisor.handle_event(&event);
			}
			Ok(None) => {}
			Err(e) => warn!(endpoint = %self.supervisor.endpoint, error = %e, "supervisor.recv_failed"),
		}
	}

	fn attach(&self, waker: &Waker) {
		self.monitor.set_waker(waker.clone());
	}
}
