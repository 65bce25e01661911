use std::collections::VecDeque;
use std::sync::Arc;

use fadeaway_ioloop::{Interest, Waker};
use parking_lot::Mutex;
use tracing::trace;

use crate::error::Result;
use crate::{ConnectionEvent, MonitorSocket};

/// Event queue behind one monitor address.
#[derive(Default)]
pub(crate) struct MonitorChannel {
	state: Mutex<ChannelState>,
}

#[derive(Default)]
struct ChannelState {
	events: VecDeque<ConnectionEvent>,
	waker: Option<Waker>,
}

impl MonitorChannel {
	pub(crate) fn publish(&self, event: ConnectionEvent) {
		trace!(kind = ?event.kind, address = %event.address, "transport.memory.monitor_event");
		let mut state = self.state.lock();
		state.events.push_back(event);
		if let Some(waker) = &state.waker {
			waker.wake();
		}
	}
}

/// Subscriber end of an in-process monitor channel.
pub struct MemoryMonitorSocket {
	channel: Arc<MonitorChannel>,
}

impl MemoryMonitorSocket {
	pub(crate) fn new(channel: Arc<MonitorChannel>) -> Self {
		Self { channel }
	}

	/// Number of events waiting.
	pub fn pending(&self) -> usize {
		self.channel.state.lock().events.len()
	}
}

impl MonitorSocket for MemoryMonitorSocket {
	fn readiness(&self) -> Interest {
		if self.channel.state.lock().events.is_empty() {
			Interest::empty()
		} else {
			Interest::READABLE
		}
	}

	fn try_recv(&self) -> Result<Option<ConnectionEvent>> {
		Ok(self.channel.state.lock().events.pop_front())
	}

	fn set_waker(&self, waker: Waker) {
		self.channel.state.lock().waker = Some(waker);
	}
}
