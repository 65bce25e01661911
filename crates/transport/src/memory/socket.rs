use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fadeaway_ioloop::{Interest, Waker};
use parking_lot::{Condvar, Mutex};
use tracing::warn;

use super::monitor::MonitorChannel;
use super::{Endpoint, Hub};
use crate::error::{Result, TransportError};
use crate::{ConnectionEvent, ConnectionEventKind, DealerSocket, EventMask, RequestSocket, Socket, SocketOption};

/// Options currently applied to a memory socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
	/// Messages held while unlinked before sends would block.
	pub send_hwm: usize,
	/// Messages held for receiving before arrivals are dropped.
	pub recv_hwm: usize,
	/// Blocking receive timeout; `None` waits forever.
	pub recv_timeout: Option<Duration>,
	/// Linger period; unsent messages are kept on close only when non-zero.
	pub linger: Option<Duration>,
	/// Identity presented to the server.
	pub identity: Option<String>,
}

impl Default for SocketOptions {
	fn default() -> Self {
		Self {
			send_hwm: 1000,
			recv_hwm: 1000,
			recv_timeout: None,
			linger: None,
			identity: None,
		}
	}
}

impl SocketOptions {
	fn apply(&mut self, option: &SocketOption) {
		match option {
			SocketOption::SendHighWaterMark(n) => self.send_hwm = *n,
			SocketOption::RecvHighWaterMark(n) => self.recv_hwm = *n,
			SocketOption::RecvTimeout(t) => self.recv_timeout = Some(*t),
			SocketOption::Linger(t) => self.linger = Some(*t),
			SocketOption::Identity(id) => self.identity = Some(id.clone()),
		}
	}
}

#[derive(Default)]
struct PeerState {
	options: SocketOptions,
	address: Option<String>,
	link: Option<Arc<Endpoint>>,
	outbox: VecDeque<Vec<u8>>,
	inbox: VecDeque<Vec<u8>>,
	waker: Option<Waker>,
	monitor: Option<(Arc<MonitorChannel>, EventMask)>,
	awaiting_reply: bool,
	closed: bool,
}

/// Client end shared by both memory socket kinds.
#[derive(Default)]
pub(crate) struct Peer {
	state: Mutex<PeerState>,
	cond: Condvar,
}

impl Peer {
	fn wake(state: &PeerState) {
		if let Some(waker) = &state.waker {
			waker.wake();
		}
	}

	pub(crate) fn link(self: &Arc<Self>, endpoint: &Arc<Endpoint>) {
		let mut state = self.state.lock();
		let identity = state.options.identity.clone();
		while let Some(payload) = state.outbox.pop_front() {
			if !endpoint.push(payload, identity.clone(), Arc::downgrade(self)) {
				break;
			}
		}
		state.link = Some(Arc::clone(endpoint));
		Self::wake(&state);
	}

	pub(crate) fn unlink(&self) {
		let mut state = self.state.lock();
		state.link = None;
		Self::wake(&state);
	}

	pub(crate) fn notify_connection(&self, kind: ConnectionEventKind, address: &str) {
		let state = self.state.lock();
		if let Some((channel, mask)) = &state.monitor
			&& mask.contains(kind.mask())
		{
			channel.publish(ConnectionEvent {
				kind,
				address: address.to_owned(),
			});
		}
	}

	/// Queues an inbound message; returns false if it was dropped.
	pub(crate) fn deliver(&self, payload: Vec<u8>) -> bool {
		let mut state = self.state.lock();
		if state.closed {
			return false;
		}
		if state.inbox.len() >= state.options.recv_hwm {
			warn!(hwm = state.options.recv_hwm, "transport.memory.recv_hwm_drop");
			return false;
		}
		state.inbox.push_back(payload);
		self.cond.notify_all();
		Self::wake(&state);
		true
	}

	fn enqueue(self: &Arc<Self>, state: &mut PeerState, payload: &[u8]) -> Result<()> {
		if state.closed {
			return Err(TransportError::Closed);
		}
		if let Some(endpoint) = &state.link
			&& endpoint.push(payload.to_vec(), state.options.identity.clone(), Arc::downgrade(self))
		{
			return Ok(());
		}
		if state.outbox.len() >= state.options.send_hwm {
			return Err(TransportError::WouldBlock);
		}
		state.outbox.push_back(payload.to_vec());
		Ok(())
	}

	fn readiness(&self) -> Interest {
		let state = self.state.lock();
		let mut ready = Interest::empty();
		if !state.inbox.is_empty() {
			ready |= Interest::READABLE;
		}
		if !state.closed && (state.link.is_some() || state.outbox.len() < state.options.send_hwm) {
			ready |= Interest::WRITABLE;
		}
		ready
	}

	fn close(&self) {
		let mut state = self.state.lock();
		state.closed = true;
		if state.options.linger.is_none_or(|linger| linger.is_zero()) {
			state.outbox.clear();
		}
		state.inbox.clear();
		state.link = None;
		self.cond.notify_all();
	}
}

/// Memory socket plumbing shared by both socket kinds.
struct SocketCore {
	hub: Arc<Hub>,
	peer: Arc<Peer>,
}

impl SocketCore {
	fn new(hub: Arc<Hub>) -> Self {
		Self {
			hub,
			peer: Arc::new(Peer::default()),
		}
	}

	fn set_option(&self, option: &SocketOption) {
		self.peer.state.lock().options.apply(option);
	}

	fn connect(&self, address: &str) -> Result<()> {
		{
			let mut state = self.peer.state.lock();
			if state.closed {
				return Err(TransportError::Closed);
			}
			if state.address.is_some() {
				return Err(TransportError::State("socket is already connected"));
			}
			state.address = Some(address.to_owned());
		}
		let linked = self.hub.connect(&self.peer, address);
		if linked.is_err() {
			self.peer.state.lock().address = None;
		}
		linked
	}

	fn monitor(&self, endpoint: &str, events: EventMask) {
		let channel = Arc::new(MonitorChannel::default());
		self.hub.register_monitor(endpoint, Arc::clone(&channel));
		self.peer.state.lock().monitor = Some((channel, events));
	}

	fn options(&self) -> SocketOptions {
		self.peer.state.lock().options.clone()
	}

	fn linked_address(&self) -> Option<String> {
		self.peer.state.lock().link.as_ref().map(|endpoint| endpoint.address().to_owned())
	}
}

impl Drop for SocketCore {
	fn drop(&mut self) {
		self.peer.close();
	}
}

macro_rules! memory_socket {
	($name:ident) => {
		impl $name {
			pub(crate) fn new(hub: Arc<Hub>) -> Self {
				Self {
					core: SocketCore::new(hub),
				}
			}

			/// Options currently applied.
			pub fn options(&self) -> SocketOptions {
				self.core.options()
			}

			/// Address of the endpoint this socket is linked to, if any.
			pub fn linked_address(&self) -> Option<String> {
				self.core.linked_address()
			}
		}

		impl Socket for $name {
			fn set_option(&self, option: &SocketOption) -> Result<()> {
				self.core.set_option(option);
				Ok(())
			}

			fn connect(&self, address: &str) -> Result<()> {
				self.core.connect(address)
			}

			fn monitor(&self, endpoint: &str, events: EventMask) -> Result<()> {
				self.core.monitor(endpoint, events);
				Ok(())
			}
		}
	};
}

/// Blocking request/reply memory socket.
pub struct MemoryRequestSocket {
	core: SocketCore,
}

memory_socket!(MemoryRequestSocket);

impl RequestSocket for MemoryRequestSocket {
	fn send(&self, payload: &[u8]) -> Result<()> {
		let peer = &self.core.peer;
		let mut state = peer.state.lock();
		if state.awaiting_reply {
			return Err(TransportError::State("send while a reply is outstanding"));
		}
		peer.enqueue(&mut state, payload)?;
		state.awaiting_reply = true;
		Ok(())
	}

	fn recv(&self) -> Result<Vec<u8>> {
		let peer = &self.core.peer;
		let mut state = peer.state.lock();
		if !state.awaiting_reply {
			return Err(TransportError::State("recv without an outstanding request"));
		}
		let deadline = state.options.recv_timeout.map(|timeout| Instant::now() + timeout);
		loop {
			if let Some(reply) = state.inbox.pop_front() {
				state.awaiting_reply = false;
				return Ok(reply);
			}
			if state.closed {
				return Err(TransportError::Closed);
			}
			match deadline {
				Some(deadline) => {
					if peer.cond.wait_until(&mut state, deadline).timed_out() && state.inbox.is_empty() {
						return Err(TransportError::Timeout);
					}
				}
				None => peer.cond.wait(&mut state),
			}
		}
	}
}

/// Non-blocking memory socket.
pub struct MemoryDealerSocket {
	core: SocketCore,
}

memory_socket!(MemoryDealerSocket);

impl DealerSocket for MemoryDealerSocket {
	fn readiness(&self) -> Interest {
		self.core.peer.readiness()
	}

	fn try_send(&self, payload: &[u8]) -> Result<()> {
		let peer = &self.core.peer;
		let mut state = peer.state.lock();
		peer.enqueue(&mut state, payload)
	}

	fn try_recv(&self) -> Result<Option<Vec<u8>>> {
		let mut state = self.core.peer.state.lock();
		if state.closed {
			return Err(TransportError::Closed);
		}
		Ok(state.inbox.pop_front())
	}

	fn set_waker(&self, waker: Waker) {
		self.core.peer.state.lock().waker = Some(waker);
	}
}
