//! In-process transport.
//!
//! A [`MemoryTransport`] is a context in which [`MemoryServer`]s bind addresses
//! and sockets connect to them. Behaviour follows a brokerless message queue:
//! * connecting before the server is bound succeeds; the link is made at bind time
//! * messages sent while unlinked wait in the socket, up to its send high-water mark
//! * closing a server unlinks its peers, which relink when the address is bound again
//! * link changes are published on the socket's monitor channel, if any

mod monitor;
mod socket;


use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

pub use self::monitor::MemoryMonitorSocket;
use self::monitor::MonitorChannel;
use self::socket::Peer;
pub use self::socket::{MemoryDealerSocket, MemoryRequestSocket, SocketOptions};
use crate::error::{Result, TransportError};
use crate::{ConnectionEventKind, Transport, monitor_address};

/// In-process transport context.
///
/// Cloning yields another handle to the same context.
#[derive(Clone, Default)]
pub struct MemoryTransport {
	hub: Arc<Hub>,
}

impl std::fmt::Debug for MemoryTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.hub.state.lock();
		f.debug_struct("MemoryTransport")
			.field("endpoints", &state.endpoints.keys().collect::<Vec<_>>())
			.finish_non_exhaustive()
	}
}

#[derive(Default)]
pub(crate) struct Hub {
	state: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
	endpoints: HashMap<String, Arc<Endpoint>>,
	waiting: HashMap<String, Vec<Weak<Peer>>>,
	monitors: HashMap<String, Arc<MonitorChannel>>,
}

impl Hub {
	pub(crate) fn connect(&self, peer: &Arc<Peer>, address: &str) -> Result<()> {
		validate_address(address)?;
		let mut state = self.state.lock();
		match state.endpoints.get(address) {
			Some(endpoint) => link(peer, endpoint),
			None => state.waiting.entry(address.to_owned()).or_default().push(Arc::downgrade(peer)),
		}
		Ok(())
	}

	pub(crate) fn register_monitor(&self, endpoint: &str, channel: Arc<MonitorChannel>) {
		self.state.lock().monitors.insert(monitor_address(endpoint), channel);
	}
}

fn validate_address(address: &str) -> Result<()> {
	match address.split_once("://") {
		Some((scheme, target)) if !scheme.is_empty() && !target.is_empty() => Ok(()),
		_ => Err(TransportError::InvalidAddress(address.to_owned())),
	}
}

fn link(peer: &Arc<Peer>, endpoint: &Arc<Endpoint>) {
	endpoint.queue.lock().peers.push(Arc::downgrade(peer));
	peer.link(endpoint);
	peer.notify_connection(ConnectionEventKind::Connected, &endpoint.address);
}

impl Transport for MemoryTransport {
	type Request = MemoryRequestSocket;
	type Dealer = MemoryDealerSocket;
	type Monitor = MemoryMonitorSocket;

	fn request_socket(&self) -> Result<Self::Request> {
		Ok(MemoryRequestSocket::new(Arc::clone(&self.hub)))
	}

	fn dealer_socket(&self) -> Result<Self::Dealer> {
		Ok(MemoryDealerSocket::new(Arc::clone(&self.hub)))
	}

	fn monitor_socket(&self, endpoint: &str) -> Result<Self::Monitor> {
		let address = monitor_address(endpoint);
		let state = self.hub.state.lock();
		let channel = state
			.monitors
			.get(&address)
			.ok_or(TransportError::UnknownEndpoint(address.clone()))?;
		Ok(MemoryMonitorSocket::new(Arc::clone(channel)))
	}
}

impl MemoryTransport {
	/// Creates an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Binds a server to `address`, linking every socket already waiting on it.
	///
	/// # Errors
	///
	/// Fails with [`TransportError::AddressInUse`] if a server is bound there and
	/// [`TransportError::InvalidAddress`] for malformed addresses.
	pub fn bind(&self, address: &str) -> Result<MemoryServer> {
		validate_address(address)?;
		let mut state = self.hub.state.lock();
		if state.endpoints.contains_key(address) {
			return Err(TransportError::AddressInUse(address.to_owned()));
		}
		let endpoint = Arc::new(Endpoint::new(address));
		state.endpoints.insert(address.to_owned(), Arc::clone(&endpoint));
		let waiting = state.waiting.remove(address).unwrap_or_default();
		for peer in waiting.iter().filter_map(Weak::upgrade) {
			link(&peer, &endpoint);
		}
		debug!(address, linked = waiting.len(), "transport.memory.bind");
		Ok(MemoryServer {
			hub: Arc::clone(&self.hub),
			endpoint,
		})
	}
}

/// One message received by a [`MemoryServer`].
pub struct Incoming {
	payload: Vec<u8>,
	identity: Option<String>,
	peer: Weak<Peer>,
}

impl Incoming {
	/// Raw message bytes.
	pub fn payload(&self) -> &[u8] {
		&self.payload
	}

	/// Identity option of the sending socket, if set.
	pub fn identity(&self) -> Option<&str> {
		self.identity.as_deref()
	}

	/// Routes a reply to the sending socket; returns false if it is gone.
	pub fn reply(&self, payload: impl Into<Vec<u8>>) -> bool {
		match self.peer.upgrade() {
			Some(peer) => peer.deliver(payload.into()),
			None => false,
		}
	}
}

pub(crate) struct Endpoint {
	address: String,
	queue: Mutex<EndpointQueue>,
	cond: Condvar,
}

struct EndpointQueue {
	open: bool,
	incoming: VecDeque<Incoming>,
	peers: Vec<Weak<Peer>>,
}

impl Endpoint {
	fn new(address: &str) -> Self {
		Self {
			address: address.to_owned(),
			queue: Mutex::new(EndpointQueue {
				open: true,
				incoming: VecDeque::new(),
				peers: Vec::new(),
			}),
			cond: Condvar::new(),
		}
	}

	/// Queues a message; returns false once the endpoint is closed.
	pub(crate) fn push(&self, payload: Vec<u8>, identity: Option<String>, peer: Weak<Peer>) -> bool {
		let mut queue = self.queue.lock();
		if !queue.open {
			return false;
		}
		queue.incoming.push_back(Incoming { payload, identity, peer });
		self.cond.notify_all();
		true
	}

	pub(crate) fn address(&self) -> &str {
		&self.address
	}
}

/// Bound end of a [`MemoryTransport`] address.
///
/// Dropping the server closes it.
pub struct MemoryServer {
	hub: Arc<Hub>,
	endpoint: Arc<Endpoint>,
}

impl std::fmt::Debug for MemoryServer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemoryServer").field("address", &self.endpoint.address).finish_non_exhaustive()
	}
}

impl MemoryServer {
	/// Bound address.
	pub fn address(&self) -> &str {
		&self.endpoint.address
	}

	/// Pops one message without blocking.
	pub fn try_recv(&self) -> Option<Incoming> {
		self.endpoint.queue.lock().incoming.pop_front()
	}

	/// Blocks up to `timeout` for one message; `None` on timeout or close.
	pub fn recv_timeout(&self, timeout: Duration) -> Option<Incoming> {
		let deadline = Instant::now() + timeout;
		let mut queue = self.endpoint.queue.lock();
		loop {
			if let Some(incoming) = queue.incoming.pop_front() {
				return Some(incoming);
			}
			if !queue.open || self.endpoint.cond.wait_until(&mut queue, deadline).timed_out() {
				return queue.incoming.pop_front();
			}
		}
	}

	/// Number of messages waiting to be received.
	pub fn queued(&self) -> usize {
		self.endpoint.queue.lock().incoming.len()
	}

	/// Number of sockets currently linked.
	pub fn peer_count(&self) -> usize {
		self.endpoint.queue.lock().peers.iter().filter(|p| p.strong_count() > 0).count()
	}

	/// Unbinds the address. Linked sockets see a disconnect and wait for a rebind.
	pub fn close(self) {}

	fn shutdown(&self) {
		let mut state = self.hub.state.lock();
		if state
			.endpoints
			.get(&self.endpoint.address)
			.is_some_and(|bound| Arc::ptr_eq(bound, &self.endpoint))
		{
			state.endpoints.remove(&self.endpoint.address);
		}
		let peers = {
			let mut queue = self.endpoint.queue.lock();
			queue.open = false;
			queue.incoming.clear();
			self.endpoint.cond.notify_all();
			std::mem::take(&mut queue.peers)
		};
		let waiting = state.waiting.entry(self.endpoint.address.clone()).or_default();
		for peer in peers.iter().filter_map(Weak::upgrade) {
			peer.unlink();
			peer.notify_connection(ConnectionEventKind::Disconnected, &self.endpoint.address);
			waiting.push(Arc::downgrade(&peer));
		}
		debug!(address = %self.endpoint.address, "transport.memory.close");
	}
}

impl Drop for MemoryServer {
	fn drop(&mut self) {
		self.shutdown();
	}
}
