//! Message transport abstraction.
//!
//! The RPC clients never talk to a network stack directly. They are written
//! against the traits in this crate:
//! * [`Transport`]: factory for the three socket kinds below
//! * [`RequestSocket`]: blocking request/reply socket with strict send/recv alternation
//! * [`DealerSocket`]: non-blocking socket exposing readiness for an [`fadeaway_ioloop::IoLoop`]
//! * [`MonitorSocket`]: stream of [`ConnectionEvent`]s for one monitored socket
//!
//! [`memory::MemoryTransport`] implements all of them in-process.

#![warn(missing_docs)]

pub mod error;
pub mod memory;
mod option;

pub use error::{Result, TransportError};
use fadeaway_ioloop::{Interest, Waker};
pub use option::SocketOption;

bitflags::bitflags! {
	/// Connection events a monitor should report.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
	pub struct EventMask: u8 {
		/// Link to the endpoint established.
		const CONNECTED = 0b01;
		/// Link to the endpoint lost.
		const DISCONNECTED = 0b10;
	}
}

/// Kind of a [`ConnectionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
	/// The socket is linked to its endpoint.
	Connected,
	/// The socket lost its endpoint; it reconnects on its own.
	Disconnected,
}

impl ConnectionEventKind {
	fn mask(self) -> EventMask {
		match self {
			Self::Connected => EventMask::CONNECTED,
			Self::Disconnected => EventMask::DISCONNECTED,
		}
	}
}

/// One connection state change observed on a monitored socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
	/// What happened.
	pub kind: ConnectionEventKind,
	/// Address of the endpoint involved.
	pub address: String,
}

/// Address of the monitor channel for a named endpoint.
pub fn monitor_address(endpoint: &str) -> String {
	format!("inproc://{endpoint}.mo")
}

/// Factory for sockets sharing one transport context.
pub trait Transport: Send + Sync + 'static {
	/// Blocking request/reply socket type.
	type Request: RequestSocket;
	/// Non-blocking socket type.
	type Dealer: DealerSocket;
	/// Monitor channel type.
	type Monitor: MonitorSocket;

	/// Creates an unconnected request/reply socket.
	fn request_socket(&self) -> Result<Self::Request>;

	/// Creates an unconnected non-blocking socket.
	fn dealer_socket(&self) -> Result<Self::Dealer>;

	/// Subscribes to the monitor channel registered under `endpoint` by [`Socket::monitor`].
	fn monitor_socket(&self, endpoint: &str) -> Result<Self::Monitor>;
}

/// Operations shared by every socket kind.
pub trait Socket: Send + Sync + 'static {
	/// Applies one configuration option.
	fn set_option(&self, option: &SocketOption) -> Result<()>;

	/// Connects to `address`. The link may complete later.
	fn connect(&self, address: &str) -> Result<()>;

	/// Publishes this socket's connection events on the channel named `endpoint`.
	///
	/// Events are queued on the channel from this call onward; call it before
	/// [`Socket::connect`] to observe the first link.
	fn monitor(&self, endpoint: &str, events: EventMask) -> Result<()>;
}

/// Blocking socket: every `send` must be followed by exactly one `recv`.
pub trait RequestSocket: Socket {
	/// Sends a request. Fails with [`TransportError::State`] while a reply is outstanding.
	fn send(&self, payload: &[u8]) -> Result<()>;

	/// Blocks for the reply. Fails with [`TransportError::State`] when nothing was sent.
	fn recv(&self) -> Result<Vec<u8>>;
}

/// Non-blocking socket driven by readiness.
pub trait DealerSocket: Socket {
	/// Conditions currently satisfied.
	fn readiness(&self) -> Interest;

	/// Sends if writable, else fails with [`TransportError::WouldBlock`].
	fn try_send(&self, payload: &[u8]) -> Result<()>;

	/// Receives one message if readable.
	fn try_recv(&self) -> Result<Option<Vec<u8>>>;

	/// Registers the waker signalled whenever readiness may have changed.
	fn set_waker(&self, waker: Waker);
}

/// Subscriber end of a monitor channel.
pub trait MonitorSocket: Send + Sync + 'static {
	/// Readable while events are queued.
	fn readiness(&self) -> Interest;

	/// Pops one queued event.
	fn try_recv(&self) -> Result<Option<ConnectionEvent>>;

	/// Registers the waker signalled when an event is queued.
	fn set_waker(&self, waker: Waker);
}
