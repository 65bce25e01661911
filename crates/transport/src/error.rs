//! Transport errors.

use thiserror::Error;

/// Failures reported by sockets.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
	/// The socket cannot accept or produce a message right now.
	#[error("operation would block")]
	WouldBlock,
	/// The operation violates the socket's send/recv discipline.
	#[error("socket state violation: {0}")]
	State(&'static str),
	/// The socket or its endpoint has been closed.
	#[error("socket is closed")]
	Closed,
	/// No reply arrived within the configured receive timeout.
	#[error("receive timed out")]
	Timeout,
	/// The address is not of the form `<scheme>://<target>`.
	#[error("invalid address: {0:?}")]
	InvalidAddress(String),
	/// Another endpoint is already bound to the address.
	#[error("address already in use: {0}")]
	AddressInUse(String),
	/// No monitor channel or endpoint is registered under the name.
	#[error("no such endpoint: {0}")]
	UnknownEndpoint(String),
	/// I/O failure in an OS-backed transport.
	#[error("{0}")]
	Io(#[from] std::io::Error),
}

/// Result alias for transport operations.
pub type Result<T, E = TransportError> = std::result::Result<T, E>;
