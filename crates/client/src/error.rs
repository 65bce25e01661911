//! Client errors.

use fadeaway_rpc::{ErrorInfo, ProtocolError};
use fadeaway_transport::TransportError;
use thiserror::Error;

use crate::config::ConfigError;

/// Failure of an RPC call or of a proxy operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
	/// The server answered with an error.
	#[error("remote error: {0}")]
	Application(ErrorInfo),
	/// No reply arrived before the call's deadline.
	#[error("call timed out")]
	Timeout,
	/// A reply could not be decoded, or a request could not be encoded.
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	/// The socket failed.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// A call with this id is already in flight.
	#[error("call id {0:?} is already in flight")]
	DuplicateId(String),
	/// The client was closed before the call resolved.
	#[error("client is closed")]
	Closed,
	/// `deploy` was called twice.
	#[error("proxy is already deployed")]
	AlreadyDeployed,
	/// `monitor` was called after `deploy`.
	#[error("monitor must be registered before deploy")]
	MonitorAfterDeploy,
	/// A call was made before `deploy`.
	#[error("proxy is not deployed")]
	NotDeployed,
	/// The proxy configuration is invalid.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// The event loop thread could not be spawned.
	#[error("failed to start event loop: {0}")]
	Spawn(#[source] std::io::Error),
}

impl Error {
	/// Application error code, for server-reported failures.
	pub fn code(&self) -> Option<i64> {
		match self {
			Self::Application(info) => Some(info.code),
			_ => None,
		}
	}

	/// Returns true when the call failed on its local deadline.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout)
	}
}

/// Result alias for client operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
