//! Blocking client over a request/reply socket.

use fadeaway_rpc::{CallRequest, Value, decode_response, encode_request};
use fadeaway_transport::{RequestSocket, SocketOption};
use parking_lot::FairMutex;
use tracing::{trace, warn};

use crate::error::{Error, Result};

/// One blocking call in flight at a time.
///
/// The socket alternates strictly between send and receive, so every call
/// holds a fair lock across the whole round trip. Concurrent callers queue
/// in arrival order.
pub struct SyncClient<S: RequestSocket> {
	socket: FairMutex<S>,
}

impl<S: RequestSocket> SyncClient<S> {
	/// Wraps an unconnected socket.
	pub fn new(socket: S) -> Self {
		Self {
			socket: FairMutex::new(socket),
		}
	}

	/// Applies a socket option.
	///
	/// # Errors
	///
	/// Returns [`Error::Transport`] if the socket rejects the option.
	pub fn set_option(&self, option: &SocketOption) -> Result<()> {
		self.socket.lock().set_option(option)?;
		Ok(())
	}

	/// Connects the socket. Call once.
	///
	/// # Errors
	///
	/// Returns [`Error::Transport`] for invalid addresses or a second connect.
	pub fn connect(&self, address: &str) -> Result<()> {
		self.socket.lock().connect(address)?;
		Ok(())
	}

	/// Sends `request` and blocks for its reply.
	///
	/// # Errors
	///
	/// * [`Error::Application`] when the server reports a failure
	/// * [`Error::Protocol`] when the reply is malformed
	/// * [`Error::Transport`] when the socket fails or its receive timeout elapses
	pub fn call(&self, request: &CallRequest) -> Result<Value> {
		let payload = encode_request(request)?;
		let reply = {
			let socket = self.socket.lock();
			socket.send(&payload)?;
			socket.recv()?
		};
		let response = decode_response(&reply)?;
		if response.id != request.id {
			warn!(id = %request.id, reply_id = %response.id, "rpc.reply.mismatch");
		}
		trace!(id = %request.id, ok = response.outcome.is_ok(), "rpc.reply");
		response.outcome.map_err(Error::Application)
	}
}
