//! Callback-driven client multiplexing many calls over one socket.
//!
//! The client is an [`IoLoop`] handler. Submission may happen on any thread;
//! the loop thread performs all socket I/O, one message per readiness signal:
//! * `on_writable` hands the oldest queued request to the socket
//! * `on_readable` receives one reply and resolves the matching pending call
//! * a per-call timer resolves the call with [`Error::Timeout`] if it fires first
//!
//! A pending call is removed from the registry under the client lock by
//! whichever path gets there first, and its callback runs after the lock is
//! released. The losing path finds nothing and does nothing.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use fadeaway_ioloop::{Handler, HandlerId, Interest, IoLoop, TimerHandle, Waker};
use fadeaway_rpc::{CallRequest, Value, decode_response, encode_request};
use fadeaway_transport::{DealerSocket, EventMask, SocketOption, TransportError};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Receives the outcome of one call.
pub type Callback = Box<dyn FnOnce(Result<Value>) + Send + 'static>;

/// Per-call settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
	/// Resolve the call with [`Error::Timeout`] if no reply arrives in time.
	pub timeout: Option<Duration>,
}

impl CallOptions {
	/// Options with a deadline.
	pub fn timeout(timeout: Duration) -> Self {
		Self { timeout: Some(timeout) }
	}
}

struct PendingCall {
	callback: Callback,
	timer: Option<TimerHandle>,
}

struct QueuedRequest {
	id: String,
	payload: Vec<u8>,
}

struct ClientState {
	queue: VecDeque<QueuedRequest>,
	pending: HashMap<String, PendingCall>,
	interest: Interest,
	registration: Option<HandlerId>,
	closed: bool,
}

struct Inner<S> {
	socket: S,
	ioloop: Arc<IoLoop>,
	state: Mutex<ClientState>,
}

/// Non-blocking RPC client registered with an [`IoLoop`].
///
/// Dropping the client closes it.
pub struct AsyncClient<S: DealerSocket> {
	inner: Arc<Inner<S>>,
}

impl<S: DealerSocket> std::fmt::Debug for AsyncClient<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("AsyncClient")
			.field("pending", &state.pending.len())
			.field("queued", &state.queue.len())
			.field("interest", &state.interest)
			.field("closed", &state.closed)
			.finish_non_exhaustive()
	}
}

impl<S: DealerSocket> AsyncClient<S> {
	/// Wraps `socket` and registers the client with `ioloop`, watching for replies.
	pub fn new(socket: S, ioloop: Arc<IoLoop>) -> Self {
		let inner = Arc::new(Inner {
			socket,
			ioloop: Arc::clone(&ioloop),
			state: Mutex::new(ClientState {
				queue: VecDeque::new(),
				pending: HashMap::new(),
				interest: Interest::READABLE,
				registration: None,
				closed: false,
			}),
		});
		let id = ioloop.add_handler(Arc::clone(&inner) as Arc<dyn Handler>);
		inner.state.lock().registration = Some(id);
		Self { inner }
	}

	/// Applies a socket option.
	///
	/// # Errors
	///
	/// Returns [`Error::Transport`] if the socket rejects the option.
	pub fn set_option(&self, option: &SocketOption) -> Result<()> {
		self.inner.socket.set_option(option)?;
		Ok(())
	}

	/// Publishes the socket's connection events under `endpoint`. Call before [`Self::connect`].
	///
	/// # Errors
	///
	/// Returns [`Error::Transport`] if the socket cannot be monitored.
	pub fn monitor(&self, endpoint: &str, events: EventMask) -> Result<()> {
		self.inner.socket.monitor(endpoint, events)?;
		Ok(())
	}

	/// Connects the socket.
	///
	/// # Errors
	///
	/// Returns [`Error::Transport`] for invalid addresses or a second connect.
	pub fn connect(&self, address: &str) -> Result<()> {
		self.inner.socket.connect(address)?;
		Ok(())
	}

	/// Queues `request` and registers `callback` for its outcome.
	///
	/// With a timeout, the request is stamped with its expiry and a timer is
	/// armed that resolves the call with [`Error::Timeout`]. A timeout too large
	/// to schedule leaves the call waiting for its reply.
	///
	/// # Errors
	///
	/// * [`Error::Closed`] once the client is closed
	/// * [`Error::DuplicateId`] when a call with the same id is pending
	/// * [`Error::Protocol`] when the arguments cannot be encoded
	///
	/// The callback is not invoked when submission fails.
	pub fn submit(
		&self,
		mut request: CallRequest,
		callback: impl FnOnce(Result<Value>) + Send + 'static,
		options: CallOptions,
	) -> Result<()> {
		if let Some(timeout) = options.timeout {
			request.expire_at = SystemTime::now().checked_add(timeout);
		}
		let payload = encode_request(&request)?;
		let id = request.id;

		let mut state = self.inner.state.lock();
		if state.closed {
			return Err(Error::Closed);
		}
		if state.pending.contains_key(&id) {
			return Err(Error::DuplicateId(id));
		}
		let timer = options.timeout.and_then(|timeout| {
			let client = Arc::downgrade(&self.inner);
			let id = id.clone();
			self.inner.ioloop.call_later(timeout, move || expire(&client, &id))
		});
		state.pending.insert(
			id.clone(),
			PendingCall {
				callback: Box::new(callback),
				timer,
			},
		);
		state.queue.push_back(QueuedRequest { id: id.clone(), payload });
		let assert_writable = !state.interest.contains(Interest::WRITABLE);
		if assert_writable {
			state.interest.insert(Interest::WRITABLE);
		}
		let registration = state.registration;
		drop(state);

		debug!(id = %id, class = %request.class, method = %request.method, timeout = ?options.timeout, "rpc.submit");
		if assert_writable && let Some(registration) = registration {
			self.inner.ioloop.update_handler(registration);
		}
		Ok(())
	}

	/// Submits `request` and returns a future for its outcome.
	///
	/// # Errors
	///
	/// Fails like [`Self::submit`].
	pub fn call(&self, request: CallRequest, options: CallOptions) -> Result<Reply> {
		let (tx, rx) = oneshot::channel();
		self.submit(
			request,
			move |outcome| {
				let _ = tx.send(outcome);
			},
			options,
		)?;
		Ok(Reply { rx })
	}

	/// Receives and resolves one reply. Normally driven by the loop.
	pub fn on_readable(&self) {
		self.inner.read_one();
	}

	/// Sends one queued request. Normally driven by the loop.
	pub fn on_writable(&self) {
		self.inner.write_one();
	}

	/// Resolves `id` with [`Error::Timeout`] if it is still pending. Normally driven by its timer.
	pub fn on_timeout(&self, id: &str) {
		self.inner.expire(id);
	}

	/// Detaches from the loop and resolves every pending call with [`Error::Closed`].
	///
	/// Queued requests that were not sent yet are discarded. Later submissions
	/// fail with [`Error::Closed`].
	pub fn close(&self) {
		self.inner.close();
	}

	/// Returns true once [`Self::close`] has run.
	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}

	/// Number of calls awaiting resolution.
	pub fn pending_len(&self) -> usize {
		self.inner.state.lock().pending.len()
	}

	/// Number of requests not yet handed to the socket.
	pub fn queued_len(&self) -> usize {
		self.inner.state.lock().queue.len()
	}

	/// Conditions the client currently wants dispatched.
	pub fn interest(&self) -> Interest {
		self.inner.state.lock().interest
	}

	/// Loop the client is registered with.
	pub fn ioloop(&self) -> &Arc<IoLoop> {
		&self.inner.ioloop
	}
}

impl<S: DealerSocket> Drop for AsyncClient<S> {
	fn drop(&mut self) {
		self.inner.close();
	}
}

fn expire<S: DealerSocket>(client: &Weak<Inner<S>>, id: &str) {
	if let Some(inner) = client.upgrade() {
		inner.expire(id);
	}
}

impl<S: DealerSocket> Inner<S> {
	fn read_one(&self) {
		let payload = match self.socket.try_recv() {
			Ok(Some(payload)) => payload,
			Ok(None) => return,
			Err(e) => {
				warn!(error = %e, "rpc.recv_failed");
				return;
			}
		};
		let response = match decode_response(&payload) {
			Ok(response) => response,
			Err(e) => {
				warn!(error = %e, len = payload.len(), "rpc.decode_failed");
				return;
			}
		};

		let Some(call) = self.state.lock().pending.remove(&response.id) else {
			debug!(id = %response.id, "rpc.reply.unknown");
			return;
		};
		if let Some(timer) = call.timer {
			self.ioloop.cancel_timer(timer);
		}
		trace!(id = %response.id, ok = response.outcome.is_ok(), "rpc.reply");
		(call.callback)(response.outcome.map_err(Error::Application));
	}

	fn write_one(&self) {
		let mut state = self.state.lock();
		let mut failed = None;
		if let Some(head) = state.queue.front() {
			match self.socket.try_send(&head.payload) {
				Ok(()) => {
					trace!(id = %head.id, "rpc.send");
					state.queue.pop_front();
				}
				Err(TransportError::WouldBlock) => {
					trace!(id = %head.id, "rpc.send.would_block");
				}
				Err(e) => {
					warn!(id = %head.id, error = %e, "rpc.send_failed");
					failed = state
						.queue
						.pop_front()
						.and_then(|dropped| state.pending.remove(&dropped.id))
						.map(|call| (call, e));
				}
			}
		}
		let deassert = state.queue.is_empty() && state.interest.contains(Interest::WRITABLE);
		if deassert {
			state.interest.remove(Interest::WRITABLE);
		}
		let registration = state.registration;
		drop(state);

		if deassert && let Some(registration) = registration {
			self.ioloop.update_handler(registration);
		}
		if let Some((call, e)) = failed {
			if let Some(timer) = call.timer {
				self.ioloop.cancel_timer(timer);
			}
			(call.callback)(Err(Error::Transport(e)));
		}
	}

	fn expire(&self, id: &str) {
		let Some(call) = self.state.lock().pending.remove(id) else {
			return;
		};
		if let Some(timer) = call.timer {
			self.ioloop.cancel_timer(timer);
		}
		debug!(id, "rpc.timeout");
		(call.callback)(Err(Error::Timeout));
	}

	fn close(&self) {
		let (registration, pending) = {
			let mut state = self.state.lock();
			if state.closed {
				return;
			}
			state.closed = true;
			state.queue.clear();
			state.interest = Interest::empty();
			(state.registration.take(), std::mem::take(&mut state.pending))
		};
		if let Some(registration) = registration {
			self.ioloop.remove_handler(registration);
		}
		debug!(pending = pending.len(), "rpc.close");
		for (_, call) in pending {
			if let Some(timer) = call.timer {
				self.ioloop.cancel_timer(timer);
			}
			(call.callback)(Err(Error::Closed));
		}
	}
}

impl<S: DealerSocket> Handler for Inner<S> {
	fn interest(&self) -> Interest {
		self.state.lock().interest
	}

	fn readiness(&self) -> Interest {
		self.socket.readiness()
	}

	fn on_readable(&self) {
		self.read_one();
	}

	fn on_writable(&self) {
		self.write_one();
	}

	fn attach(&self, waker: &Waker) {
		self.socket.set_waker(waker.clone());
	}
}

/// Future resolving to the outcome of a call made with [`AsyncClient::call`].
///
/// Resolves to [`Error::Closed`] if the client is dropped first.
#[derive(Debug)]
#[must_use = "a reply does nothing unless awaited"]
pub struct Reply {
	rx: oneshot::Receiver<Result<Value>>,
}

impl Future for Reply {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.rx).poll(cx).map(|received| received.unwrap_or(Err(Error::Closed)))
	}
}
