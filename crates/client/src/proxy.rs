//! Call surface.
//!
//! A proxy names remote calls as `class(..).method(..)` and routes them to a
//! [`SyncClient`] or an [`AsyncClient`]:
//!
//! ```ignore
//! let echo = proxy.class("Echo");
//! // Sync mode: blocks for the reply.
//! let pong = echo.method("ping").call([])?;
//! // Async mode: the callback runs on the event loop.
//! echo.method("ping").call([]).then(|outcome| println!("{outcome:?}"), CallOptions::default())?;
//! ```
//!
//! Proxies do no I/O themselves. Correlation ids come from the proxy's [`IdGen`].

use std::sync::Arc;

use fadeaway_ioloop::{HandlerId, IoLoop};
use fadeaway_rpc::{CallRequest, IdGen, Map, Value};
use fadeaway_transport::{EventMask, Transport};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::async_client::{AsyncClient, CallOptions, Reply};
use crate::config::{Mode, ProxyConfig};
use crate::error::{Error, Result};
use crate::supervisor::{Supervisor, SupervisorHandler};
use crate::sync_client::SyncClient;

/// Proxy in either call mode, as selected by [`ProxyConfig::mode`].
pub enum ServerProxy<T: Transport> {
	/// Blocking proxy.
	Sync(SyncServerProxy<T>),
	/// Callback-driven proxy.
	Async(AsyncServerProxy<T>),
}

impl<T: Transport> std::fmt::Debug for ServerProxy<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Sync(proxy) => f.debug_tuple("Sync").field(proxy).finish(),
			Self::Async(proxy) => f.debug_tuple("Async").field(proxy).finish(),
		}
	}
}

impl<T: Transport> ServerProxy<T> {
	/// Builds the proxy for `config.mode`.
	///
	/// A sync proxy connects immediately. An async proxy joins the shared
	/// event loop, starting it if needed, and connects on
	/// [`AsyncServerProxy::deploy`].
	///
	/// # Errors
	///
	/// Returns [`Error::Config`] for invalid configurations, and transport or
	/// loop start failures.
	pub fn new(config: ProxyConfig, transport: T) -> Result<Self> {
		match config.mode {
			Mode::Sync => SyncServerProxy::connect(&config, &transport).map(Self::Sync),
			Mode::Async => AsyncServerProxy::new(config, transport).map(Self::Async),
		}
	}

	/// Call mode of this proxy.
	pub fn mode(&self) -> Mode {
		match self {
			Self::Sync(_) => Mode::Sync,
			Self::Async(_) => Mode::Async,
		}
	}

	/// The blocking proxy, if in sync mode.
	pub fn as_sync(&self) -> Option<&SyncServerProxy<T>> {
		match self {
			Self::Sync(proxy) => Some(proxy),
			Self::Async(_) => None,
		}
	}

	/// The callback-driven proxy, if in async mode.
	pub fn as_async(&self) -> Option<&AsyncServerProxy<T>> {
		match self {
			Self::Async(proxy) => Some(proxy),
			Self::Sync(_) => None,
		}
	}
}

/// Blocking proxy. Calls from many threads share one socket and serialize on it.
pub struct SyncServerProxy<T: Transport> {
	client: SyncClient<T::Request>,
	ids: IdGen,
	address: String,
}

impl<T: Transport> std::fmt::Debug for SyncServerProxy<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SyncServerProxy")
			.field("address", &self.address)
			.finish_non_exhaustive()
	}
}

impl<T: Transport> SyncServerProxy<T> {
	/// Creates a socket on `transport`, applies the configured options and connects.
	///
	/// # Errors
	///
	/// Returns [`Error::Config`] or the transport failure.
	pub fn connect(config: &ProxyConfig, transport: &T) -> Result<Self> {
		config.validate()?;
		let client = SyncClient::new(transport.request_socket()?);
		for option in &config.options {
			client.set_option(option)?;
		}
		let address = config.address();
		client.connect(&address)?;
		debug!(address = %address, "rpc.proxy.connect");
		Ok(Self {
			client,
			ids: IdGen::new(),
			address,
		})
	}

	/// Server address.
	pub fn address(&self) -> &str {
		&self.address
	}

	/// Calls `class->method` and blocks for the result.
	///
	/// # Errors
	///
	/// Fails like [`SyncClient::call`].
	pub fn invoke(
		&self,
		class: &str,
		method: &str,
		args: impl IntoIterator<Item = Value>,
		kwargs: Map<String, Value>,
	) -> Result<Value> {
		let request = CallRequest::new(self.ids.next(), class, method).args(args).kwargs(kwargs);
		self.client.call(&request)
	}

	/// Names a remote class.
	pub fn class(&self, name: impl Into<String>) -> SyncClass<'_, T> {
		SyncClass {
			proxy: self,
			class: name.into(),
		}
	}
}

/// Remote class seen through a [`SyncServerProxy`].
pub struct SyncClass<'a, T: Transport> {
	proxy: &'a SyncServerProxy<T>,
	class: String,
}

impl<'a, T: Transport> SyncClass<'a, T> {
	/// Names a method on the class.
	pub fn method(&self, name: impl Into<String>) -> SyncMethod<'a, T> {
		SyncMethod {
			proxy: self.proxy,
			class: self.class.clone(),
			method: name.into(),
		}
	}
}

/// Callable stand-in for one remote method, blocking mode.
pub struct SyncMethod<'a, T: Transport> {
	proxy: &'a SyncServerProxy<T>,
	class: String,
	method: String,
}

impl<T: Transport> SyncMethod<'_, T> {
	/// Calls with positional arguments.
	///
	/// # Errors
	///
	/// Fails like [`SyncServerProxy::invoke`].
	pub fn call(&self, args: impl IntoIterator<Item = Value>) -> Result<Value> {
		self.call_with(args, Map::new())
	}

	/// Calls with positional and keyword arguments.
	///
	/// # Errors
	///
	/// Fails like [`SyncServerProxy::invoke`].
	pub fn call_with(&self, args: impl IntoIterator<Item = Value>, kwargs: Map<String, Value>) -> Result<Value> {
		self.proxy.invoke(&self.class, &self.method, args, kwargs)
	}
}

#[derive(Default)]
struct Lifecycle {
	deployed: bool,
	supervisor: Option<(Arc<Supervisor>, HandlerId)>,
}

/// Callback-driven proxy.
///
/// Lifecycle: [`Self::monitor`] (optional, once per endpoint), then
/// [`Self::deploy`], then calls, then [`Self::quit`]. Dropping the proxy quits it.
pub struct AsyncServerProxy<T: Transport> {
	transport: T,
	address: String,
	client: AsyncClient<T::Dealer>,
	ids: IdGen,
	lifecycle: Mutex<Lifecycle>,
}

impl<T: Transport> std::fmt::Debug for AsyncServerProxy<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let lifecycle = self.lifecycle.lock();
		f.debug_struct("AsyncServerProxy")
			.field("address", &self.address)
			.field("deployed", &lifecycle.deployed)
			.field("supervisor", &lifecycle.supervisor.as_ref().map(|(supervisor, _)| supervisor.endpoint()))
			.field("client", &self.client)
			.finish_non_exhaustive()
	}
}

/// Starts the loop unless it is already running.
fn ensure_running(ioloop: &Arc<IoLoop>) -> Result<()> {
	static START: Mutex<()> = Mutex::new(());
	if !ioloop.is_running() {
		let _guard = START.lock();
		if !ioloop.is_running() {
			ioloop.start().map_err(Error::Spawn)?;
		}
	}
	Ok(())
}

impl<T: Transport> AsyncServerProxy<T> {
	/// Creates a proxy on the process-wide loop, starting it on first use.
	///
	/// # Errors
	///
	/// Returns [`Error::Config`], socket creation failures and [`Error::Spawn`].
	pub fn new(config: ProxyConfig, transport: T) -> Result<Self> {
		let ioloop = IoLoop::shared();
		ensure_running(&ioloop)?;
		Self::with_loop(config, transport, ioloop)
	}

	/// Creates a proxy driven by `ioloop`. The caller runs the loop.
	///
	/// # Errors
	///
	/// Returns [`Error::Config`] and socket creation failures.
	pub fn with_loop(config: ProxyConfig, transport: T, ioloop: Arc<IoLoop>) -> Result<Self> {
		config.validate()?;
		let client = AsyncClient::new(transport.dealer_socket()?, ioloop);
		for option in &config.options {
			client.set_option(option)?;
		}
		Ok(Self {
			transport,
			address: config.address(),
			client,
			ids: IdGen::new(),
			lifecycle: Mutex::new(Lifecycle::default()),
		})
	}

	/// Server address.
	pub fn address(&self) -> &str {
		&self.address
	}

	/// Underlying client.
	pub fn client(&self) -> &AsyncClient<T::Dealer> {
		&self.client
	}

	/// Returns true once [`Self::deploy`] succeeded.
	pub fn is_deployed(&self) -> bool {
		self.lifecycle.lock().deployed
	}

	/// Supervisor installed by [`Self::monitor`], if any.
	pub fn supervisor(&self) -> Option<Arc<Supervisor>> {
		self.lifecycle.lock().supervisor.as_ref().map(|(supervisor, _)| Arc::clone(supervisor))
	}

	/// Watches the connection under the name `endpoint`.
	///
	/// `available` runs when the link comes up, `unavailable` when it drops.
	/// Must precede [`Self::deploy`] so that the first link is observed.
	/// A second call replaces the previous supervisor.
	///
	/// # Errors
	///
	/// Returns [`Error::MonitorAfterDeploy`] once deployed, and transport failures.
	pub fn monitor(
		&self,
		endpoint: &str,
		available: impl Fn() + Send + Sync + 'static,
		unavailable: impl Fn() + Send + Sync + 'static,
	) -> Result<Arc<Supervisor>> {
		let mut lifecycle = self.lifecycle.lock();
		if lifecycle.deployed {
			return Err(Error::MonitorAfterDeploy);
		}
		if self.client.is_closed() {
			return Err(Error::Closed);
		}
		self.client.monitor(endpoint, EventMask::all())?;
		let events = self.transport.monitor_socket(endpoint)?;
		let supervisor = Arc::new(
			Supervisor::new(endpoint)
				.on_available(available)
				.on_unavailable(unavailable),
		);
		let ioloop = self.client.ioloop();
		let handler = ioloop.add_handler(Arc::new(SupervisorHandler::new(Arc::clone(&supervisor), events)));
		if let Some((_, previous)) = lifecycle.supervisor.replace((Arc::clone(&supervisor), handler)) {
			ioloop.remove_handler(previous);
		}
		info!(endpoint, "rpc.proxy.monitor");
		Ok(supervisor)
	}

	/// Connects to the server.
	///
	/// # Errors
	///
	/// Returns [`Error::AlreadyDeployed`] on a second call, [`Error::Closed`]
	/// after [`Self::quit`], and transport failures.
	pub fn deploy(&self) -> Result<()> {
		let mut lifecycle = self.lifecycle.lock();
		if lifecycle.deployed {
			return Err(Error::AlreadyDeployed);
		}
		if self.client.is_closed() {
			return Err(Error::Closed);
		}
		self.client.connect(&self.address)?;
		lifecycle.deployed = true;
		info!(address = %self.address, "rpc.proxy.deploy");
		Ok(())
	}

	/// Calls `class->method`; `callback` receives the outcome on the event loop.
	///
	/// # Errors
	///
	/// Returns [`Error::NotDeployed`] before [`Self::deploy`], otherwise fails
	/// like [`AsyncClient::submit`]. The callback is not invoked on error.
	pub fn invoke(
		&self,
		class: &str,
		method: &str,
		args: impl IntoIterator<Item = Value>,
		kwargs: Map<String, Value>,
		options: CallOptions,
		callback: impl FnOnce(Result<Value>) + Send + 'static,
	) -> Result<()> {
		let request = CallRequest::new(self.ids.next(), class, method).args(args).kwargs(kwargs);
		self.submit(request, callback, options)
	}

	fn submit(
		&self,
		request: CallRequest,
		callback: impl FnOnce(Result<Value>) + Send + 'static,
		options: CallOptions,
	) -> Result<()> {
		if !self.is_deployed() {
			return Err(Error::NotDeployed);
		}
		self.client.submit(request, callback, options)
	}

	fn call(&self, request: CallRequest, options: CallOptions) -> Result<Reply> {
		if !self.is_deployed() {
			return Err(Error::NotDeployed);
		}
		self.client.call(request, options)
	}

	/// Names a remote class.
	pub fn class(&self, name: impl Into<String>) -> AsyncClass<'_, T> {
		AsyncClass {
			proxy: self,
			class: name.into(),
		}
	}

	/// Detaches the supervisor and closes the client.
	///
	/// Pending calls resolve with [`Error::Closed`]. Calling `quit` again does nothing.
	pub fn quit(&self) {
		let supervisor = self.lifecycle.lock().supervisor.take();
		if let Some((supervisor, handler)) = supervisor {
			self.client.ioloop().remove_handler(handler);
			debug!(endpoint = supervisor.endpoint(), "rpc.proxy.unmonitor");
		}
		if !self.client.is_closed() {
			self.client.close();
			info!(address = %self.address, "rpc.proxy.quit");
		}
	}
}

impl<T: Transport> Drop for AsyncServerProxy<T> {
	fn drop(&mut self) {
		self.quit();
	}
}

/// Remote class seen through an [`AsyncServerProxy`].
pub struct AsyncClass<'a, T: Transport> {
	proxy: &'a AsyncServerProxy<T>,
	class: String,
}

impl<'a, T: Transport> AsyncClass<'a, T> {
	/// Names a method on the class.
	pub fn method(&self, name: impl Into<String>) -> AsyncMethod<'a, T> {
		AsyncMethod {
			proxy: self.proxy,
			class: self.class.clone(),
			method: name.into(),
		}
	}
}

/// Callable stand-in for one remote method, callback mode.
pub struct AsyncMethod<'a, T: Transport> {
	proxy: &'a AsyncServerProxy<T>,
	class: String,
	method: String,
}

impl<'a, T: Transport> AsyncMethod<'a, T> {
	/// Captures positional arguments. Nothing is sent until the call is resolved.
	pub fn call(&self, args: impl IntoIterator<Item = Value>) -> DeferredCall<'a, T> {
		DeferredCall {
			proxy: self.proxy,
			request: CallRequest::new(self.proxy.ids.next(), self.class.as_str(), self.method.as_str()).args(args),
		}
	}
}

/// Captured call awaiting [`DeferredCall::then`] or [`DeferredCall::send`].
#[must_use = "a deferred call is not sent until `then` or `send`"]
pub struct DeferredCall<'a, T: Transport> {
	proxy: &'a AsyncServerProxy<T>,
	request: CallRequest,
}

impl<T: Transport> DeferredCall<'_, T> {
	/// Adds one keyword argument.
	pub fn kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
		self.request.kwargs.insert(key.into(), value);
		self
	}

	/// Adds keyword arguments.
	pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
		self.request.kwargs.extend(kwargs);
		self
	}

	/// Correlation id the call will be sent under.
	pub fn id(&self) -> &str {
		&self.request.id
	}

	/// Sends the call; `callback` receives the outcome on the event loop.
	///
	/// # Errors
	///
	/// Fails like [`AsyncServerProxy::invoke`].
	pub fn then(self, callback: impl FnOnce(Result<Value>) + Send + 'static, options: CallOptions) -> Result<()> {
		self.proxy.submit(self.request, callback, options)
	}

	/// Sends the call and returns a future for its outcome.
	///
	/// # Errors
	///
	/// Fails like [`AsyncServerProxy::invoke`].
	pub fn send(self, options: CallOptions) -> Result<Reply> {
		self.proxy.call(self.request, options)
	}
}
