//! End-to-end calls against an in-process server thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fadeaway::{
	APPLICATION_ERROR, AsyncServerProxy, CallOptions, Error, ErrorInfo, IoLoop, Map, Mode, ProxyConfig, ServerProxy,
	Value,
};
use fadeaway_rpc::{CallRequest, CallResponse, decode_request, encode_response};
use fadeaway_transport::memory::{MemoryServer, MemoryTransport};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

const HOST: &str = "server.test";

fn init_tracing() {
	let _ = tracing_subscriber::fmt::try_init();
}

fn respond(request: &CallRequest) -> CallResponse {
	let id = request.id.clone();
	match request.method_path().as_str() {
		"Echo->ping" => CallResponse::ok(id, json!("pong")),
		"Echo->echo" => CallResponse::ok(id, request.args.first().cloned().unwrap_or(Value::Null)),
		"Math->add" => CallResponse::ok(id, json!(request.args.iter().filter_map(Value::as_i64).sum::<i64>())),
		"Clock->sleep" => {
			let millis = request.args.first().and_then(Value::as_u64).unwrap_or(0);
			thread::sleep(Duration::from_millis(millis));
			CallResponse::ok(id, Value::Null)
		}
		_ => CallResponse::err(id, ErrorInfo::new(format!("no such method {}", request.method_path()), None)),
	}
}

/// Serves `respond` on its own thread until dropped.
struct EchoServer {
	stop: Arc<AtomicBool>,
	thread: Option<JoinHandle<()>>,
}

impl EchoServer {
	fn spawn(server: MemoryServer) -> Self {
		let stop = Arc::new(AtomicBool::new(false));
		let flag = Arc::clone(&stop);
		let thread = thread::spawn(move || {
			while !flag.load(Ordering::Acquire) {
				let Some(incoming) = server.recv_timeout(Duration::from_millis(10)) else {
					continue;
				};
				let request = decode_request(incoming.payload()).unwrap();
				incoming.reply(encode_response(&respond(&request)).unwrap());
			}
		});
		Self {
			stop,
			thread: Some(thread),
		}
	}
}

impl Drop for EchoServer {
	fn drop(&mut self) {
		self.stop.store(true, Ordering::Release);
		if let Some(thread) = self.thread.take() {
			thread.join().unwrap();
		}
	}
}

fn started_loop() -> Arc<IoLoop> {
	let ioloop = Arc::new(IoLoop::new());
	ioloop.start().unwrap();
	ioloop
}

fn async_proxy(port: u16, transport: &MemoryTransport, ioloop: &Arc<IoLoop>) -> AsyncServerProxy<MemoryTransport> {
	let proxy = AsyncServerProxy::with_loop(
		ProxyConfig::new(Mode::Async, HOST, port),
		transport.clone(),
		Arc::clone(ioloop),
	)
	.unwrap();
	proxy.deploy().unwrap();
	proxy
}

#[test]
fn sync_calls_from_two_threads_do_not_interleave() {
	init_tracing();
	let transport = MemoryTransport::new();
	let config = ProxyConfig::new(Mode::Sync, HOST, 9001);
	let _server = EchoServer::spawn(transport.bind(&config.address()).unwrap());
	let proxy = ServerProxy::new(config, transport).unwrap();
	let proxy = proxy.as_sync().unwrap();

	thread::scope(|s| {
		for t in 0..2i64 {
			s.spawn(move || {
				let add = proxy.class("Math").method("add");
				for i in 0..50i64 {
					assert_eq!(add.call([json!(i), json!(t * 1000)]).unwrap(), json!(i + t * 1000));
				}
			});
		}
	});

	let err = proxy.invoke("Nope", "missing", [], Map::new()).unwrap_err();
	assert_eq!(err.code(), Some(APPLICATION_ERROR));
}

#[test]
fn async_calls_resolve_on_loop_thread() {
	init_tracing();
	let ioloop = started_loop();
	let transport = MemoryTransport::new();
	let _server = EchoServer::spawn(transport.bind(&format!("tcp://{HOST}:9002")).unwrap());
	let proxy = async_proxy(9002, &transport, &ioloop);

	let (tx, rx) = mpsc::channel();
	for i in 0..100i64 {
		let tx = tx.clone();
		proxy
			.class("Math")
			.method("add")
			.call([json!(i), json!(1)])
			.then(
				move |outcome| {
					let on_loop = thread::current().name() == Some("fadeaway-ioloop");
					tx.send((i, outcome.unwrap(), on_loop)).unwrap();
				},
				CallOptions::default(),
			)
			.unwrap();
	}

	let mut results: Vec<(i64, Value, bool)> = (0..100)
		.map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
		.collect();
	results.sort_by_key(|(i, _, _)| *i);
	for (i, value, on_loop) in results {
		assert_eq!(value, json!(i + 1));
		assert!(on_loop);
	}
	assert_eq!(proxy.client().pending_len(), 0);

	proxy.quit();
	ioloop.stop();
}

#[test]
fn timeout_and_reply_race_resolves_each_call_once() {
	init_tracing();
	let ioloop = started_loop();
	let transport = MemoryTransport::new();
	let _server = EchoServer::spawn(transport.bind(&format!("tcp://{HOST}:9003")).unwrap());
	let proxy = async_proxy(9003, &transport, &ioloop);

	let resolutions: Arc<Mutex<HashMap<String, Vec<bool>>>> = Arc::default();
	let (tx, rx) = mpsc::channel();
	for _ in 0..200 {
		let call = proxy.class("Clock").method("sleep").call([json!(0)]);
		let id = call.id().to_owned();
		let resolutions = Arc::clone(&resolutions);
		let tx = tx.clone();
		call.then(
			move |outcome| {
				resolutions.lock().entry(id).or_default().push(outcome.is_ok());
				tx.send(()).unwrap();
			},
			CallOptions::timeout(Duration::from_micros(500)),
		)
		.unwrap();
	}
	for _ in 0..200 {
		rx.recv_timeout(Duration::from_secs(5)).unwrap();
	}
	// Late replies still arrive; let the loop drain them.
	thread::sleep(Duration::from_millis(100));

	let resolutions = resolutions.lock();
	assert_eq!(resolutions.len(), 200);
	assert!(resolutions.values().all(|outcomes| outcomes.len() == 1));
	assert_eq!(proxy.client().pending_len(), 0);
	assert_eq!(ioloop.timer_count(), 0);

	proxy.quit();
	ioloop.stop();
}

#[test]
fn unknown_method_reports_application_error() {
	init_tracing();
	let ioloop = started_loop();
	let transport = MemoryTransport::new();
	let _server = EchoServer::spawn(transport.bind(&format!("tcp://{HOST}:9004")).unwrap());
	let proxy = async_proxy(9004, &transport, &ioloop);

	let (tx, rx) = mpsc::channel();
	proxy
		.invoke("Nope", "missing", [], Map::new(), CallOptions::default(), move |outcome| {
			tx.send(outcome).unwrap();
		})
		.unwrap();

	let err = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap_err();
	assert!(matches!(&err, Error::Application(info) if info.message == "no such method Nope->missing"));
	assert_eq!(err.code(), Some(APPLICATION_ERROR));
	ioloop.stop();
}

#[tokio::test]
async fn replies_can_be_awaited() {
	init_tracing();
	let ioloop = started_loop();
	let transport = MemoryTransport::new();
	let _server = EchoServer::spawn(transport.bind(&format!("tcp://{HOST}:9005")).unwrap());
	let proxy = async_proxy(9005, &transport, &ioloop);

	let echo = proxy.class("Echo");
	let reply = echo.method("echo").call([json!("hi")]).send(CallOptions::default()).unwrap();
	assert_eq!(reply.await.unwrap(), json!("hi"));

	let missing = echo.method("missing").call([]).send(CallOptions::default()).unwrap();
	assert_eq!(missing.await.unwrap_err().code(), Some(APPLICATION_ERROR));

	let slow = proxy
		.class("Clock")
		.method("sleep")
		.call([json!(200)])
		.send(CallOptions::timeout(Duration::from_millis(20)))
		.unwrap();
	assert!(slow.await.unwrap_err().is_timeout());

	proxy.quit();
	ioloop.stop();
}

#[tokio::test]
async fn quit_resolves_awaited_calls_with_closed() {
	init_tracing();
	let ioloop = started_loop();
	let transport = MemoryTransport::new();
	let proxy = async_proxy(9006, &transport, &ioloop);

	let reply = proxy.class("Echo").method("ping").call([]).send(CallOptions::default()).unwrap();
	proxy.quit();
	assert!(matches!(reply.await, Err(Error::Closed)));
	ioloop.stop();
}

#[test]
fn async_proxy_starts_shared_loop() {
	init_tracing();
	let transport = MemoryTransport::new();
	let config = ProxyConfig::new(Mode::Async, HOST, 9007);
	let _server = EchoServer::spawn(transport.bind(&config.address()).unwrap());
	let proxy = ServerProxy::new(config, transport).unwrap();
	assert!(IoLoop::shared().is_running());

	let proxy = proxy.as_async().unwrap();
	proxy.deploy().unwrap();
	let (tx, rx) = mpsc::channel();
	proxy
		.class("Echo")
		.method("ping")
		.call([])
		.then(move |outcome| tx.send(outcome).unwrap(), CallOptions::default())
		.unwrap();
	assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap(), json!("pong"));
}
