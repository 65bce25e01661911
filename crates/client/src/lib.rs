//! RPC client for `<Class>-><Method>` services.
//!
//! Calls are made through a proxy built from a [`ProxyConfig`]:
//! * [`SyncServerProxy`]: blocks the caller for each reply, see [`SyncClient`]
//! * [`AsyncServerProxy`]: returns at once and resolves callbacks or [`Reply`]
//!   futures on an [`IoLoop`], see [`AsyncClient`]
//! * [`Supervisor`]: reports when the server becomes available or unavailable
//!
//! The socket layer is any [`fadeaway_transport::Transport`]; the crate ships
//! an in-process one in [`fadeaway_transport::memory`].
//!
//! Every call resolves exactly once, with either its result or an [`Error`].

#![warn(missing_docs)]

pub mod async_client;
pub mod config;
pub mod error;
pub mod proxy;
pub mod supervisor;
pub mod sync_client;

pub use async_client::{AsyncClient, CallOptions, Callback, Reply};
pub use config::{ConfigError, Mode, ProxyConfig};
pub use error::{Error, Result};
pub use fadeaway_ioloop::IoLoop;
pub use fadeaway_rpc::{APPLICATION_ERROR, CallRequest, ErrorInfo, Map, Value};
pub use proxy::{AsyncServerProxy, DeferredCall, ServerProxy, SyncServerProxy};
pub use supervisor::{Availability, Supervisor};
pub use sync_client::SyncClient;
