//! Wire protocol for fadeaway RPC calls.
//!
//! This crate provides the transport-agnostic pieces shared by every client:
//! * [`CallRequest`] / [`CallResponse`]: request and reply envelopes
//! * [`ErrorInfo`]: application error payload with its defaulted code
//! * [`encode_request`] / [`decode_response`]: JSON codec used on the wire
//! * [`IdGen`]: collision-safe correlation id generator
//!
//! A request travels as `{id, method: "<Class>-><Method>", params, ex_params}`
//! and is answered by `{id, result}` or `{id, error: {message, code?}}`.

#![warn(missing_docs)]

pub mod error;
pub mod message;
pub mod protocol;

pub use error::{ProtocolError, Result};
pub use message::{
	APPLICATION_ERROR, CallRequest, CallResponse, ErrorInfo, decode_request, decode_response, encode_request,
	encode_response,
};
pub use protocol::{IdGen, METHOD_SEPARATOR, join_method, split_method};
pub use serde_json::{Map, Value};

#[cfg(test)]
mod tests;
