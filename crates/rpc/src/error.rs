//! Errors raised while decoding envelopes.

use thiserror::Error;

/// A malformed envelope. Local and non-fatal: the offending message is dropped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
	/// The payload is not valid JSON.
	#[error("malformed envelope: {0}")]
	Json(#[from] serde_json::Error),
	/// The payload is JSON but not an object.
	#[error("envelope is not a JSON object")]
	NotAnObject,
	/// The envelope has no string `id`.
	#[error("envelope has no string id")]
	MissingId,
	/// The `method` field is not of the form `<Class>-><Method>`.
	#[error("invalid method path: {0:?}")]
	InvalidMethod(String),
	/// The `error` field is neither an object nor a message string.
	#[error("malformed error payload: {0}")]
	MalformedError(String),
}

/// Result alias for protocol operations.
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;
