//! Request and response envelopes and their JSON codec.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};
use crate::protocol::{join_method, split_method};

/// Code substituted when a server reports an error without one.
pub const APPLICATION_ERROR: i64 = -32500;

/// Error reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
	/// Human-readable description.
	pub message: String,
	/// Application error code.
	pub code: i64,
}

impl ErrorInfo {
	/// Builds an error, substituting [`APPLICATION_ERROR`] when `code` is absent.
	pub fn new(message: impl Into<String>, code: Option<i64>) -> Self {
		Self {
			message: message.into(),
			code: code.unwrap_or(APPLICATION_ERROR),
		}
	}

	fn from_wire(payload: Value) -> Result<Self> {
		match payload {
			Value::Object(mut fields) => {
				let message = match fields.remove("message") {
					Some(Value::String(message)) => message,
					Some(Value::Null) | None => String::new(),
					Some(other) => other.to_string(),
				};
				let code = fields.get("code").and_then(Value::as_i64).filter(|code| *code != 0);
				Ok(Self::new(message, code))
			}
			Value::String(message) => Ok(Self::new(message, None)),
			other => Err(ProtocolError::MalformedError(other.to_string())),
		}
	}
}

impl std::fmt::Display for ErrorInfo {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} (code {})", self.message, self.code)
	}
}

/// One call addressed to `<class>-><method>`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
	/// Correlation id, unique among the client's in-flight calls.
	pub id: String,
	/// Target class name.
	pub class: String,
	/// Method name on the class.
	pub method: String,
	/// Positional arguments.
	pub args: Vec<Value>,
	/// Keyword arguments.
	pub kwargs: Map<String, Value>,
	/// Deadline after which the caller stops waiting.
	pub expire_at: Option<SystemTime>,
}

impl CallRequest {
	/// Creates a request with no arguments.
	pub fn new(id: impl Into<String>, class: impl Into<String>, method: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			class: class.into(),
			method: method.into(),
			args: Vec::new(),
			kwargs: Map::new(),
			expire_at: None,
		}
	}

	/// Sets the positional arguments.
	#[must_use]
	pub fn args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
		self.args = args.into_iter().collect();
		self
	}

	/// Sets the keyword arguments.
	#[must_use]
	pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
		self.kwargs = kwargs;
		self
	}

	/// Wire method path, `<class>-><method>`.
	pub fn method_path(&self) -> String {
		join_method(&self.class, &self.method)
	}
}

/// Reply to a [`CallRequest`]: exactly one of a result or an error.
#[derive(Debug, Clone, PartialEq)]
pub struct CallResponse {
	/// Id of the request this answers.
	pub id: String,
	/// Result value (possibly null) or the remote error.
	pub outcome: std::result::Result<Value, ErrorInfo>,
}

impl CallResponse {
	/// A successful reply.
	pub fn ok(id: impl Into<String>, result: Value) -> Self {
		Self {
			id: id.into(),
			outcome: Ok(result),
		}
	}

	/// A failed reply.
	pub fn err(id: impl Into<String>, error: ErrorInfo) -> Self {
		Self {
			id: id.into(),
			outcome: Err(error),
		}
	}
}

#[derive(Serialize)]
struct RequestOut<'a> {
	id: &'a str,
	method: String,
	params: &'a [Value],
	ex_params: &'a Map<String, Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	expire_at: Option<f64>,
}

#[derive(Deserialize)]
struct RequestIn {
	id: String,
	method: String,
	#[serde(default)]
	params: Vec<Value>,
	#[serde(default)]
	ex_params: Map<String, Value>,
	#[serde(default)]
	expire_at: Option<f64>,
}

#[derive(Serialize)]
struct ResponseOut<'a> {
	id: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	result: Option<&'a Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<&'a ErrorInfo>,
}

/// Serializes a request envelope.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] if an argument fails to serialize.
pub fn encode_request(request: &CallRequest) -> Result<Vec<u8>> {
	let envelope = RequestOut {
		id: &request.id,
		method: request.method_path(),
		params: &request.args,
		ex_params: &request.kwargs,
		expire_at: request
			.expire_at
			.and_then(|at| at.duration_since(UNIX_EPOCH).ok())
			.map(|since| since.as_secs_f64()),
	};
	Ok(serde_json::to_vec(&envelope)?)
}

/// Parses a request envelope, for servers and test peers.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] for malformed envelopes and
/// [`ProtocolError::InvalidMethod`] when `method` lacks the class separator.
pub fn decode_request(bytes: &[u8]) -> Result<CallRequest> {
	let envelope: RequestIn = serde_json::from_slice(bytes)?;
	let (class, method) = split_method(&envelope.method)?;
	Ok(CallRequest {
		id: envelope.id,
		class: class.to_owned(),
		method: method.to_owned(),
		args: envelope.params,
		kwargs: envelope.ex_params,
		expire_at: envelope
			.expire_at
			.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
			.and_then(|since| UNIX_EPOCH.checked_add(since)),
	})
}

/// Serializes a response envelope, for servers and test peers.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] if the result fails to serialize.
pub fn encode_response(response: &CallResponse) -> Result<Vec<u8>> {
	let envelope = match &response.outcome {
		Ok(result) => ResponseOut {
			id: &response.id,
			result: Some(result),
			error: None,
		},
		Err(error) => ResponseOut {
			id: &response.id,
			result: None,
			error: Some(error),
		},
	};
	Ok(serde_json::to_vec(&envelope)?)
}

/// Parses a response envelope.
///
/// A populated `error` wins and yields [`ErrorInfo`], with an absent or zero
/// code replaced by [`APPLICATION_ERROR`]; otherwise the reply is a success
/// whose result is `null` when absent.
///
/// # Errors
///
/// Returns a [`ProtocolError`] when the payload is not a JSON object with a
/// string `id`, or when `error` has an unusable shape.
pub fn decode_response(bytes: &[u8]) -> Result<CallResponse> {
	let Value::Object(mut envelope) = serde_json::from_slice(bytes)? else {
		return Err(ProtocolError::NotAnObject);
	};
	let Some(Value::String(id)) = envelope.remove("id") else {
		return Err(ProtocolError::MissingId);
	};

	if let Some(error) = envelope.remove("error").filter(is_truthy) {
		return Ok(CallResponse::err(id, ErrorInfo::from_wire(error)?));
	}
	let result = envelope.remove("result").unwrap_or(Value::Null);
	Ok(CallResponse::ok(id, result))
}

/// An `error` field only signals failure when it carries something: null,
/// `false`, zero, and empty strings, arrays or objects all mean success.
fn is_truthy(value: &Value) -> bool {
	match value {
		Value::Null => false,
		Value::Bool(flag) => *flag,
		Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
		Value::String(text) => !text.is_empty(),
		Value::Array(items) => !items.is_empty(),
		Value::Object(fields) => !fields.is_empty(),
	}
}
