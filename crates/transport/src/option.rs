use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-socket configuration.
///
/// Deserializes from single-key tables such as `{ recv_timeout_ms = 500 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocketOption {
	/// Maximum messages queued for sending before the socket stops being writable.
	#[serde(rename = "send_hwm")]
	SendHighWaterMark(usize),
	/// Maximum messages queued for receiving; further arrivals are dropped.
	#[serde(rename = "recv_hwm")]
	RecvHighWaterMark(usize),
	/// How long a blocking receive waits before failing.
	#[serde(rename = "recv_timeout_ms")]
	RecvTimeout(#[serde(with = "millis")] Duration),
	/// How long unsent messages are kept after the socket is closed.
	#[serde(rename = "linger_ms")]
	Linger(#[serde(with = "millis")] Duration),
	/// Identity presented to the endpoint.
	#[serde(rename = "identity")]
	Identity(String),
}

mod millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}
