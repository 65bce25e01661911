//! Proxy configuration.

use fadeaway_transport::SocketOption;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a proxy performs calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
	/// Each call blocks the caller until its reply arrives.
	#[default]
	Sync,
	/// Calls return immediately; replies are delivered to callbacks on the event loop.
	Async,
}

/// Errors raised while loading a [`ProxyConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The TOML document is malformed or has the wrong shape.
	#[error("invalid proxy config: {0}")]
	Parse(#[from] toml::de::Error),
	/// The host is empty.
	#[error("proxy host must not be empty")]
	EmptyHost,
}

/// Where and how a proxy connects.
///
/// ```toml
/// mode = "async"
/// host = "127.0.0.1"
/// port = 4242
///
/// [[options]]
/// recv_timeout_ms = 500
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
	/// Call mode.
	#[serde(default)]
	pub mode: Mode,
	/// Server host.
	pub host: String,
	/// Server port.
	pub port: u16,
	/// Options applied to the socket before it connects.
	#[serde(default)]
	pub options: Vec<SocketOption>,
}

impl ProxyConfig {
	/// Creates a configuration with no socket options.
	pub fn new(mode: Mode, host: impl Into<String>, port: u16) -> Self {
		Self {
			mode,
			host: host.into(),
			port,
			options: Vec::new(),
		}
	}

	/// Adds one socket option.
	#[must_use]
	pub fn option(mut self, option: SocketOption) -> Self {
		self.options.push(option);
		self
	}

	/// Replaces the socket options.
	#[must_use]
	pub fn options(mut self, options: impl IntoIterator<Item = SocketOption>) -> Self {
		self.options = options.into_iter().collect();
		self
	}

	/// Parses and validates a TOML document.
	///
	/// # Errors
	///
	/// Returns [`ConfigError`] for malformed documents or an empty host.
	pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(source)?;
		config.validate()?;
		Ok(config)
	}

	/// Checks invariants that deserialization cannot express.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::EmptyHost`] when the host is blank.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.host.trim().is_empty() {
			return Err(ConfigError::EmptyHost);
		}
		Ok(())
	}

	/// Server address, `tcp://<host>:<port>`.
	pub fn address(&self) -> String {
		format!("tcp://{}:{}", self.host, self.port)
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn parses_documented_example() {
		let config = ProxyConfig::from_toml(
			r#"
			mode = "async"
			host = "127.0.0.1"
			port = 4242

			[[options]]
			recv_timeout_ms = 500
			"#,
		)
		.unwrap();

		assert_eq!(
			config,
			ProxyConfig::new(Mode::Async, "127.0.0.1", 4242).option(SocketOption::RecvTimeout(Duration::from_millis(500)))
		);
		assert_eq!(config.address(), "tcp://127.0.0.1:4242");
	}

	#[test]
	fn mode_defaults_to_sync() {
		let config = ProxyConfig::from_toml("host = \"localhost\"\nport = 1").unwrap();
		assert_eq!(config.mode, Mode::Sync);
		assert!(config.options.is_empty());
	}

	#[test]
	fn rejects_bad_documents() {
		assert!(matches!(
			ProxyConfig::from_toml("host = \" \"\nport = 1"),
			Err(ConfigError::EmptyHost)
		));
		assert!(matches!(ProxyConfig::from_toml("host = \"h\""), Err(ConfigError::Parse(_))));
		assert!(matches!(
			ProxyConfig::from_toml("host = \"h\"\nport = 1\nretries = 3"),
			Err(ConfigError::Parse(_))
		));
		assert!(matches!(
			ProxyConfig::from_toml("mode = \"turbo\"\nhost = \"h\"\nport = 1"),
			Err(ConfigError::Parse(_))
		));
	}
}
