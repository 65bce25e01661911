//! Correlation ids and method addressing.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ProtocolError, Result};

/// Separator between class and method in the wire `method` field.
pub const METHOD_SEPARATOR: &str = "->";

/// Renders the wire method path for a class/method pair.
pub fn join_method(class: &str, method: &str) -> String {
	format!("{class}{METHOD_SEPARATOR}{method}")
}

/// Splits a wire method path into `(class, method)`.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidMethod`] when the separator is missing or
/// either side is empty.
pub fn split_method(path: &str) -> Result<(&str, &str)> {
	match path.split_once(METHOD_SEPARATOR) {
		Some((class, method)) if !class.is_empty() && !method.is_empty() => Ok((class, method)),
		_ => Err(ProtocolError::InvalidMethod(path.to_owned())),
	}
}

/// Counter-based correlation id generator.
///
/// Ids are `"<prefix>-<n>"` where the prefix is random per generator and `n`
/// is an atomic counter, so back-to-back submissions from any number of
/// threads never collide, and two generators talking to the same server are
/// distinguishable.
#[derive(Debug)]
pub struct IdGen {
	prefix: String,
	next: AtomicU64,
}

impl IdGen {
	/// Creates a generator with a random prefix, counting from 0.
	#[must_use]
	pub fn new() -> Self {
		let mut prefix = uuid::Uuid::new_v4().simple().to_string();
		prefix.truncate(12);
		Self::with_prefix(prefix)
	}

	/// Creates a generator with a fixed prefix, counting from 0.
	#[must_use]
	pub fn with_prefix(prefix: impl Into<String>) -> Self {
		Self {
			prefix: prefix.into(),
			next: AtomicU64::new(0),
		}
	}

	/// Prefix shared by every id of this generator.
	pub fn prefix(&self) -> &str {
		&self.prefix
	}

	/// Generates the next unique id.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&self) -> String {
		let n = self.next.fetch_add(1, Ordering::Relaxed);
		format!("{}-{n}", self.prefix)
	}
}

impl Default for IdGen {
	fn default() -> Self {
		Self::new()
	}
}
