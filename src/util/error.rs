//! Error types shared across the coordination core.
//!
//! Each crate defines its own leaf error enum for the seam it owns
//! (`RpcError` for gossip/config transport, `MediatorError` for quorum
//! failures); they all convert into this top-level `Error` via `#[from]` so
//! that a caller several layers up can match on a single type while the
//! `Display` impl still carries the precise diagnostic.

use thiserror::Error;

/// Regroups all errors that can escape the coordination core.
#[derive(Debug, Error)]
pub enum Error {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("MessagePack encode error: {0}")]
	RmpEncode(#[from] rmp_serde::encode::Error),

	#[error("MessagePack decode error: {0}")]
	RmpDecode(#[from] rmp_serde::decode::Error),

	#[error("Corrupt persisted state: {0}")]
	CorruptData(String),

	/// A logic invariant of the coordination core was violated: a partition
	/// with no owner, a replica set larger than the node set, a vector
	/// clock counter that regressed. Never produced by normal operation;
	/// callers should treat this as fatal and let the process restart.
	#[error("Invariant violation: {0}")]
	InvariantViolation(String),

	#[error("{0}")]
	Message(String),
}

impl Error {
	pub fn message<S: Into<String>>(msg: S) -> Self {
		Error::Message(msg.into())
	}

	pub fn invariant<S: Into<String>>(msg: S) -> Self {
		Error::InvariantViolation(msg.into())
	}
}

impl<T> From<tokio::sync::watch::error::SendError<T>> for Error {
	fn from(_e: tokio::sync::watch::error::SendError<T>) -> Error {
		Error::Message("watch channel has no more receivers".to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn invariant_violation_message_is_preserved() {
		let e = Error::invariant("partition 3 has no owner");
		assert_eq!(
			e.to_string(),
			"Invariant violation: partition 3 has no owner"
		);
	}
}
