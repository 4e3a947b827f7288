//! The `StorageEndpoint` seam: per-`(partition, node)` value storage.
//! The on-disk engine and its network transport are out of scope here; this
//! module only names the contract `Mediator` dispatches against.

use async_trait::async_trait;
use ringcoord_util::data::PartitionId;
use ringcoord_util::NodeId;
use thiserror::Error;

use ringcoord_cluster::vector_clock::VersionedValue;

/// A versioned value as stored by a replica. The mediator never interprets
/// `value` itself, only the clock alongside it.
pub type VersionedBytes = VersionedValue<Vec<u8>>;

/// Addresses a single replica of a single partition. A structured value,
/// never a synthesized string key. Resolving it to a network connection is
/// the (out of scope) network layer's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaEndpoint {
	pub partition: PartitionId,
	pub node: NodeId,
}

/// The error taxonomy a replica call can fail with. `NotFound` is not
/// really a failure, it is counted separately by the mediator's quorum
/// logic, but it still travels through the same `Result` so that a single
/// fanout call site can handle all four the same way before triage.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
	#[error("key not found")]
	NotFound,
	#[error("transport error: {0}")]
	Transport(String),
	#[error("storage error: {0}")]
	Storage(String),
	#[error("replica call timed out")]
	Timeout,
}

impl StorageError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, StorageError::NotFound)
	}
}

/// Per-replica storage contract. Implemented by the (out of scope)
/// on-disk engine behind its network transport; tests implement it against
/// an in-memory map keyed by `(partition, node)`.
#[async_trait]
pub trait StorageEndpoint: Send + Sync {
	async fn get(&self, endpoint: &ReplicaEndpoint, key: &[u8]) -> Result<VersionedBytes, StorageError>;

	async fn put(
		&self,
		endpoint: &ReplicaEndpoint,
		key: &[u8],
		value: VersionedBytes,
	) -> Result<(), StorageError>;

	async fn has_key(&self, endpoint: &ReplicaEndpoint, key: &[u8]) -> Result<bool, StorageError>;

	async fn delete(&self, endpoint: &ReplicaEndpoint, key: &[u8]) -> Result<(), StorageError>;
}
