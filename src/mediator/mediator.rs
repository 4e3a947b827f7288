//! Quorum request mediation (C5): replica selection, parallel dispatch, and
//! the N/R/W success decision described in the component design.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ringcoord_cluster::membership::MembershipActor;
use ringcoord_cluster::partition_map::PartitionMap;
use ringcoord_cluster::vector_clock::{resolve_many, Resolved, VectorClock};
use ringcoord_util::hasher::KeyHasher;
use ringcoord_util::{ActorId, Error, NodeId};
use tracing::warn;

use crate::storage::{ReplicaEndpoint, StorageEndpoint, StorageError, VersionedBytes};

/// Per-call deadline for `delete`.
const DELETE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of `Mediator::get`: either a reconciled value (possibly several
/// mutually concurrent siblings) or a quorum-confirmed absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOutcome {
	Found(Resolved<Vec<u8>>),
	NotFound,
}

/// Translates single-key operations into an N-way fanout over
/// `StorageEndpoint`, deciding success by quorum against `Config`'s `R`/`W`.
pub struct Mediator {
	membership: Arc<MembershipActor>,
	storage: Arc<dyn StorageEndpoint>,
	hasher: Arc<dyn KeyHasher>,
	self_id: NodeId,
	n: usize,
	r: usize,
	w: usize,
}

impl Mediator {
	pub fn new(
		membership: Arc<MembershipActor>,
		storage: Arc<dyn StorageEndpoint>,
		hasher: Arc<dyn KeyHasher>,
		self_id: NodeId,
		n: usize,
		r: usize,
		w: usize,
	) -> Self {
		Mediator {
			membership,
			storage,
			hasher,
			self_id,
			n,
			r,
			w,
		}
	}

	/// The replica set for `key`: `N` ring-consecutive nodes starting at the
	/// owner of the partition `key` hashes into, all addressing the same
	/// partition id.
	fn replica_set(&self, key: &[u8]) -> Result<Vec<ReplicaEndpoint>, Error> {
		let state = self.membership.snapshot();
		let partitions = state.partitions();
		let hash = self.hasher.hash_key(key);
		let partition = PartitionMap::partition_for_hash(hash, partitions.len());
		let owner = partitions.owner(partition)?.clone();
		let nodes = PartitionMap::replicas(&owner, self.n, state.nodes());
		Ok(nodes
			.into_iter()
			.map(|node| ReplicaEndpoint { partition, node })
			.collect())
	}

	/// Dispatches `f` to every replica in `replicas` concurrently and waits
	/// for every reply, per the `pcall` contract: no early exit on quorum so
	/// that `Bad` is always complete for diagnostics and for `not_found`
	/// counting.
	async fn pcall<T, F, Fut>(
		&self,
		replicas: &[ReplicaEndpoint],
		f: F,
	) -> (Vec<T>, Vec<(NodeId, StorageError)>)
	where
		F: Fn(ReplicaEndpoint) -> Fut,
		Fut: Future<Output = Result<T, StorageError>>,
	{
		let calls = replicas.iter().cloned().map(|ep| {
			let node = ep.node.clone();
			let call = f(ep);
			async move { (node, call.await) }
		});
		let results = futures::future::join_all(calls).await;

		let mut good = Vec::with_capacity(results.len());
		let mut bad = Vec::new();
		for (node, result) in results {
			match result {
				Ok(v) => good.push(v),
				Err(e) => bad.push((node, e)),
			}
		}
		(good, bad)
	}

	fn quorum_error(
		&self,
		op: &str,
		good: usize,
		threshold: usize,
		bad: &[(NodeId, StorageError)],
	) -> Error {
		Error::message(format!(
			"{op}: quorum not met ({good}/{n} replicas succeeded, required {threshold}); failures: {failures}",
			op = op,
			good = good,
			n = self.n,
			threshold = threshold,
			failures = bad
				.iter()
				.map(|(node, e)| format!("{node}={e}"))
				.collect::<Vec<_>>()
				.join(", "),
		))
	}

	/// `put(key, context_clock, value)`.
	pub async fn put(
		&self,
		key: &[u8],
		context: VectorClock,
		value: Vec<u8>,
	) -> Result<usize, Error> {
		let replicas = self.replica_set(key)?;
		let incremented = context.increment(&ActorId::from(&self.self_id));

		let (good, bad) = self
			.pcall(&replicas, |ep| {
				let value = value.clone();
				let versioned = VersionedBytes::new(incremented.clone(), value);
				async move { self.storage.put(&ep, key, versioned).await }
			})
			.await;

		if good.len() >= self.w {
			Ok(good.len())
		} else {
			Err(self.quorum_error("put", good.len(), self.w, &bad))
		}
	}

	/// `get(key)`.
	pub async fn get(&self, key: &[u8]) -> Result<GetOutcome, Error> {
		let replicas = self.replica_set(key)?;
		let (good, bad): (Vec<VersionedBytes>, Vec<(NodeId, StorageError)>) = self
			.pcall(&replicas, |ep| async move { self.storage.get(&ep, key).await })
			.await;

		if good.len() >= self.r {
			let resolved = resolve_many(good).expect("checked non-empty above");
			return Ok(GetOutcome::Found(resolved));
		}

		let not_found_votes = bad.iter().filter(|(_, e)| e.is_not_found()).count();
		if not_found_votes >= self.r {
			return Ok(GetOutcome::NotFound);
		}

		Err(self.quorum_error("get", good.len(), self.r, &bad))
	}

	/// `has_key(key)`: quorum majority vote over a boolean.
	pub async fn has_key(&self, key: &[u8]) -> Result<(bool, usize), Error> {
		let replicas = self.replica_set(key)?;
		let (good, bad): (Vec<bool>, Vec<(NodeId, StorageError)>) = self
			.pcall(&replicas, |ep| async move { self.storage.has_key(&ep, key).await })
			.await;

		if good.len() < self.r {
			return Err(self.quorum_error("has_key", good.len(), self.r, &bad));
		}

		let true_count = good.iter().filter(|v| **v).count();
		let false_count = good.len() - true_count;
		if true_count >= false_count {
			Ok((true, true_count))
		} else {
			Ok((false, false_count))
		}
	}

	/// `delete(key)`: fans out with a per-call `DELETE_TIMEOUT` deadline.
	pub async fn delete(&self, key: &[u8]) -> Result<usize, Error> {
		let replicas = self.replica_set(key)?;
		let (good, bad): (Vec<()>, Vec<(NodeId, StorageError)>) = self
			.pcall(&replicas, |ep| async move {
				match tokio::time::timeout(DELETE_TIMEOUT, self.storage.delete(&ep, key)).await {
					Ok(result) => result,
					Err(_) => Err(StorageError::Timeout),
				}
			})
			.await;

		if !bad.is_empty() {
			for (node, e) in &bad {
				warn!(node = %node, error = %e, "delete replica call failed");
			}
		}

		if good.len() >= self.w {
			Ok(good.len())
		} else {
			Err(self.quorum_error("delete", good.len(), self.w, &bad))
		}
	}
}
