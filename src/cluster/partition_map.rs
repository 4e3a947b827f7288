//! Partition-to-owner mapping (C2): a stable set of `Q` partition ids, each
//! owned by exactly one node, plus the ring-replication rule used to derive
//! a key's replica set.

use std::collections::HashMap;

use ringcoord_util::data::{PartitionId, HASH_SPACE};
use ringcoord_util::{Error, NodeId};
use serde::{Deserialize, Serialize};

/// An ordered mapping of `Q` partition ids to their owning node, with an
/// O(1) secondary index for lookup.
///
/// Only `assignments` is ever serialized; `index` is a derived,
/// process-local cache rebuilt on deserialize (see the `Serialize`/
/// `Deserialize` impls below), so the two can never drift apart on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMap {
	/// `(partition_id, owner)` pairs, sorted by partition id. Length is
	/// always `Q`.
	assignments: Vec<(PartitionId, NodeId)>,
	index: HashMap<PartitionId, NodeId>,
}

impl Serialize for PartitionMap {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		self.assignments.serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for PartitionMap {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let assignments = Vec::<(PartitionId, NodeId)>::deserialize(deserializer)?;
		Ok(PartitionMap::from_assignments(assignments))
	}
}

impl PartitionMap {
	/// Width of the hash range each of `q` partitions covers.
	fn range_width(q: usize) -> u128 {
		assert!(q > 0, "partition count must be positive");
		(HASH_SPACE + q as u128 - 1) / q as u128
	}

	/// The stable, ascending list of partition ids for a given `q`. Ids are
	/// pure functions of `q` and never change across rebalancing; only
	/// their owner does.
	fn partition_ids(q: usize) -> Vec<PartitionId> {
		let range = Self::range_width(q);
		(0..q as u128)
			.map(|k| (k * range) as PartitionId)
			.collect()
	}

	fn build_index(assignments: &[(PartitionId, NodeId)]) -> HashMap<PartitionId, NodeId> {
		assignments
			.iter()
			.map(|(p, n)| (*p, n.clone()))
			.collect()
	}

	fn from_assignments(mut assignments: Vec<(PartitionId, NodeId)>) -> Self {
		assignments.sort_by_key(|(p, _)| *p);
		let index = Self::build_index(&assignments);
		PartitionMap { assignments, index }
	}

	/// `create_partitions(q, nodes)`: `Q` partitions distributed round-robin
	/// across the sorted node set. Implemented as the degenerate case of
	/// `map_partitions` where nothing is kept from a previous map.
	pub fn create(q: usize, nodes: &[NodeId]) -> Result<Self, Error> {
		let empty = PartitionMap::from_assignments(vec![]);
		Self::rebalance(Self::partition_ids(q), &empty, nodes)
	}

	/// `map_partitions(existing, new_nodes)`: reassigns partitions so that
	/// ownership is balanced while minimizing churn. A partition whose
	/// owner is still present in `new_nodes` keeps it; partitions owned by
	/// departed nodes are handed, one at a time in partition-id order, to
	/// whichever remaining node currently owns the fewest partitions
	/// (ties broken by node id so the result is deterministic given a
	/// sorted node input).
	pub fn map_partitions(existing: &Self, new_nodes: &[NodeId]) -> Result<Self, Error> {
		let ids: Vec<PartitionId> = existing.assignments.iter().map(|(p, _)| *p).collect();
		Self::rebalance(ids, existing, new_nodes)
	}

	fn rebalance(ids: Vec<PartitionId>, existing: &Self, new_nodes: &[NodeId]) -> Result<Self, Error> {
		if new_nodes.is_empty() {
			return Err(Error::invariant(
				"cannot build a partition map over an empty node set",
			));
		}
		let mut sorted_nodes: Vec<NodeId> = new_nodes.to_vec();
		sorted_nodes.sort();
		sorted_nodes.dedup();

		let mut counts: HashMap<NodeId, usize> =
			sorted_nodes.iter().cloned().map(|n| (n, 0usize)).collect();

		let mut kept: Vec<(PartitionId, NodeId)> = Vec::with_capacity(ids.len());
		let mut orphaned: Vec<PartitionId> = Vec::new();

		for p in ids {
			match existing.index.get(&p) {
				Some(owner) if counts.contains_key(owner) => {
					*counts.get_mut(owner).unwrap() += 1;
					kept.push((p, owner.clone()));
				}
				_ => orphaned.push(p),
			}
		}

		for p in orphaned {
			let winner = sorted_nodes
				.iter()
				.min_by_key(|n| (counts[*n], (*n).clone()))
				.expect("node set checked non-empty above")
				.clone();
			*counts.get_mut(&winner).unwrap() += 1;
			kept.push((p, winner));
		}

		Ok(Self::from_assignments(kept))
	}

	/// `partition_for_hash(h, q)`.
	pub fn partition_for_hash(h: u64, q: usize) -> PartitionId {
		let range = Self::range_width(q);
		((h as u128 / range) * range) as PartitionId
	}

	/// `owner(p)`.
	pub fn owner(&self, p: PartitionId) -> Result<&NodeId, Error> {
		self.index
			.get(&p)
			.ok_or_else(|| Error::invariant(format!("partition {} has no owner", p)))
	}

	pub fn len(&self) -> usize {
		self.assignments.len()
	}

	pub fn is_empty(&self) -> bool {
		self.assignments.is_empty()
	}

	pub fn partitions(&self) -> impl Iterator<Item = PartitionId> + '_ {
		self.assignments.iter().map(|(p, _)| *p)
	}

	pub fn owners(&self) -> impl Iterator<Item = &NodeId> {
		self.assignments.iter().map(|(_, n)| n)
	}

	/// `replicas(node, n, nodes)`: the ring-replication rule. `nodes` must
	/// already be sorted (as `MembershipState` keeps them). Returns `n`
	/// distinct nodes starting at `node` and wrapping around; if
	/// `n >= nodes.len()`, returns every node.
	pub fn replicas(node: &NodeId, n: usize, nodes: &[NodeId]) -> Vec<NodeId> {
		if nodes.is_empty() {
			return vec![];
		}
		let start = nodes.iter().position(|x| x == node).unwrap_or(0);
		let take = n.min(nodes.len());
		nodes
			.iter()
			.cycle()
			.skip(start)
			.take(take)
			.cloned()
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn nodes(names: &[&str]) -> Vec<NodeId> {
		let mut v: Vec<NodeId> = names.iter().map(|n| NodeId::new(*n)).collect();
		v.sort();
		v
	}

	#[test]
	fn create_assigns_every_partition_exactly_once() {
		let ns = nodes(&["a", "b", "c"]);
		let pm = PartitionMap::create(8, &ns).unwrap();
		assert_eq!(pm.len(), 8);
		let mut seen: Vec<PartitionId> = pm.partitions().collect();
		seen.sort();
		seen.dedup();
		assert_eq!(seen.len(), 8);
	}

	#[test]
	fn create_balances_ownership_round_robin() {
		let ns = nodes(&["a", "b", "c"]);
		let pm = PartitionMap::create(9, &ns).unwrap();
		let mut counts: HashMap<NodeId, usize> = HashMap::new();
		for owner in pm.owners() {
			*counts.entry(owner.clone()).or_insert(0) += 1;
		}
		for n in &ns {
			assert_eq!(counts[n], 3);
		}
	}

	#[test]
	fn map_partitions_keeps_surviving_owners() {
		let ns = nodes(&["a", "b", "c"]);
		let pm = PartitionMap::create(8, &ns).unwrap();
		let surviving = nodes(&["a", "b"]);
		let remapped = PartitionMap::map_partitions(&pm, &surviving).unwrap();
		for (p, owner) in pm.assignments.iter() {
			if *owner != NodeId::new("c") {
				assert_eq!(remapped.owner(*p).unwrap(), owner);
			}
		}
		for owner in remapped.owners() {
			assert_ne!(owner, &NodeId::new("c"));
		}
	}

	#[test]
	fn partition_for_hash_is_total_and_stable() {
		for h in [0u64, 1, u64::MAX / 2, u64::MAX - 1, u64::MAX] {
			let p = PartitionMap::partition_for_hash(h, 8);
			assert!(p <= h);
		}
	}

	#[test]
	fn replicas_wraps_around_the_ring() {
		let ns = nodes(&["a", "b", "c", "d"]);
		let r = PartitionMap::replicas(&NodeId::new("c"), 3, &ns);
		assert_eq!(
			r,
			vec![NodeId::new("c"), NodeId::new("d"), NodeId::new("a")]
		);
	}

	#[test]
	fn replicas_returns_all_nodes_when_n_exceeds_node_count() {
		let ns = nodes(&["a", "b"]);
		let r = PartitionMap::replicas(&NodeId::new("a"), 5, &ns);
		assert_eq!(r.len(), 2);
	}
}
