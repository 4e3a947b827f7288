//! Versioned cluster membership (C3): the set of nodes, the partition map,
//! and the causal version history that lets two divergent views converge.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use ringcoord_util::migrate::Migrate;
use ringcoord_util::persister::Persister;
use ringcoord_util::{ActorId, Error, NodeId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::partition_map::PartitionMap;
use crate::vector_clock::{Ordering as ClockOrdering, VectorClock};

/// Which partitions a node is asked about: the ones it is the primary
/// owner of, or every partition for which it holds any replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionScope {
	Master,
	All,
}

/// The convergent part of membership state: what gets compared, merged and
/// persisted. `MembershipState::self_id` is deliberately kept out of this
/// struct so it can never leak into a `compare`/`merge`/on-disk encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MembershipData {
	version: VectorClock,
	nodes: Vec<NodeId>,
	partitions: PartitionMap,
}

/// Legacy, unversioned on-disk layout: a flat 5-field tuple `{c, partitions,
/// version, nodes, _}`. The first and last fields carried meaning this
/// crate does not need; they are read and discarded.
#[derive(Deserialize)]
struct LegacyMembershipData(
	serde::de::IgnoredAny,
	PartitionMap,
	VectorClock,
	Vec<NodeId>,
	serde::de::IgnoredAny,
);

impl From<LegacyMembershipData> for MembershipData {
	fn from(legacy: LegacyMembershipData) -> Self {
		MembershipData {
			version: legacy.2,
			nodes: legacy.3,
			partitions: legacy.1,
		}
	}
}

impl Migrate for MembershipData {
	const VERSION_MARK: u8 = 1;
	type Legacy = LegacyMembershipData;
}

/// A node's view of cluster membership: the set of nodes, the partition
/// map, and the vector clock tracking how this view was derived. `self_id`
/// is this process's own identity; `replication_factor` is this node's
/// locally-known copy of `Config::n`. Neither is compared, merged, or
/// persisted as part of the convergent state — both are process-local,
/// supplied by whoever owns `Config` the same way `self_id` is.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipState {
	data: MembershipData,
	self_id: NodeId,
	replication_factor: usize,
}

impl MembershipState {
	/// A freshly bootstrapped cluster view containing exactly `nodes`
	/// (which must include `self_id`), with `q` partitions distributed
	/// round-robin across them and an empty version history.
	/// `replication_factor` is the cluster's `N` (see `Config`), needed to
	/// compute `partitions_for_node(_, All)`.
	pub fn fresh(
		self_id: NodeId,
		nodes: &[NodeId],
		q: usize,
		replication_factor: usize,
	) -> Result<Self, Error> {
		let mut sorted = nodes.to_vec();
		sorted.sort();
		sorted.dedup();
		let partitions = PartitionMap::create(q, &sorted)?;
		Ok(MembershipState {
			data: MembershipData {
				version: VectorClock::new(),
				nodes: sorted,
				partitions,
			},
			self_id,
			replication_factor,
		})
	}

	pub fn self_id(&self) -> &NodeId {
		&self.self_id
	}

	pub fn version(&self) -> &VectorClock {
		&self.data.version
	}

	pub fn nodes(&self) -> &[NodeId] {
		&self.data.nodes
	}

	pub fn partitions(&self) -> &PartitionMap {
		&self.data.partitions
	}

	/// `join(newcomer)`: adds `newcomer`, recomputes the partition map, and
	/// increments the version under this node's own actor id (this node is
	/// the coordinator of the join).
	pub fn join(&self, newcomer: NodeId) -> Result<Self, Error> {
		let mut nodes = self.data.nodes.clone();
		if !nodes.contains(&newcomer) {
			nodes.push(newcomer);
			nodes.sort();
		}
		let partitions = PartitionMap::map_partitions(&self.data.partitions, &nodes)?;
		Ok(self.with_data(MembershipData {
			version: self.data.version.increment(&ActorId::from(&self.self_id)),
			nodes,
			partitions,
		}))
	}

	/// `remove(departing)`, symmetric to `join`.
	pub fn remove(&self, departing: &NodeId) -> Result<Self, Error> {
		let nodes: Vec<NodeId> = self
			.data
			.nodes
			.iter()
			.filter(|n| *n != departing)
			.cloned()
			.collect();
		let partitions = PartitionMap::map_partitions(&self.data.partitions, &nodes)?;
		Ok(self.with_data(MembershipData {
			version: self.data.version.increment(&ActorId::from(&self.self_id)),
			nodes,
			partitions,
		}))
	}

	/// `remap(new_partition_map)`: administrative hard-remap.
	pub fn remap(&self, new_partitions: PartitionMap) -> Self {
		self.with_data(MembershipData {
			version: self.data.version.increment(&ActorId::from(&self.self_id)),
			nodes: self.data.nodes.clone(),
			partitions: new_partitions,
		})
	}

	/// `merge(remote)`: the causal merge described in the component design.
	pub fn merge(&self, remote: &Self) -> Result<Self, Error> {
		match self.data.version.compare(&remote.data.version) {
			ClockOrdering::Equal => Ok(self.clone()),
			ClockOrdering::Less => Ok(self.with_data(remote.data.clone())),
			ClockOrdering::Greater => Ok(self.clone()),
			ClockOrdering::Concurrent => {
				let mut nodes = self.data.nodes.clone();
				for n in remote.data.nodes.iter() {
					if !nodes.contains(n) {
						nodes.push(n.clone());
					}
				}
				nodes.sort();
				let partitions = PartitionMap::map_partitions(&self.data.partitions, &nodes)?;
				let version = self.data.version.merge(&remote.data.version);
				Ok(self.with_data(MembershipData {
					version,
					nodes,
					partitions,
				}))
			}
		}
	}

	/// `partitions_for_node(node, scope)`. `All` is the union of `Master`
	/// partitions across the `N` reverse-replica nodes of `node`, where `N`
	/// is this node's own `replication_factor` (its local copy of
	/// `Config::n`) — not the total node count, which would make `All`
	/// degenerate to "every partition" whenever `N < |nodes|`.
	pub fn partitions_for_node(&self, node: &NodeId, scope: PartitionScope) -> Vec<u64> {
		match scope {
			PartitionScope::Master => self
				.data
				.partitions
				.partitions()
				.filter(|p| self.data.partitions.owner(*p).map(|o| o == node).unwrap_or(false))
				.collect(),
			PartitionScope::All => {
				let reverse_nodes: Vec<NodeId> = self.data.nodes.iter().rev().cloned().collect();
				let reverse_replicas =
					PartitionMap::replicas(node, self.replication_factor, &reverse_nodes);
				let mut out: Vec<u64> = Vec::new();
				for rn in reverse_replicas {
					for p in self.partitions_for_node(&rn, PartitionScope::Master) {
						if !out.contains(&p) {
							out.push(p);
						}
					}
				}
				out
			}
		}
	}

	/// `save(path)`: persists to `<directory>/<self_id>.bin`.
	pub fn save(&self, directory: &Path) -> Result<(), Error> {
		let persister: Persister<MembershipData> = Persister::new(directory, self.self_id.as_str());
		persister.save(&self.data)
	}

	/// `load(path)`: loads `<directory>/<self_id>.bin`, upgrading the
	/// legacy tuple layout in place if that's what is found on disk.
	/// `replication_factor` is supplied by the caller the same way
	/// `self_id` is — it lives in `Config`, not on disk.
	pub fn load(directory: &Path, self_id: NodeId, replication_factor: usize) -> Result<Self, Error> {
		let persister: Persister<MembershipData> = Persister::new(directory, self_id.as_str());
		let data = persister.load()?;
		Ok(MembershipState {
			data,
			self_id,
			replication_factor,
		})
	}

	fn with_data(&self, data: MembershipData) -> Self {
		MembershipState {
			data,
			self_id: self.self_id.clone(),
			replication_factor: self.replication_factor,
		}
	}
}

/// Emitted by `MembershipActor::install` whenever an installed state
/// changes the node set or partition map, so that the (out of scope)
/// storage layer can start/stop per-partition workers. This is a side
/// effect of state installation, not of `MembershipState::merge` itself.
#[derive(Debug, Clone)]
pub struct OwnershipChanged {
	pub nodes: Vec<NodeId>,
	pub partitions: PartitionMap,
}

/// The actor that owns the single mutable copy of `MembershipState`.
/// Readers (the `Mediator`, gossip peers answering `GetState`) take a cheap
/// `Arc` snapshot via `ArcSwap` rather than routing through a channel;
/// writers go through `install`, which persists, swaps the snapshot
/// atomically, and notifies ownership-change subscribers.
pub struct MembershipActor {
	directory: PathBuf,
	snapshot: ArcSwap<MembershipState>,
	ownership_events: tokio::sync::broadcast::Sender<OwnershipChanged>,
}

impl MembershipActor {
	pub fn new(initial: MembershipState, directory: PathBuf) -> Self {
		let (tx, _rx) = tokio::sync::broadcast::channel(16);
		MembershipActor {
			directory,
			snapshot: ArcSwap::new(Arc::new(initial)),
			ownership_events: tx,
		}
	}

	/// A cheap, read-optimized snapshot of the current state. Safe to call
	/// from any task without going through the owning actor.
	pub fn snapshot(&self) -> Arc<MembershipState> {
		self.snapshot.load_full()
	}

	pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<OwnershipChanged> {
		self.ownership_events.subscribe()
	}

	/// Installs `new_state`: persists it to disk, atomically replaces the
	/// published snapshot, and, if the node set or partition map changed,
	/// broadcasts an `OwnershipChanged` event.
	pub fn install(&self, new_state: MembershipState) -> Result<(), Error> {
		let previous = self.snapshot.load();
		let changed =
			previous.nodes() != new_state.nodes() || previous.partitions() != new_state.partitions();

		new_state.save(&self.directory)?;
		self.snapshot.store(Arc::new(new_state.clone()));

		if changed {
			info!(
				node_count = new_state.nodes().len(),
				partition_count = new_state.partitions().len(),
				"installed membership state with new ownership"
			);
			let _ = self.ownership_events.send(OwnershipChanged {
				nodes: new_state.nodes().to_vec(),
				partitions: new_state.partitions().clone(),
			});
		}
		Ok(())
	}

	pub fn join(&self, newcomer: NodeId) -> Result<(), Error> {
		let next = self.snapshot().join(newcomer)?;
		self.install(next)
	}

	pub fn remove(&self, departing: &NodeId) -> Result<(), Error> {
		let next = self.snapshot().remove(departing)?;
		self.install(next)
	}

	pub fn remap(&self, new_partitions: PartitionMap) -> Result<(), Error> {
		let next = self.snapshot().remap(new_partitions);
		self.install(next)
	}

	/// Applies one gossip merge round and reports whether anything was
	/// actually installed (an `Equal` comparison installs nothing, per the
	/// anti-entropy protocol: no traffic, no disk write).
	pub fn merge_remote(&self, remote: &MembershipState) -> Result<bool, Error> {
		let current = self.snapshot();
		if matches!(
			current.version().compare(remote.version()),
			ClockOrdering::Equal
		) {
			return Ok(false);
		}
		let merged = current.merge(remote)?;
		self.install(merged)?;
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn n(name: &str) -> NodeId {
		NodeId::new(name)
	}

	fn fresh(self_id: &str, nodes: &[&str], q: usize) -> MembershipState {
		fresh_n(self_id, nodes, q, 3)
	}

	fn fresh_n(self_id: &str, nodes: &[&str], q: usize, replication_factor: usize) -> MembershipState {
		let nodes: Vec<NodeId> = nodes.iter().map(|x| n(x)).collect();
		MembershipState::fresh(n(self_id), &nodes, q, replication_factor).unwrap()
	}

	#[test]
	fn join_adds_node_and_increments_version() {
		let m = fresh("a", &["a", "b"], 8);
		let joined = m.join(n("c")).unwrap();
		assert_eq!(joined.nodes(), &[n("a"), n("b"), n("c")]);
		assert_eq!(joined.version().get(&ActorId::from(n("a"))), 1);
		for p in joined.partitions().partitions() {
			assert!(joined.partitions().owner(p).is_ok());
		}
	}

	#[test]
	fn remove_drops_node_and_reassigns_its_partitions() {
		let m = fresh("a", &["a", "b", "c"], 8);
		let removed = m.remove(&n("c")).unwrap();
		assert_eq!(removed.nodes(), &[n("a"), n("b")]);
		assert!(removed.partitions().owners().all(|o| o != &n("c")));
	}

	#[test]
	fn merge_equal_is_a_no_op() {
		let m = fresh("a", &["a", "b"], 8);
		let merged = m.merge(&m).unwrap();
		assert_eq!(merged.version(), m.version());
		assert_eq!(merged.nodes(), m.nodes());
	}

	#[test]
	fn merge_is_commutative_on_concurrent_views() {
		let base = fresh("a", &["a", "b"], 8);
		let left = base.join(n("c")).unwrap();
		let right_base = MembershipState {
			data: base.data.clone(),
			self_id: n("b"),
			replication_factor: base.replication_factor,
		};
		let right = right_base.join(n("d")).unwrap();

		let merged_lr = left.merge(&right).unwrap();
		let merged_rl = right.merge(&left).unwrap();
		assert_eq!(merged_lr.nodes(), merged_rl.nodes());
		assert_eq!(merged_lr.version(), merged_rl.version());
		assert_eq!(merged_lr.partitions(), merged_rl.partitions());
	}

	#[test]
	fn merge_is_idempotent() {
		let base = fresh("a", &["a", "b"], 8);
		let joined = base.join(n("c")).unwrap();
		let merged = joined.merge(&joined).unwrap();
		assert_eq!(merged, joined);
	}

	#[test]
	fn save_then_load_round_trips() {
		let dir = mktemp::Temp::new_dir().unwrap();
		let m = fresh("a", &["a", "b", "c"], 8);
		m.save(dir.as_path()).unwrap();
		let loaded = MembershipState::load(dir.as_path(), n("a"), m.replication_factor).unwrap();
		assert_eq!(loaded.version(), m.version());
		assert_eq!(loaded.nodes(), m.nodes());
		assert_eq!(loaded.partitions(), m.partitions());
	}

	#[test]
	fn partitions_for_node_master_is_nonempty_after_join() {
		let a = fresh("a", &["a"], 8);
		let joined = a.join(n("b")).unwrap();
		let master = joined.partitions_for_node(&n("b"), PartitionScope::Master);
		assert!(!master.is_empty() || joined.nodes().len() == 1);
	}

	/// With `N` strictly less than the node count, `partitions_for_node(_,
	/// All)` must return a strict subset of the cluster's partitions, not
	/// degenerate to "every partition" the way using the total node count
	/// in place of `N` would.
	#[test]
	fn partitions_for_node_all_uses_replication_factor_not_node_count() {
		let m = fresh_n("a", &["a", "b", "c", "d", "e"], 16, 3);
		let all = m.partitions_for_node(&n("a"), PartitionScope::All);
		assert!(
			all.len() < m.partitions().len(),
			"expected a strict subset of the cluster's {} partitions with n=3 over 5 nodes, got {}",
			m.partitions().len(),
			all.len()
		);

		let master = m.partitions_for_node(&n("a"), PartitionScope::Master);
		for p in master {
			assert!(all.contains(&p), "a node's own master partitions must be in its All set");
		}
	}
}
