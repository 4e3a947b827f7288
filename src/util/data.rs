//! Basic handles shared across the coordination core: node identities, actor
//! identities and the partition id space.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, sortable handle identifying a cluster member.
///
/// In a full deployment this would be resolved to a network address by the
/// (out of scope) RPC layer; here it is just the node's name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
	pub fn new<S: Into<String>>(name: S) -> Self {
		NodeId(name.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for NodeId {
	fn from(s: &str) -> Self {
		NodeId(s.to_string())
	}
}

impl From<String> for NodeId {
	fn from(s: String) -> Self {
		NodeId(s)
	}
}

/// Identity of a vector clock actor: the node (or coordinator process) that
/// incremented a counter. Actor ids and node ids share the same namespace in
/// this implementation, but are kept as distinct types so that a future
/// version could split them (e.g. one actor id per client session).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
	pub fn new<S: Into<String>>(name: S) -> Self {
		ActorId(name.into())
	}
}

impl fmt::Display for ActorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&NodeId> for ActorId {
	fn from(n: &NodeId) -> Self {
		ActorId(n.0.clone())
	}
}

impl From<NodeId> for ActorId {
	fn from(n: NodeId) -> Self {
		ActorId(n.0)
	}
}

/// The lower bound of the hash range a partition covers. Stable across
/// rebalancing: only the owner of a given `PartitionId` ever changes.
pub type PartitionId = u64;

/// Total size of the hash space partitions are carved out of. The pluggable
/// `KeyHasher` (see `ringcoord_util::hasher`) always produces a `u64`, so the
/// hash space is simply `u64::MAX + 1`, represented here as `u128` to avoid
/// overflow when computing the per-partition range width.
pub const HASH_SPACE: u128 = 1u128 << 64;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn node_id_ordering_is_lexicographic() {
		let mut nodes = vec![NodeId::new("c"), NodeId::new("a"), NodeId::new("b")];
		nodes.sort();
		assert_eq!(
			nodes,
			vec![NodeId::new("a"), NodeId::new("b"), NodeId::new("c")]
		);
	}
}
