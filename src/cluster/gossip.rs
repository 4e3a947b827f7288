//! Anti-entropy gossip (C4): periodic peer selection, push-pull state
//! exchange, and convergence. Written against a small `GossipTransport`
//! trait so the scheduling/convergence logic owned here stays independent
//! of the (out of scope) network listener.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use ringcoord_util::{Error, NodeId};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::membership::{MembershipActor, MembershipState};

/// One round of anti-entropy: fetch a peer's state and push back the
/// merged result. The out-of-scope network layer implements this against
/// real connections; tests implement it against an in-memory map.
#[async_trait]
pub trait GossipTransport: Send + Sync {
	async fn get_state(&self, peer: &NodeId) -> Result<MembershipState, Error>;
	async fn push_state(&self, peer: &NodeId, state: &MembershipState) -> Result<(), Error>;
}

/// Lower/upper bound of the uniform random sleep between gossip rounds.
const ROUND_INTERVAL_MIN: Duration = Duration::from_secs(5);
const ROUND_INTERVAL_MAX: Duration = Duration::from_secs(10);

/// One cooperative gossip task per node. Holds no membership state of its
/// own: every round reads the actor's published snapshot and, if it
/// changes anything, installs the result back through the actor.
pub struct Gossiper {
	membership: Arc<MembershipActor>,
	transport: Arc<dyn GossipTransport>,
}

impl Gossiper {
	pub fn new(membership: Arc<MembershipActor>, transport: Arc<dyn GossipTransport>) -> Self {
		Gossiper {
			membership,
			transport,
		}
	}

	/// Runs the gossip loop until `stop_signal` becomes `true`. A `false`
	/// value received after a prior `true` resumes the loop (the `start`/
	/// `stop` pair from the component design is just the two edges of this
	/// watch channel).
	pub async fn run(&self, mut stop_signal: watch::Receiver<bool>) {
		loop {
			if *stop_signal.borrow() {
				if stop_signal.changed().await.is_err() {
					return;
				}
				continue;
			}

			let sleep = random_round_interval();
			tokio::select! {
				_ = tokio::time::sleep(sleep) => {},
				_ = stop_signal.changed() => continue,
			}

			if let Some(peer) = self.pick_peer() {
				if let Err(e) = self.gossip_round(&peer).await {
					debug!(peer = %peer, error = %e, "gossip round aborted");
				}
			}
		}
	}

	fn pick_peer(&self) -> Option<NodeId> {
		let state = self.membership.snapshot();
		let self_id = state.self_id().clone();
		let candidates: Vec<NodeId> = state
			.nodes()
			.iter()
			.filter(|n| **n != self_id)
			.cloned()
			.collect();
		candidates.choose(&mut rand::rng()).cloned()
	}

	/// One anti-entropy push-pull round with `peer`, per the exchange
	/// protocol: pull the peer's state, merge locally only if our version
	/// doesn't already dominate, and push the merged result back.
	async fn gossip_round(&self, peer: &NodeId) -> Result<(), Error> {
		let remote = self.transport.get_state(peer).await?;
		let changed = self.membership.merge_remote(&remote)?;
		if changed {
			let merged = self.membership.snapshot();
			self.transport.push_state(peer, &merged).await?;
			info!(peer = %peer, "gossip round converged with peer");
		}
		Ok(())
	}
}

fn random_round_interval() -> Duration {
	use rand::Rng;
	let min = ROUND_INTERVAL_MIN.as_millis() as u64;
	let max = ROUND_INTERVAL_MAX.as_millis() as u64;
	Duration::from_millis(rand::rng().random_range(min..=max))
}

/// Answers an incoming `GetState`/`PushState` exchange initiated by a peer.
/// Kept separate from `Gossiper` (which only drives outgoing rounds) since
/// the inbound side is invoked directly by the (out of scope) RPC handler,
/// not by the scheduling loop.
pub async fn handle_push_state(
	membership: &MembershipActor,
	remote: &MembershipState,
) -> Result<(), Error> {
	match membership.merge_remote(remote) {
		Ok(_) => Ok(()),
		Err(e) => {
			warn!(error = %e, "failed to merge pushed membership state");
			Err(e)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::vector_clock::Ordering as ClockOrdering;
	use std::collections::HashMap;
	use std::sync::Mutex;

	struct FakeTransport {
		peers: Mutex<HashMap<NodeId, Arc<MembershipActor>>>,
	}

	#[async_trait]
	impl GossipTransport for FakeTransport {
		async fn get_state(&self, peer: &NodeId) -> Result<MembershipState, Error> {
			let peers = self.peers.lock().unwrap();
			let actor = peers
				.get(peer)
				.ok_or_else(|| Error::message("peer unreachable"))?;
			Ok((*actor.snapshot()).clone())
		}

		async fn push_state(&self, peer: &NodeId, state: &MembershipState) -> Result<(), Error> {
			let peers = self.peers.lock().unwrap();
			let actor = peers
				.get(peer)
				.ok_or_else(|| Error::message("peer unreachable"))?;
			actor.merge_remote(state)?;
			Ok(())
		}
	}

	#[tokio::test]
	async fn one_round_converges_two_divergent_nodes() {
		let dir_a = mktemp::Temp::new_dir().unwrap();
		let dir_b = mktemp::Temp::new_dir().unwrap();

		let base = MembershipState::fresh(
			NodeId::new("a"),
			&[NodeId::new("a"), NodeId::new("b")],
			8,
			3,
		)
		.unwrap();
		let a = Arc::new(MembershipActor::new(base.clone(), dir_a.as_path().to_path_buf()));
		let b_base = MembershipState::fresh(
			NodeId::new("b"),
			&[NodeId::new("a"), NodeId::new("b")],
			8,
			3,
		)
		.unwrap();
		let b = Arc::new(MembershipActor::new(b_base, dir_b.as_path().to_path_buf()));

		a.join(NodeId::new("c")).unwrap();

		let mut peers = HashMap::new();
		peers.insert(NodeId::new("a"), a.clone());
		peers.insert(NodeId::new("b"), b.clone());
		let transport = Arc::new(FakeTransport {
			peers: Mutex::new(peers),
		});

		let gossiper = Gossiper::new(b.clone(), transport);
		gossiper.gossip_round(&NodeId::new("a")).await.unwrap();

		assert_eq!(b.snapshot().nodes(), a.snapshot().nodes());
	}

	#[tokio::test]
	async fn unreachable_peer_aborts_round_silently() {
		let dir_a = mktemp::Temp::new_dir().unwrap();
		let base =
			MembershipState::fresh(NodeId::new("a"), &[NodeId::new("a")], 8, 3).unwrap();
		let a = Arc::new(MembershipActor::new(base, dir_a.as_path().to_path_buf()));
		let transport = Arc::new(FakeTransport {
			peers: Mutex::new(HashMap::new()),
		});
		let gossiper = Gossiper::new(a, transport);
		let err = gossiper.gossip_round(&NodeId::new("ghost")).await;
		assert!(err.is_err());
	}

	#[test]
	fn random_round_interval_stays_within_bounds() {
		for _ in 0..100 {
			let d = random_round_interval();
			assert!(d >= ROUND_INTERVAL_MIN && d <= ROUND_INTERVAL_MAX);
		}
	}

	/// A new node `d`, bootstrapped with only `a` in its view, learns about
	/// `b` and `c` after one gossip round against `a`, and its clock no
	/// longer trails `a`'s.
	#[tokio::test]
	async fn joining_node_learns_full_membership_after_one_round() {
		let dir_a = mktemp::Temp::new_dir().unwrap();
		let dir_d = mktemp::Temp::new_dir().unwrap();

		let a_base = MembershipState::fresh(
			NodeId::new("a"),
			&[NodeId::new("a"), NodeId::new("b"), NodeId::new("c")],
			8,
			3,
		)
		.unwrap();
		let a = Arc::new(MembershipActor::new(a_base, dir_a.as_path().to_path_buf()));
		a.join(NodeId::new("d")).unwrap();

		let d_base = MembershipState::fresh(NodeId::new("d"), &[NodeId::new("d")], 8, 3).unwrap();
		let d = Arc::new(MembershipActor::new(d_base, dir_d.as_path().to_path_buf()));

		let mut peers = HashMap::new();
		peers.insert(NodeId::new("a"), a.clone());
		peers.insert(NodeId::new("d"), d.clone());
		let transport = Arc::new(FakeTransport {
			peers: Mutex::new(peers),
		});

		let gossiper = Gossiper::new(d.clone(), transport);
		gossiper.gossip_round(&NodeId::new("a")).await.unwrap();

		let d_snapshot = d.snapshot();
		assert_eq!(
			d_snapshot.nodes(),
			&[
				NodeId::new("a"),
				NodeId::new("b"),
				NodeId::new("c"),
				NodeId::new("d")
			]
		);
		for p in d_snapshot.partitions().partitions() {
			assert!(d_snapshot.partitions().owner(p).is_ok());
		}
		assert_ne!(
			d_snapshot.version().compare(a.snapshot().version()),
			ClockOrdering::Less
		);
	}
}
