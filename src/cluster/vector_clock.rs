//! Vector-clock arithmetic (C1): the causal versioning primitive shared by
//! per-key value causality (`Mediator`) and membership-state causality
//! (`MembershipState`).

use std::collections::BTreeMap;

use ringcoord_util::ActorId;
use serde::{Deserialize, Serialize};

/// An unordered mapping from actor to monotonically increasing counter.
/// `BTreeMap` is used purely so that two clocks with identical content
/// compare equal and serialize identically; actor order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock(BTreeMap<ActorId, u64>);

/// The result of comparing two vector clocks under the usual partial order
/// over their per-actor counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
	Equal,
	Less,
	Greater,
	Concurrent,
}

impl VectorClock {
	/// An empty clock, used as the initial "no prior version" context.
	pub fn new() -> Self {
		VectorClock(BTreeMap::new())
	}

	/// `create(actor)`: a fresh clock with a single entry `{actor: 1}`.
	pub fn create(actor: &ActorId) -> Self {
		let mut m = BTreeMap::new();
		m.insert(actor.clone(), 1);
		VectorClock(m)
	}

	/// `increment(actor, vc)`: `vc` with `actor`'s counter incremented by
	/// one, creating the entry if it is absent. Panics on the (practically
	/// unreachable) 64-bit counter overflow, per the fatal invariant in
	/// the component design.
	pub fn increment(&self, actor: &ActorId) -> Self {
		let mut m = self.0.clone();
		let counter = m.entry(actor.clone()).or_insert(0);
		*counter = counter
			.checked_add(1)
			.expect("vector clock counter overflow: fatal invariant violation");
		VectorClock(m)
	}

	/// `compare(vc1, vc2)`.
	pub fn compare(&self, other: &Self) -> Ordering {
		let mut self_less = false;
		let mut other_less = false;

		for actor in self.0.keys().chain(other.0.keys()) {
			let a = self.0.get(actor).copied().unwrap_or(0);
			let b = other.0.get(actor).copied().unwrap_or(0);
			match a.cmp(&b) {
				std::cmp::Ordering::Less => self_less = true,
				std::cmp::Ordering::Greater => other_less = true,
				std::cmp::Ordering::Equal => {}
			}
		}

		match (self_less, other_less) {
			(false, false) => Ordering::Equal,
			(true, false) => Ordering::Less,
			(false, true) => Ordering::Greater,
			(true, true) => Ordering::Concurrent,
		}
	}

	/// `merge(vc1, vc2)`: elementwise max over the union of actors.
	pub fn merge(&self, other: &Self) -> Self {
		let mut m = self.0.clone();
		for (actor, counter) in other.0.iter() {
			let entry = m.entry(actor.clone()).or_insert(0);
			*entry = (*entry).max(*counter);
		}
		VectorClock(m)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn get(&self, actor: &ActorId) -> u64 {
		self.0.get(actor).copied().unwrap_or(0)
	}
}

/// A value together with the vector clock it was written under. Understood
/// by callers only for the purpose of selecting/merging clocks; the value
/// itself is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue<V> {
	pub clock: VectorClock,
	pub value: V,
}

impl<V> VersionedValue<V> {
	pub fn new(clock: VectorClock, value: V) -> Self {
		VersionedValue { clock, value }
	}
}

/// Outcome of reconciling two (or more) versioned values read from
/// different replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved<V> {
	/// A single causally-dominant value, or an arbitrary pick between two
	/// equal values.
	Value(VersionedValue<V>),
	/// Concurrent values preserved as siblings for the caller to surface.
	Siblings(Vec<VersionedValue<V>>),
}

/// `resolve(a, b)`.
pub fn resolve<V: Clone>(a: VersionedValue<V>, b: VersionedValue<V>) -> Resolved<V> {
	match a.clock.compare(&b.clock) {
		Ordering::Greater | Ordering::Equal => Resolved::Value(a),
		Ordering::Less => Resolved::Value(b),
		Ordering::Concurrent => Resolved::Siblings(vec![a, b]),
	}
}

/// Folds `resolve` right-to-left over a non-empty list of replica replies,
/// as used by `Mediator::get` (the first reply is the base case).
pub fn resolve_many<V: Clone>(mut values: Vec<VersionedValue<V>>) -> Option<Resolved<V>> {
	if values.is_empty() {
		return None;
	}
	let mut acc = Resolved::Value(values.remove(0));
	for v in values {
		acc = match acc {
			Resolved::Value(base) => resolve(base, v),
			Resolved::Siblings(mut siblings) => {
				// A later reply may dominate, be dominated by, or be
				// concurrent with each sibling already collected. `v` itself
				// is pushed at most once overall, not once per sibling it
				// happens to dominate.
				let mut next_siblings = Vec::with_capacity(siblings.len() + 1);
				let mut v_subsumed = false;
				for sib in siblings.drain(..) {
					match sib.clock.compare(&v.clock) {
						Ordering::Greater | Ordering::Equal => {
							next_siblings.push(sib);
							v_subsumed = true;
						}
						Ordering::Less => {
							// v dominates this sibling; drop the sibling.
						}
						Ordering::Concurrent => next_siblings.push(sib),
					}
				}
				if !v_subsumed {
					next_siblings.push(v);
				}
				if next_siblings.len() == 1 {
					Resolved::Value(next_siblings.remove(0))
				} else {
					Resolved::Siblings(next_siblings)
				}
			}
		};
	}
	Some(acc)
}
