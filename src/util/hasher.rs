//! Pluggable hash function from key bytes into the 64-bit hash space that
//! partitions are carved out of. The coordination core only ever needs a
//! `u64` out of this; which hash algorithm produces it is not its concern.

use xxhash_rust::xxh3::xxh3_64;

/// A hash function usable to place a key in the partition space.
///
/// Kept as a trait (rather than a free function) so that tests can swap in a
/// hasher with a known, fixed output without pulling a specific hashing
/// crate's API into the rest of the core.
pub trait KeyHasher: Send + Sync {
	fn hash_key(&self, key: &[u8]) -> u64;
}

/// Default hasher, backed by xxh3. Fast, well distributed, no cryptographic
/// properties required since this is a placement function, not a security
/// boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh3Hasher;

impl KeyHasher for Xxh3Hasher {
	fn hash_key(&self, key: &[u8]) -> u64 {
		xxh3_64(key)
	}
}

/// Test-only hashers, kept as a regular (not `#[cfg(test)]`) module so that
/// other crates in the workspace can use them in their own unit tests.
/// `cfg(test)` items are private to the crate they're compiled in and are
/// not visible across a crate boundary even to a downstream test build.
pub mod test_support {
	use super::*;

	/// A hasher that always returns the hash it was built with. Used in
	/// unit tests that need to steer a key into a specific partition.
	pub struct FixedHasher(pub u64);

	impl KeyHasher for FixedHasher {
		fn hash_key(&self, _key: &[u8]) -> u64 {
			self.0
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn xxh3_hasher_is_deterministic() {
		let h = Xxh3Hasher;
		assert_eq!(h.hash_key(b"apple"), h.hash_key(b"apple"));
	}

	#[test]
	fn xxh3_hasher_distinguishes_distinct_keys() {
		let h = Xxh3Hasher;
		assert_ne!(h.hash_key(b"apple"), h.hash_key(b"banana"));
	}
}
