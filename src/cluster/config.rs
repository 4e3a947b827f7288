//! Cluster configuration (C6): the invariants every node must agree on
//! (`N`, `R`, `W`, `Q`, the hash module, storage knobs), loaded from a
//! local JSON file and reconciled with one visible peer at startup.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use ringcoord_util::{Error, NodeId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Deadline for the startup bootstrap peer call.
const GET_CONFIG_TIMEOUT: Duration = Duration::from_millis(1000);

/// `{n, r, w, q, storage_mod, blocksize, buffered_writes, directory}`.
/// `n`, `r`, `w`, `q`, `storage_mod`, `blocksize` and `buffered_writes` are
/// cluster invariants expected to be equal on every node; `directory` is
/// local to this process and is never overwritten by peer reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
	#[serde(default = "Config::default_n")]
	pub n: usize,
	#[serde(default = "Config::default_r")]
	pub r: usize,
	#[serde(default = "Config::default_w")]
	pub w: usize,
	#[serde(default = "Config::default_q")]
	pub q: usize,
	#[serde(default = "Config::default_storage_mod")]
	pub storage_mod: String,
	#[serde(default = "Config::default_blocksize")]
	pub blocksize: usize,
	#[serde(default)]
	pub buffered_writes: bool,
	#[serde(default = "Config::default_directory")]
	pub directory: PathBuf,
}

impl Config {
	fn default_n() -> usize {
		3
	}
	fn default_r() -> usize {
		2
	}
	fn default_w() -> usize {
		2
	}
	fn default_q() -> usize {
		64
	}
	fn default_storage_mod() -> String {
		"default".to_string()
	}
	fn default_blocksize() -> usize {
		1 << 20
	}
	fn default_directory() -> PathBuf {
		PathBuf::from("./data")
	}

	/// `1 <= r <= n` and `1 <= w <= n`. `r + w > n` is recommended but not
	/// enforced, violating it is a valid, weaker-consistency configuration,
	/// not an error.
	pub fn validate(&self) -> Result<(), Error> {
		if self.n == 0 {
			return Err(Error::invariant("n must be at least 1"));
		}
		if self.r == 0 || self.r > self.n {
			return Err(Error::invariant(format!(
				"r must satisfy 1 <= r <= n (r={}, n={})",
				self.r, self.n
			)));
		}
		if self.w == 0 || self.w > self.n {
			return Err(Error::invariant(format!(
				"w must satisfy 1 <= w <= n (w={}, n={})",
				self.w, self.n
			)));
		}
		if self.r + self.w <= self.n {
			warn!(
				r = self.r,
				w = self.w,
				n = self.n,
				"configured quorum does not guarantee read-after-write consistency (r + w <= n)"
			);
		}
		Ok(())
	}

	/// Reads the JSON configuration blob. Unknown fields are ignored
	/// (`serde_json`'s default behavior); absent fields take engine
	/// defaults; explicit `null` is accepted and treated the same as
	/// absent wherever the field type is itself optional.
	pub fn from_file(path: &std::path::Path) -> Result<Self, Error> {
		let bytes = std::fs::read(path)?;
		let config: Config = serde_json::from_slice(&bytes)?;
		config.validate()?;
		Ok(config)
	}

	/// Overwrites the cluster-invariant fields with `peer`'s values,
	/// preserving `directory`.
	fn adopt_cluster_invariants(&mut self, peer: &Config) {
		self.n = peer.n;
		self.r = peer.r;
		self.w = peer.w;
		self.q = peer.q;
		self.storage_mod = peer.storage_mod.clone();
		self.blocksize = peer.blocksize;
		self.buffered_writes = peer.buffered_writes;
	}
}

/// The (out of scope) RPC seam used to fetch a peer's configuration at
/// startup. A real implementation resolves `peer` to a connection and
/// enforces `GET_CONFIG_TIMEOUT`; tests use an in-memory fake.
#[async_trait]
pub trait ConfigPeer: Send + Sync {
	async fn get_config(&self, peer: &NodeId) -> Result<Config, Error>;
}

/// Reconciles `local` with one randomly chosen visible peer: if the call
/// succeeds within the deadline, the cluster-invariant fields are
/// overwritten with the peer's; otherwise (no peers, or the call fails or
/// times out) `local` is kept unchanged. Never fails the caller, since an
/// unreachable bootstrap peer is a recoverable condition, not a startup
/// error.
pub async fn reconcile_with_peer(
	local: Config,
	peer: Option<&NodeId>,
	transport: &dyn ConfigPeer,
) -> Config {
	let Some(peer) = peer else {
		info!("no peers visible at startup, keeping local configuration");
		return local;
	};

	match tokio::time::timeout(GET_CONFIG_TIMEOUT, transport.get_config(peer)).await {
		Ok(Ok(remote)) => {
			let mut merged = local;
			merged.adopt_cluster_invariants(&remote);
			info!(peer = %peer, "adopted cluster invariants from bootstrap peer");
			merged
		}
		Ok(Err(e)) => {
			warn!(peer = %peer, error = %e, "bootstrap peer configuration call failed, keeping local configuration");
			local
		}
		Err(_) => {
			warn!(peer = %peer, "bootstrap peer configuration call timed out, keeping local configuration");
			local
		}
	}
}
