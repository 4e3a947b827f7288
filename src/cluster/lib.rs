//! Cluster membership, partition map and gossip convergence: the C1-C4/C6
//! components of the coordination core.

pub mod config;
pub mod gossip;
pub mod membership;
pub mod partition_map;
pub mod vector_clock;

pub use config::{Config, ConfigPeer};
pub use gossip::{GossipTransport, Gossiper};
pub use membership::{MembershipActor, MembershipState, PartitionScope};
pub use partition_map::PartitionMap;
pub use vector_clock::{Ordering as ClockOrdering, VectorClock};
