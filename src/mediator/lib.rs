//! Request mediation (C5): turns a single-key operation into an N-way
//! replica fanout, decides success by quorum, and reconciles concurrent
//! reads via the vector-clock causality already implemented by
//! `ringcoord_cluster`.

pub mod mediator;
pub mod storage;

pub use mediator::Mediator;
pub use storage::{ReplicaEndpoint, StorageEndpoint, StorageError, VersionedBytes};
