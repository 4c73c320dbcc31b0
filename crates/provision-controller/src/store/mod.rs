//! Cluster state store
//!
//! The store holds claims, volumes and the election lease, and publishes a
//! change feed. The control loop only depends on the traits; the in-memory
//! implementation backs tests and standalone runs.

mod memory;
mod traits;

pub use memory::InMemoryCluster;
pub use traits::{ChangeFeed, ClaimStore, ClusterEvent, ClusterStore, LeaseStore, VolumeStore};
