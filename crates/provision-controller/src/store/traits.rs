//! Store trait definitions

use crate::error::StoreResult;
use async_trait::async_trait;
use hostpath_types::{Claim, ClaimKey, Lease, Volume};
use tokio::sync::broadcast;

/// Combined store trait
pub trait ClusterStore: ClaimStore + VolumeStore + LeaseStore + ChangeFeed + Send + Sync {}

impl<T> ClusterStore for T where T: ClaimStore + VolumeStore + LeaseStore + ChangeFeed + Send + Sync
{}

/// Storage for claims
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Get a claim by key
    async fn get_claim(&self, key: &ClaimKey) -> StoreResult<Option<Claim>>;

    /// List all claims
    async fn list_claims(&self) -> StoreResult<Vec<Claim>>;

    /// Create or update a claim
    async fn upsert_claim(&self, claim: Claim) -> StoreResult<()>;

    /// Delete a claim by key
    async fn delete_claim(&self, key: &ClaimKey) -> StoreResult<bool>;
}

/// Storage for volumes
#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Get a volume by name
    async fn get_volume(&self, name: &str) -> StoreResult<Option<Volume>>;

    /// List all volumes
    async fn list_volumes(&self) -> StoreResult<Vec<Volume>>;

    /// Create a volume; fails with `AlreadyExists` if the name is taken
    async fn create_volume(&self, volume: Volume) -> StoreResult<()>;

    /// Replace an existing volume
    async fn update_volume(&self, volume: Volume) -> StoreResult<()>;

    /// Delete a volume by name
    async fn delete_volume(&self, name: &str) -> StoreResult<bool>;
}

/// Storage for election leases
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Get a lease by name
    async fn get_lease(&self, name: &str) -> StoreResult<Option<Lease>>;

    /// Create a lease; fails with `AlreadyExists` if present
    async fn create_lease(&self, lease: Lease) -> StoreResult<Lease>;

    /// Replace a lease if its stored version equals `expected_version`
    async fn update_lease(&self, lease: Lease, expected_version: u64) -> StoreResult<Lease>;
}

/// Change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    ClaimChanged(ClaimKey),
    ClaimDeleted(ClaimKey),
    VolumeChanged(String),
    VolumeDeleted(String),
}

/// Subscription to store changes.
///
/// Delivery is neither exactly-once nor complete; a lagged receiver means
/// events were lost and the consumer must relist.
pub trait ChangeFeed: Send + Sync {
    fn watch(&self) -> broadcast::Receiver<ClusterEvent>;
}
