//! In-memory cluster store
//!
//! Besides storing records this store plays the external binder: creating a
//! volume whose claim reference names an unbound claim binds the two, and
//! deleting a claim releases the volume bound to it.

use super::traits::*;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use hostpath_types::{Claim, ClaimKey, Lease, Volume, VolumePhase};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const DEFAULT_FEED_CAPACITY: usize = 1024;

/// In-memory cluster state for development and testing
#[derive(Debug)]
pub struct InMemoryCluster {
    claims: Arc<RwLock<HashMap<ClaimKey, Claim>>>,
    volumes: Arc<RwLock<HashMap<String, Volume>>>,
    leases: Arc<RwLock<HashMap<String, Lease>>>,
    feed: broadcast::Sender<ClusterEvent>,
    lease_writes_failing: AtomicBool,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// Create an empty store
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Create a store whose change feed buffers at most `capacity` events
    /// per subscriber before it lags
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            claims: Arc::new(RwLock::new(HashMap::new())),
            volumes: Arc::new(RwLock::new(HashMap::new())),
            leases: Arc::new(RwLock::new(HashMap::new())),
            feed,
            lease_writes_failing: AtomicBool::new(false),
        }
    }

    /// Make lease writes fail with a connection error
    pub fn set_lease_writes_failing(&self, failing: bool) {
        self.lease_writes_failing.store(failing, Ordering::SeqCst);
    }

    fn publish(&self, event: ClusterEvent) {
        // No subscribers is fine
        let _ = self.feed.send(event);
    }

    fn check_lease_writes(&self) -> StoreResult<()> {
        if self.lease_writes_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("lease writes unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ClaimStore for InMemoryCluster {
    async fn get_claim(&self, key: &ClaimKey) -> StoreResult<Option<Claim>> {
        let claims = self.claims.read().await;
        Ok(claims.get(key).cloned())
    }

    async fn list_claims(&self) -> StoreResult<Vec<Claim>> {
        let claims = self.claims.read().await;
        Ok(claims.values().cloned().collect())
    }

    async fn upsert_claim(&self, claim: Claim) -> StoreResult<()> {
        let key = claim.key.clone();
        {
            let mut claims = self.claims.write().await;
            claims.insert(key.clone(), claim);
        }
        self.publish(ClusterEvent::ClaimChanged(key));
        Ok(())
    }

    async fn delete_claim(&self, key: &ClaimKey) -> StoreResult<bool> {
        let removed = {
            let mut claims = self.claims.write().await;
            claims.remove(key)
        };
        let Some(_) = removed else {
            return Ok(false);
        };
        self.publish(ClusterEvent::ClaimDeleted(key.clone()));

        let mut released = Vec::new();
        {
            let mut volumes = self.volumes.write().await;
            for volume in volumes.values_mut() {
                if volume.claim_ref.as_ref() == Some(key) && volume.phase != VolumePhase::Released
                {
                    volume.phase = VolumePhase::Released;
                    released.push(volume.name.clone());
                }
            }
        }
        for name in released {
            self.publish(ClusterEvent::VolumeChanged(name));
        }

        Ok(true)
    }
}

#[async_trait]
impl VolumeStore for InMemoryCluster {
    async fn get_volume(&self, name: &str) -> StoreResult<Option<Volume>> {
        let volumes = self.volumes.read().await;
        Ok(volumes.get(name).cloned())
    }

    async fn list_volumes(&self) -> StoreResult<Vec<Volume>> {
        let volumes = self.volumes.read().await;
        Ok(volumes.values().cloned().collect())
    }

    async fn create_volume(&self, mut volume: Volume) -> StoreResult<()> {
        let name = volume.name.clone();
        let mut bound_claim = None;
        {
            // Lock order: claims before volumes
            let mut claims = self.claims.write().await;
            let mut volumes = self.volumes.write().await;
            if volumes.contains_key(&name) {
                return Err(StoreError::AlreadyExists(format!("volume {}", name)));
            }

            volume.phase = match volume.claim_ref.as_ref() {
                Some(key) => match claims.get_mut(key) {
                    Some(claim) if !claim.is_bound() => {
                        claim.volume_name = Some(name.clone());
                        bound_claim = Some(key.clone());
                        VolumePhase::Bound
                    }
                    Some(claim) if claim.volume_name.as_deref() == Some(name.as_str()) => {
                        VolumePhase::Bound
                    }
                    Some(_) => VolumePhase::Available,
                    None => VolumePhase::Released,
                },
                None => VolumePhase::Available,
            };
            volumes.insert(name.clone(), volume);
        }

        self.publish(ClusterEvent::VolumeChanged(name));
        if let Some(key) = bound_claim {
            self.publish(ClusterEvent::ClaimChanged(key));
        }
        Ok(())
    }

    async fn update_volume(&self, volume: Volume) -> StoreResult<()> {
        let name = volume.name.clone();
        {
            let mut volumes = self.volumes.write().await;
            match volumes.get_mut(&name) {
                Some(existing) => *existing = volume,
                None => return Err(StoreError::NotFound(format!("volume {}", name))),
            }
        }
        self.publish(ClusterEvent::VolumeChanged(name));
        Ok(())
    }

    async fn delete_volume(&self, name: &str) -> StoreResult<bool> {
        let removed = {
            let mut volumes = self.volumes.write().await;
            volumes.remove(name).is_some()
        };
        if removed {
            self.publish(ClusterEvent::VolumeDeleted(name.to_string()));
        }
        Ok(removed)
    }
}

#[async_trait]
impl LeaseStore for InMemoryCluster {
    async fn get_lease(&self, name: &str) -> StoreResult<Option<Lease>> {
        let leases = self.leases.read().await;
        Ok(leases.get(name).cloned())
    }

    async fn create_lease(&self, mut lease: Lease) -> StoreResult<Lease> {
        self.check_lease_writes()?;
        let mut leases = self.leases.write().await;
        if leases.contains_key(&lease.name) {
            return Err(StoreError::AlreadyExists(format!("lease {}", lease.name)));
        }
        lease.version = 1;
        leases.insert(lease.name.clone(), lease.clone());
        Ok(lease)
    }

    async fn update_lease(&self, mut lease: Lease, expected_version: u64) -> StoreResult<Lease> {
        self.check_lease_writes()?;
        let mut leases = self.leases.write().await;
        let current = leases
            .get(&lease.name)
            .ok_or_else(|| StoreError::NotFound(format!("lease {}", lease.name)))?;
        if current.version != expected_version {
            return Err(StoreError::Conflict(format!(
                "lease {} version {} does not match expected {}",
                lease.name, current.version, expected_version
            )));
        }
        lease.version = expected_version + 1;
        leases.insert(lease.name.clone(), lease.clone());
        Ok(lease)
    }
}

impl ChangeFeed for InMemoryCluster {
    fn watch(&self) -> broadcast::Receiver<ClusterEvent> {
        self.feed.subscribe()
    }
}
