//! Provisioner capability interface
//!
//! Backends are called from worker tasks, never from event intake, so a slow
//! backend cannot stall the change feed.
//!
//! Delivery is at-least-once. Implementations must make `provision`
//! idempotent for the same request (create-if-absent) and must treat an
//! already-absent asset as a successful `delete`.

use crate::error::ProvisionError;
use async_trait::async_trait;
use hostpath_types::{AccessMode, AssetDescriptor, Claim, ClaimKey, Quantity, ReclaimPolicy, Volume};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Everything a backend needs to create one asset
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    /// Name the resulting volume will carry
    pub volume_name: String,

    /// Claim being satisfied
    pub claim: ClaimKey,

    /// Uid of the claim being satisfied
    pub claim_uid: Uuid,

    pub capacity: Quantity,

    pub access_modes: Vec<AccessMode>,

    pub reclaim_policy: ReclaimPolicy,

    /// Backend-selection parameters from the class
    pub parameters: BTreeMap<String, String>,
}

impl ProvisionRequest {
    /// Build a request for `claim`
    pub fn for_claim(claim: &Claim, parameters: BTreeMap<String, String>) -> Self {
        Self {
            volume_name: claim.volume_name_for(),
            claim: claim.key.clone(),
            claim_uid: claim.uid,
            capacity: claim.requested,
            access_modes: claim.access_modes.clone(),
            reclaim_policy: claim.reclaim_policy,
            parameters,
        }
    }
}

/// A provisioning backend
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the asset for `request` and describe where it lives
    async fn provision(&self, request: &ProvisionRequest) -> Result<AssetDescriptor, ProvisionError>;

    /// Tear down the asset behind `volume`
    async fn delete(&self, volume: &Volume) -> Result<(), ProvisionError>;
}
