//! Volume types
//!
//! A Volume records a provisioned asset. Its ownership annotation names the
//! controller instance that created it and gates deletion authority.

use crate::{AccessMode, ClaimKey, Quantity, ReclaimPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Name of this provisioner
pub const PROVISIONER_NAME: &str = "hostpath.external-storage.incubator.kubernetes.io";

/// Annotation recording which instance created a volume
pub const PROVISIONER_IDENTITY_ANNOTATION: &str =
    "hostpath.external-storage.incubator.kubernetes.io/ID";

/// Annotation recording which provisioner created a volume
pub const PROVISIONED_BY_ANNOTATION: &str = "pv.kubernetes.io/provisioned-by";

/// A provisioned asset record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name, derived from the claim
    pub name: String,

    /// Provisioned capacity
    pub capacity: Quantity,

    /// Access modes
    pub access_modes: Vec<AccessMode>,

    /// Reclaim policy, copied from the claim
    pub reclaim_policy: ReclaimPolicy,

    /// Backend location
    pub source: AssetDescriptor,

    /// Claim this volume was provisioned for
    pub claim_ref: Option<ClaimKey>,

    /// Lifecycle phase
    pub phase: VolumePhase,

    /// Annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Created timestamp
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Volume {
    /// Identity of the instance that created this volume
    pub fn owner_identity(&self) -> Option<&str> {
        self.annotations
            .get(PROVISIONER_IDENTITY_ANNOTATION)
            .map(String::as_str)
    }

    /// Provisioner that created this volume
    pub fn provisioned_by(&self) -> Option<&str> {
        self.annotations
            .get(PROVISIONED_BY_ANNOTATION)
            .map(String::as_str)
    }

    pub fn is_released(&self) -> bool {
        self.phase == VolumePhase::Released
    }
}

/// Volume lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumePhase {
    /// Created but not yet available
    Pending,
    /// Available for binding
    Available,
    /// Bound to a claim
    Bound,
    /// Claim removed, awaiting reclaim
    Released,
    /// Reclaim failed
    Failed,
}

impl std::fmt::Display for VolumePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VolumePhase::Pending => "Pending",
            VolumePhase::Available => "Available",
            VolumePhase::Bound => "Bound",
            VolumePhase::Released => "Released",
            VolumePhase::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Backend-specific location of an asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AssetDescriptor {
    /// A directory on the node
    HostPath { path: PathBuf },
}

impl std::fmt::Display for AssetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetDescriptor::HostPath { path } => write!(f, "hostPath:{}", path.display()),
        }
    }
}
