//! Claim types
//!
//! A Claim is a request for a provisioned asset. It becomes eligible for
//! provisioning while it is unbound and names this controller's class.

use crate::{ClaimKey, Quantity};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A storage request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Namespaced identity
    pub key: ClaimKey,

    /// Unique id; a deleted and recreated claim gets a new one
    pub uid: Uuid,

    /// Bumped whenever the requested state is edited
    pub generation: u64,

    /// Provisioning class selector
    pub class_name: Option<String>,

    /// Requested capacity
    pub requested: Quantity,

    /// Requested access modes
    pub access_modes: Vec<AccessMode>,

    /// What happens to the volume once the claim goes away
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,

    /// Name of the volume bound to this claim, set by the binder
    pub volume_name: Option<String>,

    /// Created timestamp
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Claim {
    /// Create an unbound claim
    pub fn new(key: ClaimKey, class_name: impl Into<String>, requested: Quantity) -> Self {
        Self {
            key,
            uid: Uuid::new_v4(),
            generation: 1,
            class_name: Some(class_name.into()),
            requested,
            access_modes: vec![AccessMode::ReadWriteOnce],
            reclaim_policy: ReclaimPolicy::default(),
            volume_name: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn with_access_modes(mut self, modes: Vec<AccessMode>) -> Self {
        self.access_modes = modes;
        self
    }

    pub fn with_reclaim_policy(mut self, policy: ReclaimPolicy) -> Self {
        self.reclaim_policy = policy;
        self
    }

    pub fn is_bound(&self) -> bool {
        self.volume_name.is_some()
    }

    pub fn matches_class(&self, class_name: &str) -> bool {
        self.class_name.as_deref() == Some(class_name)
    }

    /// Deterministic volume name for this claim
    pub fn volume_name_for(&self) -> String {
        format!("pvc-{}", self.uid)
    }
}

/// Volume access modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
}

/// Reclaim policy for released volumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    /// Delete the backing asset once the volume is released
    #[default]
    Delete,

    /// Keep the asset; an operator cleans up
    Retain,
}

impl std::fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReclaimPolicy::Delete => write!(f, "Delete"),
            ReclaimPolicy::Retain => write!(f, "Retain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_claim_is_unbound() {
        let claim = Claim::new(ClaimKey::new("default", "c1"), "hostpath", Quantity::gibibytes(1));
        assert!(!claim.is_bound());
        assert!(claim.matches_class("hostpath"));
        assert!(!claim.matches_class("other"));
        assert_eq!(claim.reclaim_policy, ReclaimPolicy::Delete);
    }

    #[test]
    fn test_volume_name_is_stable() {
        let claim = Claim::new(ClaimKey::new("default", "c1"), "hostpath", Quantity::gibibytes(1));
        assert_eq!(claim.volume_name_for(), claim.volume_name_for());
        assert!(claim.volume_name_for().starts_with("pvc-"));
    }
}
