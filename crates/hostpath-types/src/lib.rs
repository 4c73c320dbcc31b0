//! Hostpath Types - Core types for the dynamic provisioning control loop
//!
//! The provisioner watches for unsatisfied storage requests ([`Claim`]s),
//! creates backing assets through a pluggable backend and records the result
//! as a [`Volume`]. Replicas coordinate through a [`Lease`] so that only one
//! instance acts at a time.
//!
//! ## Key Concepts
//!
//! - **Claim**: a request for storage, eligible while unbound and matching
//!   the configured class
//! - **Volume**: the record of a provisioned asset, stamped with the
//!   identity of the instance that created it
//! - **Lease**: the distributed mutual-exclusion record for leader election
//! - **Events**: operator-visible outcomes of provisioning and deletion

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod claim;
pub mod events;
pub mod ids;
pub mod lease;
pub mod quantity;
pub mod volume;

pub use claim::{AccessMode, Claim, ReclaimPolicy};
pub use events::{ControllerEvent, ControllerEventEnvelope, EventSeverity};
pub use ids::{ClaimKey, ClaimKeyError};
pub use lease::Lease;
pub use quantity::{Quantity, QuantityError};
pub use volume::{
    AssetDescriptor, Volume, VolumePhase, PROVISIONED_BY_ANNOTATION, PROVISIONER_NAME,
    PROVISIONER_IDENTITY_ANNOTATION,
};

/// Serde adapter storing a `Duration` as whole milliseconds
pub mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
