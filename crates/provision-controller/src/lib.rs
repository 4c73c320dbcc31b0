//! Provision Controller - leader-elected dynamic provisioning loop
//!
//! This crate watches a [`ClusterStore`] for unbound claims and released
//! volumes and drives them through a pluggable [`Provisioner`]:
//!
//! - **Election**: replicas contend for a lease; only the leader acts
//! - **Queueing**: per-key deduplicated work queues, never concurrent per key
//! - **Reconciling**: provision eligible claims, reclaim released volumes
//! - **Retrying**: per-key failure counts with parking at a threshold
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(InMemoryCluster::new());
//! let elector = LeaderElector::new(config.election.clone(), config.lease_name(), identity, store.clone());
//! let controller = ProvisionController::new(config, store, backend, elector.handle(), recorder)?;
//!
//! tokio::spawn(elector.run(shutdown.clone()));
//! controller.run(shutdown).await?;
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod controller;
pub mod election;
pub mod error;
pub mod provisioner;
pub mod queue;
pub mod reconciler;
pub mod recorder;
pub mod retry;
pub mod store;

pub use config::{BackoffConfig, BackoffMode, ControllerConfig, ElectionConfig};
pub use controller::ProvisionController;
pub use election::{LeaderElector, LeaderHandle, LeaderStatus, LeaderSwitch};
pub use error::{
    ConfigError, ControllerError, ControllerResult, ProvisionError, StoreError, StoreResult,
};
pub use provisioner::{ProvisionRequest, Provisioner};
pub use queue::WorkQueue;
pub use reconciler::{Reconciler, SkipReason, SyncOutcome};
pub use recorder::EventRecorder;
pub use retry::{FailureRecord, RetryTracker};
pub use store::{
    ChangeFeed, ClaimStore, ClusterEvent, ClusterStore, InMemoryCluster, LeaseStore, VolumeStore,
};
