//! Per-claim and per-volume reconciliation
//!
//! Claims move `Eligible -> Provisioning -> Bound`; released volumes move
//! `Deleting -> Gone`. Failures are counted by a [`RetryTracker`] and parked
//! once the threshold is reached. Backend "not ready" signals and ownership
//! mismatches never count against the failure budget.

use crate::config::ControllerConfig;
use crate::error::{ControllerResult, ProvisionError, StoreError};
use crate::provisioner::{ProvisionRequest, Provisioner};
use crate::recorder::EventRecorder;
use crate::retry::{FailureRecord, RetryTracker};
use crate::store::ClusterStore;
use hostpath_types::{
    AssetDescriptor, Claim, ClaimKey, ControllerEvent, ReclaimPolicy, Volume, VolumePhase,
    PROVISIONED_BY_ANNOTATION, PROVISIONER_IDENTITY_ANNOTATION,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Volumes carry no generation; parking is cleared through the phase instead
const VOLUME_GENERATION: u64 = 0;

/// Result of one reconcile pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Work completed
    Done,
    /// Nothing to do
    Skipped(SkipReason),
    /// Try again after the delay
    Requeue(Duration),
    /// Failure threshold reached; no automatic retry
    Parked,
}

/// Why a reconcile pass did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    AlreadyBound,
    ClassMismatch,
    Parked,
    AlreadyProvisioned,
    NotReleased,
    Retained,
    ForeignProvisioner,
    NotOwner,
    Ignored,
}

/// Drives claims and volumes towards their desired state
pub struct Reconciler {
    identity: String,
    provisioner_name: String,
    class_name: String,
    parameters: BTreeMap<String, String>,
    backend_timeout: Option<Duration>,
    not_ready_delay: Duration,
    store: Arc<dyn ClusterStore>,
    provisioner: Arc<dyn Provisioner>,
    claim_failures: RetryTracker<ClaimKey>,
    volume_failures: RetryTracker<String>,
    recorder: EventRecorder,
}

impl Reconciler {
    pub fn new(
        config: &ControllerConfig,
        store: Arc<dyn ClusterStore>,
        provisioner: Arc<dyn Provisioner>,
        recorder: EventRecorder,
    ) -> Self {
        Self {
            identity: config.identity.clone(),
            provisioner_name: config.provisioner_name.clone(),
            class_name: config.class_name.clone(),
            parameters: config.parameters.clone(),
            backend_timeout: config.backend_timeout(),
            not_ready_delay: config.backoff.not_ready_delay,
            store,
            provisioner,
            claim_failures: RetryTracker::new(config.backoff.clone()),
            volume_failures: RetryTracker::new(config.backoff.clone()),
            recorder,
        }
    }

    pub fn claim_failures(&self) -> &RetryTracker<ClaimKey> {
        &self.claim_failures
    }

    pub fn volume_failures(&self) -> &RetryTracker<String> {
        &self.volume_failures
    }

    /// Drop failure state for a claim that no longer exists
    pub fn forget_claim(&self, key: &ClaimKey) {
        self.claim_failures.record_success(key);
    }

    /// Drop failure state for a volume that no longer exists
    pub fn forget_volume(&self, name: &str) {
        self.volume_failures.record_success(&name.to_string());
    }

    /// Cheap pre-check used by intake and resync
    pub fn wants_claim(&self, claim: &Claim) -> bool {
        !claim.is_bound() && claim.matches_class(&self.class_name)
    }

    /// Cheap pre-check used by intake and resync
    pub fn wants_volume(&self, volume: &Volume) -> bool {
        volume.is_released()
            && volume.reclaim_policy == ReclaimPolicy::Delete
            && volume.provisioned_by() == Some(self.provisioner_name.as_str())
    }

    /// Reconcile one claim
    #[instrument(skip_all, fields(claim = %key))]
    pub async fn sync_claim(&self, key: &ClaimKey) -> ControllerResult<SyncOutcome> {
        let Some(claim) = self.store.get_claim(key).await? else {
            self.claim_failures.record_success(key);
            return Ok(SyncOutcome::Skipped(SkipReason::NotFound));
        };

        if claim.is_bound() {
            self.claim_failures.record_success(key);
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyBound));
        }
        if !claim.matches_class(&self.class_name) {
            return Ok(SyncOutcome::Skipped(SkipReason::ClassMismatch));
        }
        if self.claim_failures.is_parked(key, claim.generation) {
            debug!("Claim is parked after repeated failures");
            return Ok(SyncOutcome::Skipped(SkipReason::Parked));
        }

        let request = ProvisionRequest::for_claim(&claim, self.parameters.clone());
        if self.store.get_volume(&request.volume_name).await?.is_some() {
            debug!(volume = %request.volume_name, "Volume already provisioned");
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyProvisioned));
        }

        info!(volume = %request.volume_name, capacity = %request.capacity, "Provisioning volume");
        let provisioned = self
            .call_backend(self.provisioner.provision(&request))
            .await;

        let descriptor = match provisioned {
            Ok(descriptor) => descriptor,
            Err(ProvisionError::NotReady(reason)) => {
                debug!(reason = %reason, "Backend not ready");
                self.recorder.record(ControllerEvent::ProvisioningNotReady {
                    claim: key.clone(),
                    reason,
                });
                return Ok(SyncOutcome::Requeue(self.not_ready_delay));
            }
            Err(ProvisionError::Ignored { reason }) => {
                info!(reason = %reason, "Backend declined claim");
                return Ok(SyncOutcome::Skipped(SkipReason::Ignored));
            }
            Err(e) => return Ok(self.claim_failed(&claim, e.to_string())),
        };

        let volume = self.build_volume(&claim, &request, descriptor);
        match self.store.create_volume(volume).await {
            Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => {
                return Ok(self.claim_failed(&claim, format!("failed to save volume: {}", e)));
            }
        }

        self.claim_failures.record_success(key);
        info!(volume = %request.volume_name, "Volume provisioned");
        self.recorder.record(ControllerEvent::ProvisioningSucceeded {
            claim: key.clone(),
            volume: request.volume_name,
        });
        Ok(SyncOutcome::Done)
    }

    /// Reconcile one volume
    #[instrument(skip_all, fields(volume = %name))]
    pub async fn sync_volume(&self, name: &str) -> ControllerResult<SyncOutcome> {
        let key = name.to_string();
        let Some(volume) = self.store.get_volume(name).await? else {
            self.volume_failures.record_success(&key);
            return Ok(SyncOutcome::Skipped(SkipReason::NotFound));
        };

        if !volume.is_released() {
            return Ok(SyncOutcome::Skipped(SkipReason::NotReleased));
        }
        if volume.reclaim_policy != ReclaimPolicy::Delete {
            return Ok(SyncOutcome::Skipped(SkipReason::Retained));
        }
        if volume.provisioned_by() != Some(self.provisioner_name.as_str()) {
            return Ok(SyncOutcome::Skipped(SkipReason::ForeignProvisioner));
        }
        if let Some(owner) = volume.owner_identity() {
            if owner != self.identity {
                return Ok(self.not_owner(
                    name,
                    format!("volume owned by {}, not {}", owner, self.identity),
                ));
            }
        }
        if self.volume_failures.is_parked(&key, VOLUME_GENERATION) {
            if let Some(failure) = self.volume_failures.record(&key) {
                return self
                    .park_volume(volume, failure, "retry budget exhausted".into())
                    .await;
            }
        }

        info!(source = %volume.source, "Deleting volume");
        match self.call_backend(self.provisioner.delete(&volume)).await {
            Ok(()) => {}
            Err(ProvisionError::Ignored { reason }) => return Ok(self.not_owner(name, reason)),
            Err(ProvisionError::NotReady(reason)) => {
                debug!(reason = %reason, "Backend not ready");
                return Ok(SyncOutcome::Requeue(self.not_ready_delay));
            }
            Err(e) => return self.volume_failed(volume, e.to_string()).await,
        }

        self.store.delete_volume(name).await?;
        self.volume_failures.record_success(&key);
        info!("Volume deleted");
        self.recorder.record(ControllerEvent::DeletionSucceeded {
            volume: key,
        });
        Ok(SyncOutcome::Done)
    }

    fn build_volume(
        &self,
        claim: &Claim,
        request: &ProvisionRequest,
        source: AssetDescriptor,
    ) -> Volume {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            PROVISIONER_IDENTITY_ANNOTATION.to_string(),
            self.identity.clone(),
        );
        annotations.insert(
            PROVISIONED_BY_ANNOTATION.to_string(),
            self.provisioner_name.clone(),
        );

        Volume {
            name: request.volume_name.clone(),
            capacity: claim.requested,
            access_modes: claim.access_modes.clone(),
            reclaim_policy: claim.reclaim_policy,
            source,
            claim_ref: Some(claim.key.clone()),
            phase: VolumePhase::Pending,
            annotations,
            created_at: chrono::Utc::now(),
        }
    }

    async fn call_backend<T, F>(&self, call: F) -> Result<T, ProvisionError>
    where
        F: Future<Output = Result<T, ProvisionError>>,
    {
        match self.backend_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(ProvisionError::Backend(format!(
                    "backend call timed out after {:?}",
                    limit
                )))
            }),
            None => call.await,
        }
    }

    fn claim_failed(&self, claim: &Claim, reason: String) -> SyncOutcome {
        let failure = self
            .claim_failures
            .record_failure(&claim.key, claim.generation);
        let attempts = failure.count;

        if self.claim_failures.is_exhausted(attempts) {
            warn!(attempt = attempts, reason = %reason, "Provisioning failed, giving up");
            self.recorder.record(ControllerEvent::ProvisioningParked {
                claim: claim.key.clone(),
                attempts,
                last_failure: failure.last_failure,
                reason,
            });
            return SyncOutcome::Parked;
        }

        let delay = self.claim_failures.next_delay(attempts);
        warn!(attempt = attempts, reason = %reason, retry_in = ?delay, "Provisioning failed");
        self.recorder.record(ControllerEvent::ProvisioningFailed {
            claim: claim.key.clone(),
            attempt: attempts,
            reason,
        });
        SyncOutcome::Requeue(delay)
    }

    async fn volume_failed(&self, volume: Volume, reason: String) -> ControllerResult<SyncOutcome> {
        let key = volume.name.clone();
        let failure = self.volume_failures.record_failure(&key, VOLUME_GENERATION);
        let attempts = failure.count;

        if !self.volume_failures.is_exhausted(attempts) {
            let delay = self.volume_failures.next_delay(attempts);
            warn!(attempt = attempts, reason = %reason, retry_in = ?delay, "Deletion failed");
            self.recorder.record(ControllerEvent::DeletionFailed {
                volume: key,
                attempt: attempts,
                reason,
            });
            return Ok(SyncOutcome::Requeue(delay));
        }

        warn!(attempt = attempts, reason = %reason, "Deletion failed, giving up");
        self.park_volume(volume, failure, reason).await
    }

    /// Move a volume to `Failed`. An operator releasing it again restarts
    /// the count.
    async fn park_volume(
        &self,
        mut volume: Volume,
        failure: FailureRecord,
        reason: String,
    ) -> ControllerResult<SyncOutcome> {
        let key = volume.name.clone();
        volume.phase = VolumePhase::Failed;
        self.store.update_volume(volume).await?;
        self.volume_failures.record_success(&key);
        self.recorder.record(ControllerEvent::DeletionParked {
            volume: key,
            attempts: failure.count,
            last_failure: failure.last_failure,
            reason,
        });
        Ok(SyncOutcome::Parked)
    }

    fn not_owner(&self, name: &str, reason: String) -> SyncOutcome {
        info!(reason = %reason, "Skipping deletion of volume owned elsewhere");
        self.recorder.record(ControllerEvent::DeletionSkipped {
            volume: name.to_string(),
            reason,
        });
        SyncOutcome::Skipped(SkipReason::NotOwner)
    }
}
