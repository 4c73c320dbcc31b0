//! Shared fixtures for controller integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use hostpath_types::{AssetDescriptor, Claim, ClaimKey, Lease, Quantity, Volume};
use provision_controller::{
    BackoffConfig, ChangeFeed, ClaimStore, ClusterEvent, ControllerConfig, ControllerResult,
    EventRecorder, InMemoryCluster, LeaderHandle, LeaseStore, ProvisionController,
    ProvisionError, ProvisionRequest, Provisioner, StoreResult, VolumeStore,
};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// How the backend answers provision calls for one claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Fail,
    NotReady,
}

/// Backend that records every call and answers from a per-claim script.
///
/// Successful provisions describe `/root/<claim name>`.
#[derive(Default)]
pub struct RecordingProvisioner {
    behaviours: Mutex<HashMap<String, Behaviour>>,
    provision_calls: Mutex<HashMap<String, usize>>,
    deleted: Mutex<Vec<PathBuf>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: AtomicUsize,
    delay: Mutex<Duration>,
}

impl RecordingProvisioner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_behaviour(&self, claim_name: &str, behaviour: Behaviour) {
        self.behaviours
            .lock()
            .unwrap()
            .insert(claim_name.to_string(), behaviour);
    }

    pub fn clear_behaviour(&self, claim_name: &str) {
        self.behaviours.lock().unwrap().remove(claim_name);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn provision_calls(&self, claim_name: &str) -> usize {
        self.provision_calls
            .lock()
            .unwrap()
            .get(claim_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_provision_calls(&self) -> usize {
        self.provision_calls.lock().unwrap().values().sum()
    }

    pub fn deleted(&self) -> Vec<PathBuf> {
        self.deleted.lock().unwrap().clone()
    }

    /// Highest number of concurrent calls seen for any single key
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self, key: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(key.to_string()).or_insert(0);
        *count += 1;
        self.max_in_flight.fetch_max(*count, Ordering::SeqCst);
    }

    fn exit(&self, key: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(count) = in_flight.get_mut(key) {
            *count -= 1;
        }
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<AssetDescriptor, ProvisionError> {
        let name = request.claim.name.clone();
        *self
            .provision_calls
            .lock()
            .unwrap()
            .entry(name.clone())
            .or_insert(0) += 1;

        self.enter(&request.volume_name);
        self.pause().await;
        self.exit(&request.volume_name);

        let behaviour = self.behaviours.lock().unwrap().get(&name).copied();
        match behaviour {
            Some(Behaviour::Fail) => Err(ProvisionError::Backend("disk unavailable".into())),
            Some(Behaviour::NotReady) => Err(ProvisionError::NotReady("warming up".into())),
            None => Ok(AssetDescriptor::HostPath {
                path: PathBuf::from("/root").join(&name),
            }),
        }
    }

    async fn delete(&self, volume: &Volume) -> Result<(), ProvisionError> {
        self.enter(&volume.name);
        self.pause().await;
        self.exit(&volume.name);

        let AssetDescriptor::HostPath { path } = &volume.source;
        self.deleted.lock().unwrap().push(path.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// In-memory cluster whose first feed subscription is already closed
pub struct ClosedOnceFeed {
    pub inner: Arc<InMemoryCluster>,
    handed_out: AtomicBool,
}

impl ClosedOnceFeed {
    pub fn new(inner: Arc<InMemoryCluster>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            handed_out: AtomicBool::new(false),
        })
    }
}

impl ChangeFeed for ClosedOnceFeed {
    fn watch(&self) -> broadcast::Receiver<ClusterEvent> {
        if self.handed_out.swap(true, Ordering::SeqCst) {
            return self.inner.watch();
        }
        let (_tx, rx) = broadcast::channel(1);
        rx
    }
}

#[async_trait]
impl ClaimStore for ClosedOnceFeed {
    async fn get_claim(&self, key: &ClaimKey) -> StoreResult<Option<Claim>> {
        self.inner.get_claim(key).await
    }

    async fn list_claims(&self) -> StoreResult<Vec<Claim>> {
        self.inner.list_claims().await
    }

    async fn upsert_claim(&self, claim: Claim) -> StoreResult<()> {
        self.inner.upsert_claim(claim).await
    }

    async fn delete_claim(&self, key: &ClaimKey) -> StoreResult<bool> {
        self.inner.delete_claim(key).await
    }
}

#[async_trait]
impl VolumeStore for ClosedOnceFeed {
    async fn get_volume(&self, name: &str) -> StoreResult<Option<Volume>> {
        self.inner.get_volume(name).await
    }

    async fn list_volumes(&self) -> StoreResult<Vec<Volume>> {
        self.inner.list_volumes().await
    }

    async fn create_volume(&self, volume: Volume) -> StoreResult<()> {
        self.inner.create_volume(volume).await
    }

    async fn update_volume(&self, volume: Volume) -> StoreResult<()> {
        self.inner.update_volume(volume).await
    }

    async fn delete_volume(&self, name: &str) -> StoreResult<bool> {
        self.inner.delete_volume(name).await
    }
}

#[async_trait]
impl LeaseStore for ClosedOnceFeed {
    async fn get_lease(&self, name: &str) -> StoreResult<Option<Lease>> {
        self.inner.get_lease(name).await
    }

    async fn create_lease(&self, lease: Lease) -> StoreResult<Lease> {
        self.inner.create_lease(lease).await
    }

    async fn update_lease(&self, lease: Lease, expected_version: u64) -> StoreResult<Lease> {
        self.inner.update_lease(lease, expected_version).await
    }
}

// ---------------------------------------------------------------------------
// Controller harness
// ---------------------------------------------------------------------------

/// Configuration with millisecond-scale timings
pub fn fast_config(identity: &str) -> ControllerConfig {
    let mut config = ControllerConfig::for_identity(identity);
    config.resync_period = Duration::from_millis(50);
    config.workers = 4;
    config.backoff = BackoffConfig {
        retry_delay: Duration::from_millis(10),
        not_ready_delay: Duration::from_millis(10),
        ..BackoffConfig::default()
    };
    config
}

pub fn claim(name: &str) -> Claim {
    Claim::new(ClaimKey::new("default", name), "hostpath", Quantity::gibibytes(1))
}

/// A controller running on a background task
pub struct Harness {
    pub controller: Arc<ProvisionController>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<ControllerResult<()>>,
}

impl Harness {
    pub fn start<S>(
        config: ControllerConfig,
        store: Arc<S>,
        backend: Arc<RecordingProvisioner>,
        leader: LeaderHandle,
    ) -> Self
    where
        S: provision_controller::ClusterStore + 'static,
    {
        let recorder = EventRecorder::new(config.identity.clone());
        let controller = ProvisionController::new(config, store, backend, leader, recorder)
            .expect("valid config");
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(controller.clone().run(rx));
        Self {
            controller,
            shutdown,
            task,
        }
    }

    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("controller stops")
            .expect("controller task")
            .expect("controller result");
    }
}

/// Poll `check` until it holds, panicking after five seconds
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
