//! Controller runtime
//!
//! Wires the change feed, periodic resync and worker pools around a
//! [`Reconciler`]. Workers only take work while this instance leads; a
//! newly acquired leadership triggers a full relist so nothing queued by a
//! previous leader is lost.

use crate::config::ControllerConfig;
use crate::election::{LeaderHandle, LeaderStatus};
use crate::error::{ControllerError, ControllerResult};
use crate::provisioner::Provisioner;
use crate::queue::WorkQueue;
use crate::reconciler::{Reconciler, SyncOutcome};
use crate::recorder::EventRecorder;
use crate::store::{ClusterEvent, ClusterStore};
use futures::future::join_all;
use hostpath_types::ClaimKey;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Leader-gated provisioning controller
pub struct ProvisionController {
    config: ControllerConfig,
    store: Arc<dyn ClusterStore>,
    reconciler: Arc<Reconciler>,
    claim_queue: Arc<WorkQueue<ClaimKey>>,
    volume_queue: Arc<WorkQueue<String>>,
    leader: LeaderHandle,
    recorder: EventRecorder,
}

impl ProvisionController {
    /// Create a controller. Fails if the configuration is invalid.
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn ClusterStore>,
        provisioner: Arc<dyn Provisioner>,
        leader: LeaderHandle,
        recorder: EventRecorder,
    ) -> ControllerResult<Arc<Self>> {
        config.validate()?;
        let reconciler = Arc::new(Reconciler::new(
            &config,
            store.clone(),
            provisioner,
            recorder.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            store,
            reconciler,
            claim_queue: Arc::new(WorkQueue::new()),
            volume_queue: Arc::new(WorkQueue::new()),
            leader,
            recorder,
        }))
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn claim_queue(&self) -> &Arc<WorkQueue<ClaimKey>> {
        &self.claim_queue
    }

    pub fn volume_queue(&self) -> &Arc<WorkQueue<String>> {
        &self.volume_queue
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    pub fn is_leading(&self) -> bool {
        self.leader.is_leading()
    }

    /// Run until `shutdown` fires (or its sender goes away).
    ///
    /// In-flight reconciles finish before this returns; queued work is
    /// dropped and recovered by the next leader's relist.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> ControllerResult<()> {
        info!(
            identity = %self.config.identity,
            class = %self.config.class_name,
            workers = self.config.workers,
            "Starting provision controller"
        );

        // Subscribe before the first relist so no change slips between them
        let feed = self.store.watch();
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(2 + 2 * self.config.workers);
        tasks.push(tokio::spawn(self.clone().intake(feed, shutdown.clone())));
        tasks.push(tokio::spawn(self.clone().resync_loop(shutdown.clone())));

        let retry_after_error = self.config.backoff.not_ready_delay;
        for _ in 0..self.config.workers {
            let reconciler = self.reconciler.clone();
            tasks.push(tokio::spawn(run_worker(
                self.claim_queue.clone(),
                self.leader.clone(),
                shutdown.clone(),
                retry_after_error,
                move |key: ClaimKey| {
                    let reconciler = reconciler.clone();
                    async move { reconciler.sync_claim(&key).await }
                },
            )));

            let reconciler = self.reconciler.clone();
            tasks.push(tokio::spawn(run_worker(
                self.volume_queue.clone(),
                self.leader.clone(),
                shutdown.clone(),
                retry_after_error,
                move |name: String| {
                    let reconciler = reconciler.clone();
                    async move { reconciler.sync_volume(&name).await }
                },
            )));
        }

        wait_for_shutdown(&mut shutdown).await;
        info!("Shutting down provision controller");
        self.claim_queue.shut_down();
        self.volume_queue.shut_down();

        let panicked = join_all(tasks)
            .await
            .into_iter()
            .filter_map(Result::err)
            .inspect(|e| error!(error = %e, "Controller task panicked"))
            .count();

        info!("Provision controller stopped");
        if panicked > 0 {
            return Err(ControllerError::Worker(format!(
                "{} controller task(s) panicked",
                panicked
            )));
        }
        Ok(())
    }

    /// Queue every eligible claim and volume. Does nothing while following.
    ///
    /// Returns the number of keys queued.
    pub async fn resync(&self) -> ControllerResult<usize> {
        if !self.leader.is_leading() {
            return Ok(0);
        }

        let mut queued = 0;
        for claim in self.store.list_claims().await? {
            if self.reconciler.wants_claim(&claim) {
                self.claim_queue.add(claim.key);
                queued += 1;
            }
        }
        for volume in self.store.list_volumes().await? {
            if self.reconciler.wants_volume(&volume) {
                self.volume_queue.add(volume.name);
                queued += 1;
            }
        }

        debug!(queued, "Resync complete");
        Ok(queued)
    }

    fn handle_event(&self, event: ClusterEvent) {
        match event {
            ClusterEvent::ClaimDeleted(key) => self.reconciler.forget_claim(&key),
            ClusterEvent::VolumeDeleted(name) => self.reconciler.forget_volume(&name),
            ClusterEvent::ClaimChanged(key) if self.leader.is_leading() => {
                self.claim_queue.add(key)
            }
            ClusterEvent::VolumeChanged(name) if self.leader.is_leading() => {
                self.volume_queue.add(name)
            }
            _ => {}
        }
    }

    async fn relist(&self) {
        if let Err(e) = self.resync().await {
            warn!(error = %e, "Resync failed");
        }
    }

    async fn intake(
        self: Arc<Self>,
        mut feed: broadcast::Receiver<ClusterEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let received = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => return,
                received = feed.recv() => received,
            };

            match received {
                Ok(event) => self.handle_event(event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Change feed lagged, relisting");
                    self.relist().await;
                }
                Err(RecvError::Closed) => {
                    warn!("Change feed closed, resubscribing");
                    if crate::election::wait_or_shutdown(
                        self.config.backoff.not_ready_delay,
                        &mut shutdown,
                    )
                    .await
                    {
                        return;
                    }
                    feed = self.store.watch();
                    self.relist().await;
                }
            }
        }
    }

    async fn resync_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut leader = self.leader.clone();
        let mut watching_leader = true;
        let mut ticker = tokio::time::interval(self.config.resync_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => return,
                _ = ticker.tick() => self.relist().await,
                status = leader.changed(), if watching_leader => match status {
                    Some(LeaderStatus::Leading) => {
                        info!("Leadership acquired, relisting");
                        self.relist().await;
                    }
                    Some(LeaderStatus::Following) => {}
                    None => watching_leader = false,
                },
            }
        }
    }
}

impl fmt::Debug for ProvisionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionController")
            .field("identity", &self.config.identity)
            .field("leading", &self.leader.is_leading())
            .field("claims_queued", &self.claim_queue.len())
            .field("volumes_queued", &self.volume_queue.len())
            .finish()
    }
}

/// Pull keys from `queue` and reconcile them until the queue shuts down
async fn run_worker<K, F, Fut>(
    queue: Arc<WorkQueue<K>>,
    mut leader: LeaderHandle,
    mut shutdown: watch::Receiver<bool>,
    retry_after_error: Duration,
    sync: F,
) where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = ControllerResult<SyncOutcome>>,
{
    loop {
        if !leader.is_leading() {
            tokio::select! {
                leading = leader.wait_until_leading() => {
                    if !leading {
                        // Status source is gone; leadership never arrives
                        wait_for_shutdown(&mut shutdown).await;
                        return;
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => return,
            }
        }

        let Some(key) = queue.get().await else {
            return;
        };

        // Demoted while blocked on the queue
        if !leader.is_leading() {
            debug!(key = %key, "Dropping work item while following");
            queue.done(&key);
            continue;
        }

        match sync(key.clone()).await {
            Ok(SyncOutcome::Requeue(delay)) => queue.add_after(key.clone(), delay),
            Ok(_) => queue.forget(&key),
            Err(e) => {
                warn!(key = %key, error = %e, "Reconcile failed, requeueing");
                queue.add_after(key.clone(), retry_after_error);
            }
        }
        queue.done(&key);
    }
}

/// Resolve once shutdown is requested or its sender is dropped
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
