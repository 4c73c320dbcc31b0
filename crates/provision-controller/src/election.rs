//! Lease-based leader election
//!
//! Replicas contend for a single [`Lease`] record. The holder renews it every
//! retry period; a lost race demotes immediately, and transient write errors
//! or a renewal that stalls demote once the renew deadline passes. A
//! holder voluntarily releases the lease once its term limit elapses.
//!
//! Only the lease record is externally visible. The elector never exits on
//! its own; it demotes and contends again.

use crate::config::ElectionConfig;
use crate::error::{StoreError, StoreResult};
use crate::recorder::EventRecorder;
use crate::store::LeaseStore;
use chrono::Utc;
use hostpath_types::{ControllerEvent, Lease};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Leadership state of this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderStatus {
    Following,
    Leading,
}

/// Read side of the leadership state, cloned into every worker
#[derive(Debug, Clone)]
pub struct LeaderHandle {
    rx: watch::Receiver<LeaderStatus>,
}

impl LeaderHandle {
    fn from_receiver(rx: watch::Receiver<LeaderStatus>) -> Self {
        Self { rx }
    }

    /// A handle that is always leading, for single-replica deployments
    pub fn standalone() -> Self {
        let (_tx, rx) = watch::channel(LeaderStatus::Leading);
        Self::from_receiver(rx)
    }

    /// A handle driven by the returned switch
    pub fn manual(initial: LeaderStatus) -> (LeaderSwitch, Self) {
        let (tx, rx) = watch::channel(initial);
        (LeaderSwitch { tx }, Self::from_receiver(rx))
    }

    pub fn status(&self) -> LeaderStatus {
        *self.rx.borrow()
    }

    pub fn is_leading(&self) -> bool {
        self.status() == LeaderStatus::Leading
    }

    /// Wait for the next status transition.
    ///
    /// Returns `None` when the status source has gone away.
    pub async fn changed(&mut self) -> Option<LeaderStatus> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Wait until leading. Returns `false` if leadership can never arrive
    /// because the status source has gone away.
    pub async fn wait_until_leading(&mut self) -> bool {
        self.rx
            .wait_for(|status| *status == LeaderStatus::Leading)
            .await
            .is_ok()
    }
}

/// Write side of a manual [`LeaderHandle`]
#[derive(Debug)]
pub struct LeaderSwitch {
    tx: watch::Sender<LeaderStatus>,
}

impl LeaderSwitch {
    pub fn set(&self, status: LeaderStatus) {
        self.tx.send_replace(status);
    }
}

/// How a leadership term ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TermEnd {
    Shutdown,
    TermLimit,
    LostRace,
    RenewDeadline,
}

/// Contends for and renews the election lease
pub struct LeaderElector {
    config: ElectionConfig,
    lease_name: String,
    identity: String,
    store: Arc<dyn LeaseStore>,
    status_tx: watch::Sender<LeaderStatus>,
    recorder: Option<EventRecorder>,
}

impl LeaderElector {
    pub fn new(
        config: ElectionConfig,
        lease_name: impl Into<String>,
        identity: impl Into<String>,
        store: Arc<dyn LeaseStore>,
    ) -> Self {
        let (status_tx, _) = watch::channel(LeaderStatus::Following);
        Self {
            config,
            lease_name: lease_name.into(),
            identity: identity.into(),
            store,
            status_tx,
            recorder: None,
        }
    }

    /// Report leadership transitions through `recorder`
    pub fn with_recorder(mut self, recorder: EventRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Subscribe to leadership transitions
    pub fn handle(&self) -> LeaderHandle {
        LeaderHandle::from_receiver(self.status_tx.subscribe())
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Take or renew the lease once.
    ///
    /// `Ok(false)` means another instance holds a valid lease or won a race
    /// for it.
    pub async fn try_acquire_or_renew(&self) -> StoreResult<bool> {
        let now = Utc::now();
        let result = match self.store.get_lease(&self.lease_name).await? {
            None => {
                let lease = Lease::acquired(
                    self.lease_name.clone(),
                    self.identity.clone(),
                    self.config.lease_duration,
                    now,
                );
                self.store.create_lease(lease).await
            }
            Some(current) => {
                if !current.can_acquire(&self.identity, now) {
                    debug!(
                        lease = %self.lease_name,
                        holder = ?current.holder,
                        "Lease held by another instance"
                    );
                    return Ok(false);
                }

                let mut next = current.clone();
                if !current.is_held_by(&self.identity) {
                    next.holder = Some(self.identity.clone());
                    next.acquired_at = now;
                    next.transitions = current.transitions.saturating_add(1);
                }
                next.renewed_at = now;
                next.lease_duration = self.config.lease_duration;
                self.store.update_lease(next, current.version).await
            }
        };

        match result {
            Ok(_) => Ok(true),
            Err(StoreError::Conflict(_)) | Err(StoreError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Give up the lease if this instance holds it
    pub async fn release(&self) -> StoreResult<()> {
        let Some(current) = self.store.get_lease(&self.lease_name).await? else {
            return Ok(());
        };
        if !current.is_held_by(&self.identity) {
            return Ok(());
        }

        let mut next = current.clone();
        next.holder = None;
        next.renewed_at = Utc::now();
        match self.store.update_lease(next, current.version).await {
            Ok(_) | Err(StoreError::Conflict(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Run until `shutdown` fires
    #[instrument(skip_all, fields(identity = %self.identity, lease = %self.lease_name))]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting leader election");

        loop {
            if !self.acquire(&mut shutdown).await {
                break;
            }

            self.set_status(LeaderStatus::Leading);
            let end = self.hold(&mut shutdown).await;
            self.set_status(LeaderStatus::Following);

            if matches!(end, TermEnd::Shutdown | TermEnd::TermLimit) {
                match tokio::time::timeout(self.config.renew_deadline, self.release()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "Failed to release lease"),
                    Err(_) => warn!("Lease release did not complete in time"),
                }
            }

            match end {
                TermEnd::Shutdown => break,
                TermEnd::TermLimit => info!("Term limit reached, rotating leadership"),
                TermEnd::LostRace => warn!("Lease taken by another instance"),
                TermEnd::RenewDeadline => warn!("Failed to renew lease before deadline"),
            }

            // Give the other replicas a chance at the lease
            if wait_or_shutdown(self.config.retry_period, &mut shutdown).await {
                break;
            }
        }

        info!("Leader election stopped");
    }

    /// Contend until leading; `false` on shutdown
    async fn acquire(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            if *shutdown.borrow() {
                return false;
            }
            let attempt =
                tokio::time::timeout(self.config.renew_deadline, self.try_acquire_or_renew());
            match attempt.await {
                Ok(Ok(true)) => return true,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to acquire lease"),
                Err(_) => warn!("Lease acquisition did not complete in time"),
            }
            if wait_or_shutdown(self.config.retry_period, shutdown).await {
                return false;
            }
        }
    }

    /// Renew until the term ends
    async fn hold(&self, shutdown: &mut watch::Receiver<bool>) -> TermEnd {
        let term_started = Instant::now();
        let mut last_renewal = Instant::now();

        loop {
            if wait_or_shutdown(self.config.retry_period, shutdown).await {
                return TermEnd::Shutdown;
            }
            if !self.config.term_limit.is_zero() && term_started.elapsed() >= self.config.term_limit
            {
                return TermEnd::TermLimit;
            }

            let remaining = self
                .config
                .renew_deadline
                .saturating_sub(last_renewal.elapsed());
            if remaining.is_zero() {
                return TermEnd::RenewDeadline;
            }
            let attempt = tokio::time::timeout(remaining, self.try_acquire_or_renew()).await;
            let Ok(attempt) = attempt else {
                warn!(?remaining, "Lease renewal did not complete in time");
                return TermEnd::RenewDeadline;
            };

            match attempt {
                Ok(true) => last_renewal = Instant::now(),
                Ok(false) => return TermEnd::LostRace,
                Err(e) => {
                    // The next attempt would land past the deadline
                    if last_renewal.elapsed() + self.config.retry_period
                        >= self.config.renew_deadline
                    {
                        return TermEnd::RenewDeadline;
                    }
                    warn!(error = %e, "Failed to renew lease, retrying");
                }
            }
        }
    }

    fn set_status(&self, status: LeaderStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous == status {
            return;
        }

        let event = match status {
            LeaderStatus::Leading => {
                info!("Became leader");
                ControllerEvent::LeadershipAcquired {
                    lease: self.lease_name.clone(),
                }
            }
            LeaderStatus::Following => {
                info!("Stopped leading");
                ControllerEvent::LeadershipLost {
                    lease: self.lease_name.clone(),
                }
            }
        };
        if let Some(recorder) = &self.recorder {
            recorder.record(event);
        }
    }
}

/// Sleep for `period`; `true` if shutdown fired first
pub(crate) async fn wait_or_shutdown(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(period) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
