//! Daemon lifecycle: startup checks, election, controller, shutdown

use crate::backend::HostPathProvisioner;
use crate::config::DaemonConfig;
use crate::error::{DaemonError, DaemonResult};
use provision_controller::{
    ClaimStore, ControllerResult, EventRecorder, InMemoryCluster, LeaderElector, LeaderHandle,
    ProvisionController,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The provisioner daemon
pub struct Daemon {
    config: DaemonConfig,
    store: Arc<InMemoryCluster>,
    backend: Arc<HostPathProvisioner>,
    recorder: EventRecorder,
}

impl Daemon {
    /// Validate configuration and run startup checks
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let config = config.finalize()?;
        let store = Arc::new(InMemoryCluster::new());

        for seed in config.claims.iter().cloned() {
            let claim = seed.into_claim(&config.controller.class_name);
            tracing::info!(claim = %claim.key, size = %claim.requested, "Registering claim");
            store.upsert_claim(claim).await?;
        }

        // The store must be reachable before any loop starts
        store.list_claims().await?;

        let backend = Arc::new(HostPathProvisioner::new(
            config.node_name.clone(),
            config.root.clone(),
        ));
        if let Err(e) = backend.probe_root().await {
            tracing::warn!(
                root = %config.root.display(),
                error = %e,
                "Volume root is not writable; provisioning will fail until it is"
            );
        }

        let recorder = EventRecorder::new(config.node_name.clone());
        Ok(Self {
            config,
            store,
            backend,
            recorder,
        })
    }

    pub fn store(&self) -> &Arc<InMemoryCluster> {
        &self.store
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` resolves
    pub async fn run_until<F>(self, signal: F) -> DaemonResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller_config = self.config.controller.clone();

        let (leader, elector_task) = if controller_config.election.enabled {
            let elector = LeaderElector::new(
                controller_config.election.clone(),
                controller_config.lease_name(),
                self.config.node_name.clone(),
                self.store.clone(),
            )
            .with_recorder(self.recorder.clone());
            let handle = elector.handle();
            let task = tokio::spawn(elector.run(shutdown_rx.clone()));
            (handle, Some(task))
        } else {
            tracing::info!("Leader election disabled, acting as sole leader");
            (LeaderHandle::standalone(), None)
        };

        let controller = ProvisionController::new(
            controller_config,
            self.store.clone(),
            self.backend.clone(),
            leader,
            self.recorder.clone(),
        )?;
        let mut controller_task = tokio::spawn(controller.run(shutdown_rx));

        tracing::info!(
            node = %self.config.node_name,
            root = %self.config.root.display(),
            "Hostpath provisioner running"
        );

        let early_exit = tokio::select! {
            _ = signal => None,
            result = &mut controller_task => Some(result),
        };
        shutdown_tx.send_replace(true);

        let result = match early_exit {
            Some(result) => result,
            None => controller_task.await,
        };
        if let Some(task) = elector_task {
            join(task).await?;
        }

        tracing::info!("Hostpath provisioner shutting down");
        flatten(result)
    }
}

fn flatten(
    result: Result<ControllerResult<()>, tokio::task::JoinError>,
) -> DaemonResult<()> {
    result
        .map_err(|e| DaemonError::Runtime(format!("controller task failed: {}", e)))?
        .map_err(DaemonError::from)
}

async fn join(task: JoinHandle<()>) -> DaemonResult<()> {
    task.await
        .map_err(|e| DaemonError::Runtime(format!("election task failed: {}", e)))
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
