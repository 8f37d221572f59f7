//! Image reconciliation and container lifecycle monitoring.
//!
//! ```text
//!   Orchestrator::start()
//!         │
//!         ├──► ImageReconciler ──(every interval)──► RemoteCatalog::list_images
//!         │                                              │ diff
//!         │                                              ▼
//!         │                                          ImageStore
//!         │
//!   ContainerLifecycleManager
//!         │ create ──► RemoteCatalog::create_container ──► MonitorRegistry::schedule
//!         │                                                       │
//!         │                                                ContainerMonitor
//!         │                                         (fetch_state ─► ContainerStateUpdater)
//!         │
//!         └ delete ──► MonitorRegistry::cancel ──► MonitorTask::cancel ──► delete_container
//! ```
//!
//! Background tasks are tokio tasks driven by a fixed-delay sleep loop and a
//! [`CancellationToken`]. A tick is always awaited to completion before the
//! next sleep starts, so a task's ticks never overlap.

pub mod images;
pub mod lifecycle;
pub mod monitor;
pub mod registry;

pub use images::{ImageReconciler, ReconcileReport};
pub use lifecycle::ContainerLifecycleManager;
pub use monitor::{ContainerMonitor, MonitorTimings, TickOutcome};
pub use registry::{MonitorRegistry, MonitorSummary, MonitorTask, TaskContext};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::RemoteCatalog;
use crate::config::OrchestratorConfig;
use crate::error::{ConfigError, RemoteError};
use crate::store::{ApplicationRepository, ContainerStateUpdater, ImageStore};

/// Bound a remote call so a stalled endpoint cannot hold a task forever.
pub(crate) async fn remote_call<T, F>(
    operation: &str,
    timeout: Duration,
    call: F,
) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::timed_out(operation, timeout)),
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` on cancellation.
pub(crate) async fn wait_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Wires the catalog, collaborators, reconciler and lifecycle manager together.
pub struct Orchestrator {
    config: OrchestratorConfig,
    catalog: Arc<dyn RemoteCatalog>,
    images: Arc<dyn ImageStore>,
    registry: MonitorRegistry,
    lifecycle: ContainerLifecycleManager,
    shutdown: CancellationToken,
    reconciler: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Validate `config` and assemble the components. Nothing is scheduled yet.
    pub fn new(
        config: OrchestratorConfig,
        catalog: Arc<dyn RemoteCatalog>,
        images: Arc<dyn ImageStore>,
        applications: Arc<dyn ApplicationRepository>,
        updater: Arc<dyn ContainerStateUpdater>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let registry = MonitorRegistry::new();
        let lifecycle = ContainerLifecycleManager::new(
            Arc::clone(&catalog),
            registry.clone(),
            applications,
            updater,
            MonitorTimings::from_config(&config),
        );

        Ok(Self {
            config,
            catalog,
            images,
            registry,
            lifecycle,
            shutdown: CancellationToken::new(),
            reconciler: None,
        })
    }

    /// Schedule image reconciliation. Calling it again is a no-op.
    pub fn start(&mut self) -> Result<(), ConfigError> {
        if self.reconciler.is_some() {
            tracing::debug!("Orchestrator already started");
            return Ok(());
        }

        let reconciler =
            ImageReconciler::new(Arc::clone(&self.catalog), Arc::clone(&self.images), &self.config)?;
        self.reconciler = Some(reconciler.spawn(self.shutdown.child_token()));

        tracing::info!(
            base_url = %self.config.base_url,
            interval_secs = self.config.monitor_interval_secs,
            "Orchestrator started"
        );
        Ok(())
    }

    pub fn lifecycle(&self) -> &ContainerLifecycleManager {
        &self.lifecycle
    }

    pub fn registry(&self) -> &MonitorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Stop reconciliation and every container monitor.
    ///
    /// The registry is closed afterwards, so later `create` calls fail
    /// without reaching the remote system.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.reconciler.take()
            && let Err(e) = handle.await
        {
            tracing::error!("Image reconciler task failed: {}", e);
        }

        let now = Utc::now();
        for monitor in self.registry.snapshot().await {
            tracing::debug!(
                container = %monitor.container,
                task_id = %monitor.task_id,
                uptime_secs = (now - monitor.started_at).num_seconds(),
                "Stopping container monitor"
            );
        }

        let stopped = self.registry.shutdown().await;
        tracing::info!(monitors = stopped, "Orchestrator shut down");
    }
}
