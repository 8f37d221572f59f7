//! Per-container state monitor.
//!
//! Each monitored container gets its own task that re-reads the container
//! through its self link and hands the observed state to the state updater:
//!
//! ```text
//!   RemoteCatalog::fetch_state ──► ApplicationRepository::find ──► ContainerStateUpdater
//! ```
//!
//! A `NotFound` from the catalog means the container is gone: the monitor
//! removes itself from the registry and exits. Any other failure skips the
//! tick and the monitor tries again after the next interval.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::catalog::{ContainerHandle, ContainerState, RemoteCatalog};
use crate::config::OrchestratorConfig;
use crate::orchestrator::registry::{MonitorRegistry, MonitorTask, TaskContext};
use crate::orchestrator::{remote_call, wait_or_cancel};
use crate::store::{ApplicationRepository, ContainerStateUpdater};

/// Scheduling parameters for container monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorTimings {
    /// Delay before the first poll.
    pub initial_delay: Duration,
    /// Delay between the end of one poll and the start of the next.
    pub interval: Duration,
    /// Upper bound for a single remote call.
    pub remote_timeout: Duration,
}

impl MonitorTimings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            initial_delay: config.monitor_initial_delay(),
            interval: config.monitor_interval(),
            remote_timeout: config.request_timeout(),
        }
    }
}

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// State was forwarded to the updater.
    Reported(ContainerState),
    /// A transient failure; try again next interval.
    Skipped,
    /// The container no longer exists remotely.
    Gone,
    /// Cancellation was requested while the poll was in flight.
    Cancelled,
}

/// Polls one container and reports its state to the owning application.
pub struct ContainerMonitor {
    handle: ContainerHandle,
    application_id: String,
    catalog: Arc<dyn RemoteCatalog>,
    applications: Arc<dyn ApplicationRepository>,
    updater: Arc<dyn ContainerStateUpdater>,
    timings: MonitorTimings,
}

impl ContainerMonitor {
    pub fn new(
        handle: ContainerHandle,
        application_id: impl Into<String>,
        catalog: Arc<dyn RemoteCatalog>,
        applications: Arc<dyn ApplicationRepository>,
        updater: Arc<dyn ContainerStateUpdater>,
        timings: MonitorTimings,
    ) -> Self {
        Self {
            handle,
            application_id: application_id.into(),
            catalog,
            applications,
            updater,
            timings,
        }
    }

    pub fn container_name(&self) -> &str {
        &self.handle.name
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Latest representation this monitor has seen.
    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    /// Poll once. Results that arrive after `token` is cancelled are dropped,
    /// and an update still in flight when it is cancelled is abandoned.
    pub async fn tick(&mut self, token: &CancellationToken) -> TickOutcome {
        let fetched = remote_call(
            "fetch_state",
            self.timings.remote_timeout,
            self.catalog.fetch_state(&self.handle),
        )
        .await;

        if token.is_cancelled() {
            tracing::debug!(container = %self.handle.name, "Discarding poll result after cancellation");
            return TickOutcome::Cancelled;
        }

        match fetched {
            Ok(latest) => self.handle = latest,
            Err(e) if e.is_not_found() => {
                tracing::info!(
                    container = %self.handle.name,
                    application = %self.application_id,
                    "Container no longer exists, stopping monitor"
                );
                return TickOutcome::Gone;
            }
            Err(e) => {
                tracing::warn!(
                    container = %self.handle.name,
                    "Skipping container poll: {}", e
                );
                return TickOutcome::Skipped;
            }
        }

        let application = match self.applications.find(&self.application_id).await {
            Ok(Some(application)) => application,
            Ok(None) => {
                tracing::warn!(
                    container = %self.handle.name,
                    application = %self.application_id,
                    "Owning application not found, skipping state update"
                );
                return TickOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(
                    container = %self.handle.name,
                    application = %self.application_id,
                    "Failed to load owning application: {}", e
                );
                return TickOutcome::Skipped;
            }
        };

        let state = self.handle.state;
        let updated = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!(container = %self.handle.name, "Dropping state update after cancellation");
                return TickOutcome::Cancelled;
            }
            result = self.updater.update_container_state(&application, &self.handle.name, state) => result,
        };
        if let Err(e) = updated {
            tracing::warn!(
                container = %self.handle.name,
                application = %self.application_id,
                "Failed to record container state: {}", e
            );
            return TickOutcome::Skipped;
        }

        tracing::debug!(
            container = %self.handle.name,
            application = %self.application_id,
            state = %state,
            "Container state reported"
        );
        TickOutcome::Reported(state)
    }

    /// Spawn this monitor as a disarmed [`MonitorTask`].
    ///
    /// Polling begins once the task is accepted by `registry.schedule`.
    pub fn spawn(self, registry: MonitorRegistry) -> MonitorTask {
        let name = self.handle.name.clone();
        MonitorTask::spawn(name, move |ctx| self.run(ctx, registry))
    }

    async fn run(mut self, mut ctx: TaskContext, registry: MonitorRegistry) {
        let name = self.handle.name.clone();

        if !ctx.armed().await {
            tracing::debug!(container = %name, "Monitor never armed, exiting");
            return;
        }

        tracing::info!(
            container = %name,
            application = %self.application_id,
            interval = ?self.timings.interval,
            "Container monitor started"
        );

        let token = ctx.token().clone();
        if !wait_or_cancel(self.timings.initial_delay, &token).await {
            return;
        }

        loop {
            match self.tick(&token).await {
                TickOutcome::Gone => {
                    registry.deregister_if(&name, ctx.id()).await;
                    break;
                }
                TickOutcome::Cancelled => break,
                TickOutcome::Reported(_) | TickOutcome::Skipped => {}
            }

            if !wait_or_cancel(self.timings.interval, &token).await {
                break;
            }
        }

        tracing::debug!(container = %name, "Container monitor stopped");
    }
}
