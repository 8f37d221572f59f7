//! Container lifecycle operations, kept in step with the monitor registry.
//!
//! Per container, as seen from here:
//!
//! ```text
//!   NonExistent ──create──► Created ──schedule──► Monitored
//!                                                    │ delete
//!                                                    ▼
//!                              Deleted ◄──remote delete── Cancelling
//! ```
//!
//! Monitoring starts only after the remote create succeeded and stops before
//! the remote delete is issued, so no poll ever races a delete.

use std::collections::HashSet;
use std::sync::Arc;

use crate::catalog::{ContainerHandle, Image, RemoteCatalog};
use crate::error::{LifecycleError, RegistryError};
use crate::orchestrator::monitor::{ContainerMonitor, MonitorTimings};
use crate::orchestrator::registry::MonitorRegistry;
use crate::orchestrator::remote_call;
use crate::store::{Application, ApplicationRepository, ContainerStateUpdater};

/// Creates, deletes, starts and stops containers.
pub struct ContainerLifecycleManager {
    catalog: Arc<dyn RemoteCatalog>,
    registry: MonitorRegistry,
    applications: Arc<dyn ApplicationRepository>,
    updater: Arc<dyn ContainerStateUpdater>,
    timings: MonitorTimings,
}

impl ContainerLifecycleManager {
    pub fn new(
        catalog: Arc<dyn RemoteCatalog>,
        registry: MonitorRegistry,
        applications: Arc<dyn ApplicationRepository>,
        updater: Arc<dyn ContainerStateUpdater>,
        timings: MonitorTimings,
    ) -> Self {
        Self {
            catalog,
            registry,
            applications,
            updater,
            timings,
        }
    }

    pub fn registry(&self) -> &MonitorRegistry {
        &self.registry
    }

    /// Create the container remotely and start monitoring it for `application`.
    ///
    /// If the monitor cannot be registered the remote container is left in
    /// place and a consistency error is returned; no monitor keeps running.
    pub async fn create(
        &self,
        application: &Application,
        name: &str,
        image: &Image,
    ) -> Result<ContainerHandle, LifecycleError> {
        if self.registry.is_closed() {
            return Err(LifecycleError::consistency_from(
                name,
                "monitoring is shut down; container not created",
                RegistryError::Closed,
            ));
        }

        let handle = remote_call(
            "create_container",
            self.timings.remote_timeout,
            self.catalog.create_container(name, &image.name),
        )
        .await?;

        let monitor = ContainerMonitor::new(
            handle.clone(),
            application.id.clone(),
            Arc::clone(&self.catalog),
            Arc::clone(&self.applications),
            Arc::clone(&self.updater),
            self.timings,
        );
        let task = monitor.spawn(self.registry.clone());

        if let Err(e) = self.registry.schedule(name, task).await {
            tracing::error!(
                container = %name,
                application = %application.id,
                "Container created remotely but monitor registration failed: {}", e
            );
            return Err(LifecycleError::consistency_from(
                name,
                "container was created remotely but could not be monitored",
                e,
            ));
        }

        tracing::info!(
            container = %name,
            application = %application.id,
            image = %image,
            "Container created"
        );
        Ok(handle)
    }

    /// Stop monitoring the container, then delete it remotely.
    ///
    /// If the remote delete fails the monitor stays cancelled and a
    /// consistency error is returned; retry with [`retry_delete`](Self::retry_delete).
    pub async fn delete(&self, application: &Application, name: &str) -> Result<(), LifecycleError> {
        let task = self.registry.cancel(name).await.map_err(|e| {
            LifecycleError::consistency_from(name, "no monitor registered; remote delete not attempted", e)
        })?;
        task.cancel().await;
        tracing::debug!(container = %name, "Monitor stopped ahead of remote delete");

        if let Err(e) = remote_call(
            "delete_container",
            self.timings.remote_timeout,
            self.catalog.delete_container(name),
        )
        .await
        {
            tracing::error!(
                container = %name,
                application = %application.id,
                "Monitor cancelled but remote delete failed: {}", e
            );
            return Err(LifecycleError::consistency_from(
                name,
                "monitor was cancelled but the remote delete failed",
                e,
            ));
        }

        tracing::info!(container = %name, application = %application.id, "Container deleted");
        Ok(())
    }

    /// Delete a container that is no longer monitored, e.g. after a failed
    /// [`delete`](Self::delete). Refuses while a monitor is registered.
    pub async fn retry_delete(&self, name: &str) -> Result<(), LifecycleError> {
        if self.registry.is_monitored(name).await {
            return Err(LifecycleError::consistency(
                name,
                "container is still monitored; use delete instead",
            ));
        }

        remote_call(
            "delete_container",
            self.timings.remote_timeout,
            self.catalog.delete_container(name),
        )
        .await?;

        tracing::info!(container = %name, "Container deleted on retry");
        Ok(())
    }

    /// Ask the remote system to start the container. The monitor picks up the
    /// resulting state on its next poll.
    pub async fn start(&self, name: &str) -> Result<(), LifecycleError> {
        remote_call(
            "start_container",
            self.timings.remote_timeout,
            self.catalog.start_container(name),
        )
        .await?;
        tracing::info!(container = %name, "Container start requested");
        Ok(())
    }

    pub async fn stop(&self, name: &str) -> Result<(), LifecycleError> {
        remote_call(
            "stop_container",
            self.timings.remote_timeout,
            self.catalog.stop_container(name),
        )
        .await?;
        tracing::info!(container = %name, "Container stop requested");
        Ok(())
    }

    /// The live remote image catalog, bypassing the local cache.
    pub async fn find_all_images(&self) -> Result<HashSet<Image>, LifecycleError> {
        Ok(remote_call(
            "list_images",
            self.timings.remote_timeout,
            self.catalog.list_images(),
        )
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::catalog::ContainerState;
    use crate::error::RemoteError;
    use crate::orchestrator::registry::MonitorTask;
    use crate::store::InMemoryApplicationRepository;
    use crate::testing::{CatalogOp, RecordingStateUpdater, StubCatalog, StubFailure};

    struct Fixture {
        catalog: Arc<StubCatalog>,
        updater: Arc<RecordingStateUpdater>,
        manager: ContainerLifecycleManager,
        app: Application,
    }

    async fn fixture() -> Fixture {
        let catalog = Arc::new(StubCatalog::new().with_images([Image::new("nginx", "web")]));
        let applications = Arc::new(InMemoryApplicationRepository::new());
        let app = Application::new("app1", "shop");
        applications.save(app.clone()).await;
        let updater = Arc::new(RecordingStateUpdater::new());

        let manager = ContainerLifecycleManager::new(
            catalog.clone(),
            MonitorRegistry::new(),
            applications,
            updater.clone(),
            MonitorTimings {
                initial_delay: Duration::from_secs(1),
                interval: Duration::from_secs(2),
                remote_timeout: Duration::from_secs(5),
            },
        );

        Fixture {
            catalog,
            updater,
            manager,
            app,
        }
    }

    fn nginx() -> Image {
        Image::new("nginx", "web")
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_registers_monitor() {
        let f = fixture().await;

        let handle = f.manager.create(&f.app, "c1", &nginx()).await.unwrap();

        assert_eq!(handle.name, "c1");
        assert_eq!(handle.image, "nginx");
        assert!(f.manager.registry().is_monitored("c1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_leaves_no_monitor() {
        let f = fixture().await;
        f.catalog
            .set_failure(CatalogOp::CreateContainer, Some(StubFailure::Rejected));

        let err = f.manager.create(&f.app, "c1", &nginx()).await.unwrap_err();

        assert!(matches!(err, LifecycleError::Remote(RemoteError::Rejected { .. })));
        assert!(f.manager.registry().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_over_existing_monitor_is_consistency_error() {
        let f = fixture().await;
        let squatter = MonitorTask::spawn("c1", |mut ctx| async move {
            if ctx.armed().await {
                ctx.token().cancelled().await;
            }
        });
        let squatter_id = squatter.id();
        f.manager.registry().schedule("c1", squatter).await.unwrap();

        let err = f.manager.create(&f.app, "c1", &nginx()).await.unwrap_err();

        assert!(err.is_consistency());
        assert_eq!(f.manager.registry().task_id("c1").await, Some(squatter_id));
        // Not rolled back remotely.
        assert!(f.catalog.exists("c1"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.catalog.count(CatalogOp::FetchState), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_cancels_before_remote_delete() {
        let f = fixture().await;
        f.manager.create(&f.app, "c1", &nginx()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        f.manager.delete(&f.app, "c1").await.unwrap();

        assert!(!f.manager.registry().is_monitored("c1").await);
        assert!(!f.catalog.exists("c1"));

        let calls = f.catalog.calls();
        let delete_at = calls
            .iter()
            .position(|c| c.op == CatalogOp::DeleteContainer)
            .unwrap();
        assert!(
            calls[delete_at..]
                .iter()
                .all(|c| c.op != CatalogOp::FetchState)
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.catalog.count(CatalogOp::FetchState), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_unmonitored_is_consistency_error() {
        let f = fixture().await;

        let err = f.manager.delete(&f.app, "ghost").await.unwrap_err();

        assert!(err.is_consistency());
        assert_eq!(f.catalog.count(CatalogOp::DeleteContainer), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_remote_delete_keeps_monitor_cancelled() {
        let f = fixture().await;
        f.manager.create(&f.app, "c1", &nginx()).await.unwrap();
        f.catalog
            .set_failure(CatalogOp::DeleteContainer, Some(StubFailure::Unavailable));

        let err = f.manager.delete(&f.app, "c1").await.unwrap_err();
        assert!(err.is_consistency());
        assert!(!f.manager.registry().is_monitored("c1").await);

        // Retrying does not try to cancel again.
        f.catalog.set_failure(CatalogOp::DeleteContainer, None);
        f.manager.retry_delete("c1").await.unwrap();
        assert!(!f.catalog.exists("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delete_refuses_monitored_container() {
        let f = fixture().await;
        f.manager.create(&f.app, "c1", &nginx()).await.unwrap();

        let err = f.manager.retry_delete("c1").await.unwrap_err();
        assert!(err.is_consistency());
        assert!(f.catalog.exists("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_after_shutdown_skips_remote_call() {
        let f = fixture().await;
        f.manager.registry().shutdown().await;

        let err = f.manager.create(&f.app, "c1", &nginx()).await.unwrap_err();
        assert!(err.is_consistency());
        assert_eq!(f.catalog.count(CatalogOp::CreateContainer), 0);
        assert!(f.manager.registry().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delete_of_missing_container_is_not_found() {
        let f = fixture().await;

        let err = f.manager.retry_delete("gone").await.unwrap_err();
        assert!(
            matches!(err, LifecycleError::Remote(RemoteError::NotFound { .. })),
            "got {err:?}"
        );
        assert_eq!(f.catalog.count(CatalogOp::DeleteContainer), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_do_not_touch_registry() {
        let f = fixture().await;
        f.manager.create(&f.app, "c1", &nginx()).await.unwrap();
        let task_id = f.manager.registry().task_id("c1").await;

        f.manager.start("c1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(
            f.updater.states_for("c1"),
            vec![ContainerState::Running]
        );

        f.manager.stop("c1").await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            f.updater.states_for("c1"),
            vec![ContainerState::Running, ContainerState::Stopped]
        );
        assert_eq!(f.manager.registry().task_id("c1").await, task_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_missing_container_is_not_found() {
        let f = fixture().await;
        let err = f.manager.start("ghost").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Remote(RemoteError::NotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_all_images_reads_remote() {
        let f = fixture().await;
        let images = f.manager.find_all_images().await.unwrap();
        assert!(images.contains(&nginx()));
    }
}
