//! Periodic reconciliation of the local image cache against the remote catalog.
//!
//! The remote catalog is the source of truth. Each tick fetches the remote
//! image set, diffs it against the cache and applies deletes, then inserts.
//! Images present on both sides are left alone. A failed tick is logged and
//! the schedule carries on at the next interval.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Image, RemoteCatalog};
use crate::config::OrchestratorConfig;
use crate::error::{ConfigError, Error};
use crate::orchestrator::{remote_call, wait_or_cancel};
use crate::store::ImageStore;

/// Mutations applied by one reconciliation tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: Vec<Image>,
    pub deleted: Vec<Image>,
}

impl ReconcileReport {
    /// True when the cache already matched the catalog.
    pub fn is_noop(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty()
    }
}

/// Keeps an [`ImageStore`] in sync with the remote image catalog.
pub struct ImageReconciler {
    catalog: Arc<dyn RemoteCatalog>,
    store: Arc<dyn ImageStore>,
    interval: Duration,
    remote_timeout: Duration,
}

impl ImageReconciler {
    /// Fails if the configured interval is not strictly positive.
    pub fn new(
        catalog: Arc<dyn RemoteCatalog>,
        store: Arc<dyn ImageStore>,
        config: &OrchestratorConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            catalog,
            store,
            interval: config.monitor_interval(),
            remote_timeout: config.request_timeout(),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one reconciliation pass.
    ///
    /// Fails only if the remote catalog or the local listing cannot be read;
    /// individual store mutations that fail are logged and left out of the report.
    pub async fn reconcile(&self) -> Result<ReconcileReport, Error> {
        let remote = remote_call("list_images", self.remote_timeout, self.catalog.list_images()).await?;
        let local = self.store.list().await?;

        let (to_delete, to_insert) = diff(&local, &remote);
        let mut report = ReconcileReport::default();

        for image in to_delete {
            match self.store.delete(&image).await {
                Ok(()) => report.deleted.push(image),
                Err(e) => tracing::warn!(image = %image, "Failed to delete cached image: {}", e),
            }
        }

        for image in to_insert {
            match self.store.insert(&image).await {
                Ok(()) => report.inserted.push(image),
                Err(e) => tracing::warn!(image = %image, "Failed to cache image: {}", e),
            }
        }

        if !report.is_noop() {
            tracing::info!(
                inserted = report.inserted.len(),
                deleted = report.deleted.len(),
                "Image cache reconciled"
            );
        }
        Ok(report)
    }

    /// Reconcile immediately, then every interval until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        tracing::info!("Starting image reconciliation with interval {:?}", self.interval);

        loop {
            if token.is_cancelled() {
                break;
            }

            match self.reconcile().await {
                Ok(report) if report.is_noop() => tracing::debug!("Image cache up to date"),
                Ok(_) => {}
                Err(e) => tracing::warn!("Image reconciliation tick skipped: {}", e),
            }

            if !wait_or_cancel(self.interval, &token).await {
                break;
            }
        }

        tracing::info!("Image reconciliation stopped");
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}

/// `(local - remote, remote - local)`, each sorted for stable application order.
fn diff(local: &HashSet<Image>, remote: &HashSet<Image>) -> (Vec<Image>, Vec<Image>) {
    let mut to_delete: Vec<Image> = local.difference(remote).cloned().collect();
    let mut to_insert: Vec<Image> = remote.difference(local).cloned().collect();
    to_delete.sort();
    to_insert.sort();
    (to_delete, to_insert)
}
