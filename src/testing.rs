//! Test doubles for the remote catalog and the state updater.
//!
//! Provides:
//! - [`StubCatalog`]: an in-memory remote with per-operation failure injection
//!   and an ordered call log
//! - [`RecordingStateUpdater`]: records every state update it receives
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dockhand::catalog::Image;
//! use dockhand::testing::{CatalogOp, StubCatalog, StubFailure};
//!
//! let catalog = Arc::new(StubCatalog::new().with_images([Image::new("nginx", "web")]));
//! catalog.set_failure(CatalogOp::ListImages, Some(StubFailure::Unavailable));
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::catalog::{ContainerHandle, ContainerState, Image, RemoteCatalog};
use crate::error::{RemoteError, StoreError};
use crate::store::{Application, ContainerStateUpdater};

/// Catalog operations, for failure injection and call inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogOp {
    ListImages,
    CreateContainer,
    DeleteContainer,
    StartContainer,
    StopContainer,
    FetchState,
}

/// How an injected failure behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubFailure {
    /// `RemoteError::Unavailable`.
    Unavailable,
    /// `RemoteError::Rejected` with HTTP 422.
    Rejected,
    /// Never completes; exercises caller-side timeouts.
    Hang,
}

/// One recorded catalog call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogCall {
    pub op: CatalogOp,
    pub container: Option<String>,
}

/// In-memory stand-in for the remote control plane.
pub struct StubCatalog {
    images: Mutex<HashSet<Image>>,
    containers: Mutex<HashMap<String, ContainerHandle>>,
    failures: Mutex<HashMap<CatalogOp, StubFailure>>,
    calls: Mutex<Vec<CatalogCall>>,
}

impl StubCatalog {
    pub fn new() -> Self {
        Self {
            images: Mutex::new(HashSet::new()),
            containers: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_images(self, images: impl IntoIterator<Item = Image>) -> Self {
        self.set_images(images);
        self
    }

    /// Replace the remote image catalog.
    pub fn set_images(&self, images: impl IntoIterator<Item = Image>) {
        *lock(&self.images) = images.into_iter().collect();
    }

    /// Make `op` fail (or stop failing with `None`) from now on.
    pub fn set_failure(&self, op: CatalogOp, failure: Option<StubFailure>) {
        let mut failures = lock(&self.failures);
        match failure {
            Some(f) => failures.insert(op, f),
            None => failures.remove(&op),
        };
    }

    /// Change a container's state as if it transitioned remotely.
    pub fn set_state(&self, name: &str, state: ContainerState) {
        if let Some(container) = lock(&self.containers).get_mut(name) {
            container.state = state;
        }
    }

    /// Remove a container behind the orchestrator's back.
    pub fn remove_remote(&self, name: &str) {
        lock(&self.containers).remove(name);
    }

    pub fn exists(&self, name: &str) -> bool {
        lock(&self.containers).contains_key(name)
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<CatalogCall> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, op: CatalogOp) -> usize {
        lock(&self.calls).iter().filter(|c| c.op == op).count()
    }

    /// Record the call, then apply any injected failure.
    async fn enter(&self, op: CatalogOp, container: Option<&str>) -> Result<(), RemoteError> {
        lock(&self.calls).push(CatalogCall {
            op,
            container: container.map(str::to_string),
        });

        let failure = lock(&self.failures).get(&op).copied();
        match failure {
            None => Ok(()),
            Some(StubFailure::Unavailable) => Err(RemoteError::Unavailable {
                reason: "stub catalog unavailable".to_string(),
            }),
            Some(StubFailure::Rejected) => Err(RemoteError::Rejected {
                status: 422,
                reason: "stub catalog rejected the request".to_string(),
            }),
            Some(StubFailure::Hang) => std::future::pending().await,
        }
    }

    fn not_found(name: &str) -> RemoteError {
        RemoteError::NotFound {
            resource: format!("container '{name}'"),
        }
    }

    fn transition(&self, name: &str, state: ContainerState) -> Result<(), RemoteError> {
        let mut containers = lock(&self.containers);
        let container = containers.get_mut(name).ok_or_else(|| Self::not_found(name))?;
        container.state = state;
        Ok(())
    }
}

impl Default for StubCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteCatalog for StubCatalog {
    async fn list_images(&self) -> Result<HashSet<Image>, RemoteError> {
        self.enter(CatalogOp::ListImages, None).await?;
        Ok(lock(&self.images).clone())
    }

    async fn create_container(
        &self,
        name: &str,
        image_ref: &str,
    ) -> Result<ContainerHandle, RemoteError> {
        self.enter(CatalogOp::CreateContainer, Some(name)).await?;

        let mut containers = lock(&self.containers);
        if containers.contains_key(name) {
            return Err(RemoteError::Rejected {
                status: 409,
                reason: format!("container '{name}' already exists"),
            });
        }

        let self_link = Url::parse("http://stub.local/containers/")
            .and_then(|base| base.join(&urlencoding::encode(name)))
            .map_err(|e| RemoteError::InvalidResponse {
                reason: e.to_string(),
            })?;
        let handle = ContainerHandle {
            name: name.to_string(),
            image: image_ref.to_string(),
            state: ContainerState::Stopped,
            self_link,
        };
        containers.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    async fn delete_container(&self, name: &str) -> Result<(), RemoteError> {
        self.enter(CatalogOp::DeleteContainer, Some(name)).await?;
        lock(&self.containers)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(name))
    }

    async fn start_container(&self, name: &str) -> Result<(), RemoteError> {
        self.enter(CatalogOp::StartContainer, Some(name)).await?;
        self.transition(name, ContainerState::Running)
    }

    async fn stop_container(&self, name: &str) -> Result<(), RemoteError> {
        self.enter(CatalogOp::StopContainer, Some(name)).await?;
        self.transition(name, ContainerState::Stopped)
    }

    async fn fetch_state(&self, handle: &ContainerHandle) -> Result<ContainerHandle, RemoteError> {
        self.enter(CatalogOp::FetchState, Some(&handle.name)).await?;
        lock(&self.containers)
            .get(&handle.name)
            .cloned()
            .ok_or_else(|| Self::not_found(&handle.name))
    }
}

/// State updater that records `(application_id, container, state)` triples.
#[derive(Default)]
pub struct RecordingStateUpdater {
    updates: Mutex<Vec<(String, String, ContainerState)>>,
}

impl RecordingStateUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(String, String, ContainerState)> {
        lock(&self.updates).clone()
    }

    /// States reported for one container, in order.
    pub fn states_for(&self, container: &str) -> Vec<ContainerState> {
        lock(&self.updates)
            .iter()
            .filter(|(_, name, _)| name == container)
            .map(|(_, _, state)| *state)
            .collect()
    }
}

#[async_trait]
impl ContainerStateUpdater for RecordingStateUpdater {
    async fn update_container_state(
        &self,
        application: &Application,
        container_name: &str,
        state: ContainerState,
    ) -> Result<(), StoreError> {
        lock(&self.updates).push((application.id.clone(), container_name.to_string(), state));
        Ok(())
    }
}

/// Lock ignoring poisoning; a panicking test thread should not cascade.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
