//! Remote control-plane catalog: images and container resources.
//!
//! The orchestrator core only talks to [`RemoteCatalog`]. How endpoints are
//! located is up to the implementation; [`HalCatalogClient`] discovers them by
//! following HAL link relations from the API root.
//!
//! ```text
//!   root ──cu:images──────► images collection
//!     │
//!     └───cu:containers───► containers collection ──cu:container{name}──► container
//!                                                                          │
//!                                                  self / cu:start / cu:stop
//! ```

pub mod hal;
mod types;

pub use hal::HalCatalogClient;
pub use types::{ContainerHandle, ContainerState, Image};

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::RemoteError;

/// Capability interface onto the remote image catalog and container API.
///
/// Every call is a single request/response exchange with no implicit retry.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// All images the remote system can run.
    async fn list_images(&self) -> Result<HashSet<Image>, RemoteError>;

    /// Create a container named `name` backed by `image_ref`.
    async fn create_container(
        &self,
        name: &str,
        image_ref: &str,
    ) -> Result<ContainerHandle, RemoteError>;

    async fn delete_container(&self, name: &str) -> Result<(), RemoteError>;

    async fn start_container(&self, name: &str) -> Result<(), RemoteError>;

    async fn stop_container(&self, name: &str) -> Result<(), RemoteError>;

    /// Re-read the container through its self link.
    async fn fetch_state(&self, handle: &ContainerHandle) -> Result<ContainerHandle, RemoteError>;
}
