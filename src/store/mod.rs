//! Collaborators the orchestrator core calls out to.
//!
//! Persistence of images and applications lives outside this crate; these
//! traits are the seams. [`memory`] provides in-process implementations used
//! by the standalone daemon and by tests.

pub mod memory;

pub use memory::{InMemoryApplicationRepository, InMemoryImageStore};

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::{ContainerState, Image};
use crate::error::StoreError;

/// The application aggregate that owns containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    /// Last observed state per container name.
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerState>,
}

impl Application {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            containers: BTreeMap::new(),
        }
    }
}

/// Local image cache persistence.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn list(&self) -> Result<HashSet<Image>, StoreError>;

    async fn insert(&self, image: &Image) -> Result<(), StoreError>;

    async fn delete(&self, image: &Image) -> Result<(), StoreError>;
}

/// Lookup of application aggregates by id.
#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Application>, StoreError>;
}

/// Merges an observed container state into the owning application.
#[async_trait]
pub trait ContainerStateUpdater: Send + Sync {
    async fn update_container_state(
        &self,
        application: &Application,
        container_name: &str,
        state: ContainerState,
    ) -> Result<(), StoreError>;
}
