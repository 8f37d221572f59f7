//! In-memory collaborator implementations.
//!
//! State is lost on restart. The daemon rebuilds the image cache on its
//! first reconciliation tick, so nothing needs to survive a restart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::catalog::{ContainerState, Image};
use crate::error::StoreError;
use crate::store::{Application, ApplicationRepository, ContainerStateUpdater, ImageStore};

/// Image cache held in a shared set.
#[derive(Clone, Default)]
pub struct InMemoryImageStore {
    images: Arc<RwLock<HashSet<Image>>>,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache, e.g. from a previous snapshot.
    pub fn with_images(images: impl IntoIterator<Item = Image>) -> Self {
        Self {
            images: Arc::new(RwLock::new(images.into_iter().collect())),
        }
    }

    pub async fn len(&self) -> usize {
        self.images.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.images.read().await.is_empty()
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn list(&self) -> Result<HashSet<Image>, StoreError> {
        Ok(self.images.read().await.clone())
    }

    async fn insert(&self, image: &Image) -> Result<(), StoreError> {
        self.images.write().await.insert(image.clone());
        Ok(())
    }

    async fn delete(&self, image: &Image) -> Result<(), StoreError> {
        self.images.write().await.remove(image);
        Ok(())
    }
}

/// Applications keyed by id. Also acts as the state updater, merging
/// observed container states straight into the stored aggregate.
#[derive(Clone, Default)]
pub struct InMemoryApplicationRepository {
    applications: Arc<RwLock<HashMap<String, Application>>>,
}

impl InMemoryApplicationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn save(&self, application: Application) {
        self.applications
            .write()
            .await
            .insert(application.id.clone(), application);
    }

    pub async fn remove(&self, id: &str) -> Option<Application> {
        self.applications.write().await.remove(id)
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn find(&self, id: &str) -> Result<Option<Application>, StoreError> {
        Ok(self.applications.read().await.get(id).cloned())
    }
}

#[async_trait]
impl ContainerStateUpdater for InMemoryApplicationRepository {
    async fn update_container_state(
        &self,
        application: &Application,
        container_name: &str,
        state: ContainerState,
    ) -> Result<(), StoreError> {
        let mut applications = self.applications.write().await;
        let stored = applications
            .get_mut(&application.id)
            .ok_or_else(|| StoreError::OperationFailed {
                operation: "update_container_state".to_string(),
                reason: format!("application '{}' no longer exists", application.id),
            })?;

        let previous = stored.containers.insert(container_name.to_string(), state);
        if previous != Some(state) {
            tracing::info!(
                application = %application.id,
                container = %container_name,
                state = %state,
                "Container state changed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_image_store() {
        let store = InMemoryImageStore::with_images([
            Image::new("nginx", "web"),
            Image::new("nginx", "web"),
            Image::new("redis", "cache"),
        ]);

        assert_eq!(tokio_test::block_on(store.len()), 2);
    }

    #[tokio::test]
    async fn test_image_store_insert_and_delete() {
        let store = InMemoryImageStore::new();
        let nginx = Image::new("nginx", "web");

        store.insert(&nginx).await.unwrap();
        store.insert(&nginx).await.unwrap();
        assert_eq!(store.len().await, 1);

        store.delete(&nginx).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_state_update_merges_into_application() {
        let repo = InMemoryApplicationRepository::new();
        let app = Application::new("app1", "shop");
        repo.save(app.clone()).await;

        repo.update_container_state(&app, "c1", ContainerState::Running)
            .await
            .unwrap();

        let stored = repo.find("app1").await.unwrap().unwrap();
        assert_eq!(stored.containers.get("c1"), Some(&ContainerState::Running));
    }

    #[tokio::test]
    async fn test_state_update_for_removed_application_fails() {
        let repo = InMemoryApplicationRepository::new();
        let app = Application::new("app1", "shop");

        let err = repo
            .update_container_state(&app, "c1", ContainerState::Running)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no longer exists"));
    }
}
