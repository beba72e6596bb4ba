use crate::{Result, StatusStore, StoreError};
use async_trait::async_trait;
use dockyard_common::{Build, BuildStatus, Image, NewImage};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    images: BTreeMap<i64, Image>,
    builds: BTreeMap<i64, Build>,
    next_image_id: i64,
    next_build_id: i64,
}

// In-memory storage implementation for development/testing
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for InMemoryStore {
    async fn create_image(&self, image: NewImage) -> Result<Image> {
        let mut tables = self.tables.write().await;
        tables.next_image_id += 1;
        let image = Image {
            id: tables.next_image_id,
            name: image.name,
            base: image.base,
            code: image.code,
        };
        tables.images.insert(image.id, image.clone());
        Ok(image)
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        Ok(self.tables.read().await.images.values().cloned().collect())
    }

    async fn get_image(&self, id: i64) -> Result<Option<Image>> {
        Ok(self.tables.read().await.images.get(&id).cloned())
    }

    async fn list_builds(&self) -> Result<Vec<Build>> {
        Ok(self.tables.read().await.builds.values().cloned().collect())
    }

    async fn create_build(&self, image_id: i64) -> Result<Build> {
        let mut tables = self.tables.write().await;
        // Mirrors the foreign key on builds.image_id
        if !tables.images.contains_key(&image_id) {
            return Err(StoreError::NotFound {
                entity: "image",
                id: image_id,
            });
        }
        tables.next_build_id += 1;
        let build = Build::new(tables.next_build_id, image_id);
        tables.builds.insert(build.id, build.clone());
        Ok(build)
    }

    async fn get_build(&self, id: i64) -> Result<Option<Build>> {
        Ok(self.tables.read().await.builds.get(&id).cloned())
    }

    async fn update_build_result(
        &self,
        id: i64,
        is_success: bool,
        status: Option<BuildStatus>,
        container_id: Option<&str>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let build = tables
            .builds
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "build", id })?;

        build.is_success = is_success;
        if let Some(status) = status {
            build.status = status;
        }
        if let Some(container_id) = container_id {
            build.container_id = Some(container_id.to_string());
        }
        Ok(())
    }

    async fn update_build_status(&self, id: i64, status: BuildStatus) -> Result<()> {
        let mut tables = self.tables.write().await;
        let build = tables
            .builds
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "build", id })?;
        build.status = status;
        Ok(())
    }
}
