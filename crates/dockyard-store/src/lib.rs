//! Durable record of images and builds.
//!
//! The store is the source of truth for build state. Every operation is a
//! single-row read or write; callers never get multi-row transactions.

use async_trait::async_trait;
use dockyard_common::{Build, BuildStatus, Image, NewImage};
use thiserror::Error;

mod memory;
mod migrations;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

// Error Types
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn create_image(&self, image: NewImage) -> Result<Image>;
    async fn list_images(&self) -> Result<Vec<Image>>;
    async fn get_image(&self, id: i64) -> Result<Option<Image>>;

    async fn list_builds(&self) -> Result<Vec<Build>>;
    /// Insert a build for `image_id` in state `new` with `is_success = true`.
    async fn create_build(&self, image_id: i64) -> Result<Build>;
    async fn get_build(&self, id: i64) -> Result<Option<Build>>;

    /// Record the outcome of a build attempt.
    ///
    /// `status` and `container_id` are only written when `Some`; `None`
    /// leaves the stored value untouched.
    async fn update_build_result(
        &self,
        id: i64,
        is_success: bool,
        status: Option<BuildStatus>,
        container_id: Option<&str>,
    ) -> Result<()>;

    async fn update_build_status(&self, id: i64, status: BuildStatus) -> Result<()>;
}
