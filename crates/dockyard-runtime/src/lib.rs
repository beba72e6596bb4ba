//! Container engine adapter.
//!
//! Both operations are blocking: callers are expected to run them on a
//! worker thread, never directly on the async executor.

use dockyard_common::Image;
use thiserror::Error;

// Re-export dependencies potentially needed by consumers
pub use bollard;
pub use dockyard_common as common;

pub mod context;
pub mod docker;
pub mod test_utils;

pub use context::BuildContext;
pub use docker::{DockerRuntime, DEFAULT_DOCKER_TIMEOUT};

// --- Custom Error Type ---
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Image build failed: {0}")]
    Build(String),
    #[error("Container failed: {0}")]
    Container(String),
    #[error("Image not found: {0}")]
    ImageNotFound(String),
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Docker API error: {0}")]
    Api(#[from] bollard::errors::Error),
    #[error("Build context error: {0}")]
    Context(#[from] std::io::Error),
}

impl RuntimeError {
    /// Short classification used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeError::Build(_) => "build",
            RuntimeError::Container(_) => "container",
            RuntimeError::ImageNotFound(_) => "image_not_found",
            RuntimeError::NotFound(_) => "not_found",
            RuntimeError::Api(_) => "api",
            RuntimeError::Context(_) => "context",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// A container the engine has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Engine-assigned container identifier.
    pub id: String,
    pub image_tag: String,
}

/// Blocking operations against a container engine.
pub trait ContainerRuntime: Send + Sync {
    /// Build an image from `image` and start a detached container from it.
    fn build_and_run(&self, image: &Image) -> Result<ContainerHandle>;

    /// Stop the container with the given id. A missing id is reported as
    /// [`RuntimeError::NotFound`].
    fn stop_container(&self, container_id: Option<&str>) -> Result<()>;
}
