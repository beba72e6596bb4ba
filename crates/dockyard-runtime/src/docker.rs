//! Docker-backed runtime adapter using bollard.

use crate::context::{BuildContext, DOCKERFILE_NAME};
use crate::{ContainerHandle, ContainerRuntime, Result, RuntimeError};
use bollard::container::{Config, CreateContainerOptions, StartContainerOptions, StopContainerOptions};
use bollard::errors::Error as BollardError;
use bollard::image::BuildImageOptions;
use bollard::Docker;
use dockyard_common::Image;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

/// Request timeout applied to the Docker client.
pub const DEFAULT_DOCKER_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs builds and containers against the local Docker engine.
///
/// Bollard is asynchronous; the blocking trait methods drive its futures on
/// `handle` from the calling worker thread. They must not be called from
/// inside an async task.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    handle: Handle,
    images_dir: PathBuf,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime")
            .field("images_dir", &self.images_dir)
            .finish()
    }
}

impl DockerRuntime {
    /// Connect to the local engine and make sure the images directory exists.
    pub fn connect(images_dir: impl Into<PathBuf>, timeout: Duration, handle: Handle) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?.with_timeout(timeout);
        Self::new(docker, images_dir, handle)
    }

    pub fn new(docker: Docker, images_dir: impl Into<PathBuf>, handle: Handle) -> Result<Self> {
        let images_dir = images_dir.into();
        std::fs::create_dir_all(&images_dir)?;
        info!(images_dir = %images_dir.display(), "Docker runtime ready");
        Ok(Self {
            docker,
            handle,
            images_dir,
        })
    }

    /// Check that the engine answers.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    async fn build_image(&self, tag: &str, context_tar: Vec<u8>) -> Result<()> {
        let options = BuildImageOptions {
            dockerfile: DOCKERFILE_NAME.to_string(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context_tar.into()));
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(RuntimeError::Build(error));
                    }
                    if let Some(line) = info.stream {
                        let line = line.trim_end();
                        if !line.is_empty() {
                            debug!(%tag, "{}", line);
                        }
                    }
                }
                Err(e) => return Err(classify_build_error(e)),
            }
        }
        Ok(())
    }

    async fn create_and_start(&self, tag: &str) -> Result<String> {
        let config = Config {
            image: Some(tag.to_string()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(classify_create_error)?;
        for warning in &created.warnings {
            warn!(container_id = %created.id, %warning, "Engine warning on create");
        }

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::Container(e.to_string()))?;

        Ok(created.id)
    }

    async fn stop(&self, container_id: &str) -> Result<()> {
        match self
            .docker
            .stop_container(container_id, None::<StopContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => classify_stop_error(e),
        }
    }
}

impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self, image), fields(image_id = image.id, tag = %image.tag()))]
    fn build_and_run(&self, image: &Image) -> Result<ContainerHandle> {
        let tag = image.tag();
        let context = BuildContext::materialize(&self.images_dir, image)?;
        let context_tar = context.to_tar()?;

        info!(%tag, dockerfile = %context.dockerfile_path().display(), "Building image...");
        self.handle.block_on(self.build_image(&tag, context_tar))?;

        info!(%tag, "Image built. Starting container...");
        let id = self.handle.block_on(self.create_and_start(&tag))?;
        info!(%tag, container_id = %id, "Container started.");

        Ok(ContainerHandle { id, image_tag: tag })
    }

    #[instrument(skip(self))]
    fn stop_container(&self, container_id: Option<&str>) -> Result<()> {
        let container_id = container_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RuntimeError::NotFound("no container recorded".to_string()))?;

        info!(%container_id, "Stopping container...");
        self.handle.block_on(self.stop(container_id))?;
        info!(%container_id, "Container stopped.");
        Ok(())
    }
}

fn classify_build_error(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerStreamError { error } => RuntimeError::Build(error),
        other => RuntimeError::Api(other),
    }
}

fn classify_create_error(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::ImageNotFound(message),
        other => RuntimeError::Api(other),
    }
}

fn classify_stop_error(err: BollardError) -> Result<()> {
    match err {
        // Already stopped
        BollardError::DockerResponseServerError {
            status_code: 304, ..
        } => Ok(()),
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => Err(RuntimeError::NotFound(message)),
        other => Err(RuntimeError::Api(other)),
    }
}
