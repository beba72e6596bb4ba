//! Turns build and stop requests into supervised background work.
//!
//! A request is answered as soon as its record exists; the engine work runs
//! afterwards and its outcome is only visible by re-reading the store.

use dockyard_common::Build;
use dockyard_runtime::ContainerRuntime;
use dockyard_store::{StatusStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

pub mod bridge;
pub mod supervisor;
mod tasks;

pub use bridge::{BlockingBridge, BridgeConfig, BridgeError, QueuePolicy, DEFAULT_WORKERS};
pub use supervisor::{Admission, TaskKind, TaskLabel, TaskSupervisor};

pub use dockyard_common as common;

// --- Custom Error Type ---
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Answer to a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission<T> {
    Accepted(T),
    /// The referenced image or build does not exist. Nothing was written.
    NotFound,
}

impl<T> Submission<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Submission::Accepted(_))
    }

    pub fn accepted(self) -> Option<T> {
        match self {
            Submission::Accepted(value) => Some(value),
            Submission::NotFound => None,
        }
    }
}

// --- Orchestrator Implementation ---
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn StatusStore>,
    runtime: Arc<dyn ContainerRuntime>,
    bridge: BlockingBridge,
    supervisor: Arc<TaskSupervisor>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("bridge", &self.bridge)
            .field("supervisor", &self.supervisor)
            .finish()
    }
}

impl Orchestrator {
    /// Must be called from within a tokio runtime.
    pub fn new(
        store: Arc<dyn StatusStore>,
        runtime: Arc<dyn ContainerRuntime>,
        bridge: BlockingBridge,
    ) -> Self {
        Self {
            store,
            runtime,
            bridge,
            supervisor: Arc::new(TaskSupervisor::new()),
        }
    }

    pub fn bridge(&self) -> &BlockingBridge {
        &self.bridge
    }

    /// Background tasks not yet finished.
    pub fn in_flight(&self) -> usize {
        self.supervisor.in_flight()
    }

    /// Record a new build of `image_id` and start building it in the background.
    ///
    /// Returns once the build row exists with status `new`.
    #[instrument(skip(self))]
    pub async fn submit_build(&self, image_id: i64) -> Result<Submission<Build>> {
        let Some(image) = self.store.get_image(image_id).await? else {
            info!("Image not found, build rejected");
            return Ok(Submission::NotFound);
        };
        // Held across the insert so shutdown cannot strand a `new` row without its task
        let admission = self.supervisor.admit()?;

        let build = match self.store.create_build(image.id).await {
            Ok(build) => build,
            Err(StoreError::NotFound { .. }) => return Ok(Submission::NotFound),
            Err(e) => return Err(e.into()),
        };
        info!(build_id = build.id, "Build accepted");

        let task = tasks::run_build(
            self.store.clone(),
            self.bridge.clone(),
            self.runtime.clone(),
            image,
            build.id,
        );
        admission.spawn(TaskLabel::build(build.id), task);

        Ok(Submission::Accepted(build))
    }

    /// Stop the container recorded for `build_id` in the background.
    ///
    /// No check is made that the build is running or that another task for
    /// the same build is in flight.
    #[instrument(skip(self))]
    pub async fn submit_stop(&self, build_id: i64) -> Result<Submission<Build>> {
        let Some(build) = self.store.get_build(build_id).await? else {
            info!("Build not found, stop rejected");
            return Ok(Submission::NotFound);
        };

        let task = tasks::run_stop(
            self.store.clone(),
            self.bridge.clone(),
            self.runtime.clone(),
            build.container_id.clone(),
            build.id,
        );
        self.supervisor.spawn(TaskLabel::stop(build.id), task)?;
        info!(container_id = ?build.container_id, "Stop accepted");

        Ok(Submission::Accepted(build))
    }

    /// Wait until every background task has finished.
    pub async fn wait_idle(&self) {
        self.supervisor.wait_idle().await;
    }

    /// Refuse new submissions, let those already past their lookup spawn
    /// their task, drain running tasks, then close the bridge.
    pub async fn shutdown(&self) {
        info!("Shutting down orchestrator");
        self.supervisor.shutdown().await;
        self.bridge.close();
    }
}
