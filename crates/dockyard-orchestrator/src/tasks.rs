//! Bodies of the background build and stop tasks.

use crate::bridge::BlockingBridge;
use crate::Result;
use dockyard_common::{BuildStatus, Image};
use dockyard_runtime::ContainerRuntime;
use dockyard_store::StatusStore;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Build `image` and start a container from it, then record the outcome.
///
/// `image` is the record as it was when the build was accepted; it is not
/// re-read here. On failure only `is_success` is written, so the status
/// stays `new`.
#[instrument(skip_all, fields(build_id = build_id, image_id = image.id))]
pub(crate) async fn run_build(
    store: Arc<dyn StatusStore>,
    bridge: BlockingBridge,
    runtime: Arc<dyn ContainerRuntime>,
    image: Image,
    build_id: i64,
) -> Result<()> {
    let outcome = bridge.run(move || runtime.build_and_run(&image)).await;

    match outcome {
        Ok(Ok(container)) => {
            info!(container_id = %container.id, tag = %container.image_tag, "Build succeeded, container running");
            store
                .update_build_result(build_id, true, Some(BuildStatus::Running), Some(&container.id))
                .await?;
        }
        Ok(Err(e)) => {
            warn!(kind = e.kind(), error = %e, "Build failed");
            store.update_build_result(build_id, false, None, None).await?;
        }
        Err(e) => {
            error!(error = %e, "Build call did not run");
            store.update_build_result(build_id, false, None, None).await?;
        }
    }
    Ok(())
}

/// Stop the build's container and mark the build finished.
///
/// The status moves to `finished` whatever the stop call reports.
#[instrument(skip_all, fields(build_id = build_id, container_id = ?container_id))]
pub(crate) async fn run_stop(
    store: Arc<dyn StatusStore>,
    bridge: BlockingBridge,
    runtime: Arc<dyn ContainerRuntime>,
    container_id: Option<String>,
    build_id: i64,
) -> Result<()> {
    let outcome = bridge
        .run(move || runtime.stop_container(container_id.as_deref()))
        .await;

    match outcome {
        Ok(Ok(())) => info!("Container stopped"),
        Ok(Err(e)) => warn!(kind = e.kind(), error = %e, "Stop failed, marking build finished anyway"),
        Err(e) => error!(error = %e, "Stop call did not run, marking build finished anyway"),
    }

    store
        .update_build_status(build_id, BuildStatus::Finished)
        .await?;
    Ok(())
}
