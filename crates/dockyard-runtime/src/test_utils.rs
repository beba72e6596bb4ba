/// Test utilities for conditional test execution and engine-free runtimes
use crate::{ContainerHandle, ContainerRuntime, Result, RuntimeError};
use dockyard_common::Image;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::Duration;

pub fn has_docker() -> bool {
    // Check if docker command exists and the daemon answers
    Command::new("docker")
        .arg("info")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Macro to skip tests when requirements aren't met
#[macro_export]
macro_rules! require_docker {
    () => {
        if !$crate::test_utils::has_docker() {
            eprintln!("Test ignored: Docker not available");
            return;
        }
    };
}

/// How the mock answers `build_and_run`.
#[derive(Clone, Debug)]
pub enum MockBehavior {
    Success { delay_ms: u64 },
    BuildError,
    ContainerError,
    ImageNotFound,
    ApiError,
    Panic,
}

impl Default for MockBehavior {
    fn default() -> Self {
        MockBehavior::Success { delay_ms: 0 }
    }
}

impl MockBehavior {
    /// Every failing variant, for tests that cover the whole taxonomy.
    pub fn failures() -> Vec<MockBehavior> {
        vec![
            MockBehavior::BuildError,
            MockBehavior::ContainerError,
            MockBehavior::ImageNotFound,
            MockBehavior::ApiError,
        ]
    }
}

/// How the mock answers `stop_container`.
#[derive(Clone, Debug, Default)]
pub enum MockStopBehavior {
    #[default]
    Success,
    NotFound,
    ApiError,
}

/// Blocks build calls until released.
#[derive(Debug, Default)]
pub struct Gate {
    closed: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn close(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    pub fn open(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.cv.notify_all();
    }

    fn pass(&self) {
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        while *closed {
            closed = self.cv.wait(closed).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Runtime that never touches an engine; records every call it receives.
#[derive(Clone, Default)]
pub struct MockRuntime {
    pub behavior: Arc<RwLock<MockBehavior>>,
    pub stop_behavior: Arc<RwLock<MockStopBehavior>>,
    pub builds: Arc<Mutex<Vec<Image>>>,
    pub stops: Arc<Mutex<Vec<Option<String>>>>,
    pub gate: Arc<Gate>,
    entered: Arc<AtomicUsize>,
    next_container: Arc<AtomicUsize>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        let runtime = Self::new();
        runtime.set_behavior(behavior);
        runtime
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.write().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    pub fn set_stop_behavior(&self, behavior: MockStopBehavior) {
        *self.stop_behavior.write().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Build calls that have started, including ones held at the gate.
    pub fn builds_entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn built_images(&self) -> Vec<Image> {
        self.builds.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn stopped_containers(&self) -> Vec<Option<String>> {
        self.stops.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

fn api_error(message: &str) -> RuntimeError {
    RuntimeError::Api(bollard::errors::Error::DockerResponseServerError {
        status_code: 500,
        message: message.to_string(),
    })
}

impl ContainerRuntime for MockRuntime {
    fn build_and_run(&self, image: &Image) -> Result<ContainerHandle> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.gate.pass();
        self.builds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(image.clone());

        let behavior = self
            .behavior
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match behavior {
            MockBehavior::Success { delay_ms } => {
                if delay_ms > 0 {
                    std::thread::sleep(Duration::from_millis(delay_ms));
                }
                let n = self.next_container.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ContainerHandle {
                    id: format!("mock-container-{n}"),
                    image_tag: image.tag(),
                })
            }
            MockBehavior::BuildError => Err(RuntimeError::Build("unknown instruction".to_string())),
            MockBehavior::ContainerError => Err(RuntimeError::Container("exited immediately".to_string())),
            MockBehavior::ImageNotFound => Err(RuntimeError::ImageNotFound(image.tag())),
            MockBehavior::ApiError => Err(api_error("engine unavailable")),
            MockBehavior::Panic => panic!("mock runtime panicked during build"),
        }
    }

    fn stop_container(&self, container_id: Option<&str>) -> Result<()> {
        self.stops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(container_id.map(str::to_string));

        let Some(id) = container_id.filter(|id| !id.is_empty()) else {
            return Err(RuntimeError::NotFound("no container recorded".to_string()));
        };
        let behavior = self
            .stop_behavior
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match behavior {
            MockStopBehavior::Success => Ok(()),
            MockStopBehavior::NotFound => Err(RuntimeError::NotFound(id.to_string())),
            MockStopBehavior::ApiError => Err(api_error("engine unavailable")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Image {
        Image {
            id: 1,
            name: "demo app".to_string(),
            base: "alpine:3.18".to_string(),
            code: "RUN echo hi".to_string(),
        }
    }

    #[test]
    fn test_mock_success_assigns_distinct_ids() {
        let runtime = MockRuntime::new();
        let a = runtime.build_and_run(&image()).unwrap();
        let b = runtime.build_and_run(&image()).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.image_tag, "demo_app");
        assert_eq!(runtime.built_images().len(), 2);
    }

    #[test]
    fn test_mock_failures_cover_taxonomy() {
        let kinds: Vec<_> = MockBehavior::failures()
            .into_iter()
            .map(|b| MockRuntime::with_behavior(b).build_and_run(&image()).unwrap_err().kind())
            .collect();
        assert_eq!(kinds, vec!["build", "container", "image_not_found", "api"]);
    }

    #[test]
    fn test_mock_stop_without_id() {
        let runtime = MockRuntime::new();
        assert!(matches!(runtime.stop_container(None), Err(RuntimeError::NotFound(_))));
        assert!(runtime.stop_container(Some("abc")).is_ok());
        assert_eq!(runtime.stopped_containers(), vec![None, Some("abc".to_string())]);
    }

    #[test]
    fn test_gate_holds_builds() {
        let runtime = MockRuntime::new();
        runtime.gate.close();

        let rt = runtime.clone();
        let worker = std::thread::spawn(move || rt.build_and_run(&image()));
        while runtime.builds_entered() == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(runtime.built_images().is_empty());

        runtime.gate.open();
        assert!(worker.join().unwrap().is_ok());
        assert_eq!(runtime.built_images().len(), 1);
    }
}
