//! Tracks detached background tasks so none of them fails silently.
//!
//! Every spawned task is handed to a reaper that awaits its join handle and
//! logs the outcome. Errors and panics end up in the log with the build id
//! they belong to.

use crate::{OrchestratorError, Result};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Build,
    Stop,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Build => f.write_str("build"),
            TaskKind::Stop => f.write_str("stop"),
        }
    }
}

/// Identifies a background task in log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskLabel {
    pub kind: TaskKind,
    pub build_id: i64,
}

impl TaskLabel {
    pub fn build(build_id: i64) -> Self {
        Self {
            kind: TaskKind::Build,
            build_id,
        }
    }

    pub fn stop(build_id: i64) -> Self {
        Self {
            kind: TaskKind::Stop,
            build_id,
        }
    }
}

impl fmt::Display for TaskLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task for build {}", self.kind, self.build_id)
    }
}

type Tracked = (TaskLabel, JoinHandle<Result<()>>);
type Finished = (TaskLabel, std::result::Result<Result<()>, JoinError>);

pub struct TaskSupervisor {
    tx: Mutex<Option<mpsc::UnboundedSender<Tracked>>>,
    reaper: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("in_flight", &self.in_flight())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

impl TaskSupervisor {
    /// Start the reaper. Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (in_flight, _) = watch::channel(0usize);
        let in_flight = Arc::new(in_flight);
        let reaper = tokio::spawn(reap(rx, in_flight.clone()));

        Self {
            tx: Mutex::new(Some(tx)),
            reaper: tokio::sync::Mutex::new(Some(reaper)),
            in_flight,
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Tasks spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Reserve the right to spawn one task.
    ///
    /// While an admission is alive, [`TaskSupervisor::shutdown`] waits for
    /// it, so work recorded before shutdown began still gets its task.
    pub fn admit(&self) -> Result<Admission> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(OrchestratorError::ShuttingDown)?;
        Ok(Admission {
            tx: tx.clone(),
            in_flight: self.in_flight.clone(),
        })
    }

    /// Spawn `task` and hand it to the reaper.
    pub fn spawn<F>(&self, label: TaskLabel, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.admit()?.spawn(label, task);
        Ok(())
    }

    /// Resolve once every spawned task has finished and been reported.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Refuse new tasks, then wait for outstanding admissions and running tasks.
    pub async fn shutdown(&self) {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if tx.is_none() {
            return;
        }
        drop(tx);

        info!(in_flight = self.in_flight(), "Waiting for background tasks to finish");
        if let Some(reaper) = self.reaper.lock().await.take() {
            if let Err(e) = reaper.await {
                error!(error = %e, "Task reaper terminated abnormally");
            }
        }
        info!("All background tasks finished");
    }
}

/// Permission to spawn one supervised task, granted before shutdown began.
pub struct Admission {
    tx: mpsc::UnboundedSender<Tracked>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission").finish_non_exhaustive()
    }
}

impl Admission {
    pub fn spawn<F>(self, label: TaskLabel, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.in_flight.send_modify(|n| *n += 1);
        let handle = tokio::spawn(task);
        debug!(%label, "Background task spawned");

        if let Err(mpsc::error::SendError((label, _))) = self.tx.send((label, handle)) {
            // Reaper is gone; the task keeps running but nobody will log it.
            self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
            error!(%label, "Task reaper unavailable, outcome will not be reported");
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

async fn reap(mut rx: mpsc::UnboundedReceiver<Tracked>, in_flight: Arc<watch::Sender<usize>>) {
    let mut running: FuturesUnordered<BoxFuture<'static, Finished>> = FuturesUnordered::new();

    loop {
        tokio::select! {
            tracked = rx.recv() => match tracked {
                Some((label, handle)) => running.push(async move { (label, handle.await) }.boxed()),
                None => break,
            },
            Some((label, outcome)) = running.next(), if !running.is_empty() => {
                report(label, outcome);
                in_flight.send_modify(|n| *n = n.saturating_sub(1));
            }
        }
    }

    while let Some((label, outcome)) = running.next().await {
        report(label, outcome);
        in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
    debug!("Task reaper exiting");
}

fn report(label: TaskLabel, outcome: std::result::Result<Result<()>, JoinError>) {
    match outcome {
        Ok(Ok(())) => debug!(kind = %label.kind, build_id = label.build_id, "Background task completed"),
        Ok(Err(e)) => error!(
            kind = %label.kind,
            build_id = label.build_id,
            error = %e,
            "Background task failed"
        ),
        Err(e) if e.is_panic() => error!(
            kind = %label.kind,
            build_id = label.build_id,
            error = %e,
            "Background task panicked"
        ),
        Err(e) => warn!(
            kind = %label.kind,
            build_id = label.build_id,
            error = %e,
            "Background task cancelled"
        ),
    }
}
