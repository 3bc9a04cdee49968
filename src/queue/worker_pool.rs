//! Bounded resize queue serviced by a fixed set of workers.
//!
//! Submission never waits: a full buffer is reported to the caller right away. Each task
//! runs under a deadline, a task that misses it is reported as timed out and left to finish
//! in the background while the worker moves on. Such abandoned operations keep holding an
//! in-flight permit, so at most `worker_count + max_abandoned_resizes` of them run at once.

use crate::config::PoolConfig;
use crate::queue::task::{ArtifactGenerator, ResizeTask, TaskError, TaskReport, TaskStatus};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, error, info, info_span, warn};

/// Receives a report for every task a worker finished with, whatever the outcome
pub type TaskFinishedSender = mpsc::UnboundedSender<TaskReport>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("resize queue is full")]
    QueueFull,
    #[error("resize queue is closed")]
    Closed,
}

type SharedSender = Arc<RwLock<Option<mpsc::Sender<ResizeTask>>>>;

pub struct WorkerPool {
    sender: SharedSender,
    receiver: Arc<Mutex<mpsc::Receiver<ResizeTask>>>,
    pending: Arc<AtomicUsize>,
    in_flight: Arc<Semaphore>,
    generator: Arc<dyn ArtifactGenerator + Send + Sync>,
    config: PoolConfig,
    task_finished_tx: Option<TaskFinishedSender>,
}

impl WorkerPool {
    pub fn new(config: &PoolConfig, generator: Arc<dyn ArtifactGenerator + Send + Sync>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.get());
        let permits = config.in_flight_permits().unwrap_or_else(|err| {
            warn!("{err}, capping in-flight resizes");
            Semaphore::MAX_PERMITS
        });

        WorkerPool {
            sender: Arc::new(RwLock::new(Some(tx))),
            receiver: Arc::new(Mutex::new(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(Semaphore::new(permits)),
            generator,
            config: config.clone(),
            task_finished_tx: None,
        }
    }

    pub fn with_task_finished(mut self, tx: TaskFinishedSender) -> Self {
        self.task_finished_tx = Some(tx);
        self
    }

    /// Enqueues without waiting, `false` when the task was not accepted
    pub fn submit(&self, task: ResizeTask) -> bool {
        let receipt_id = task.artifact.receipt_id.clone();
        match self.try_submit(task) {
            Ok(()) => true,
            Err(err) => {
                warn!(receipt_id = %receipt_id, "Rejected resize task: {err}");
                false
            }
        }
    }

    pub fn try_submit(&self, task: ResizeTask) -> Result<(), SubmitError> {
        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return Err(SubmitError::Closed);
        };

        // counted before sending so a fast worker never decrements first
        self.pending.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                match err {
                    TrySendError::Full(_) => Err(SubmitError::QueueFull),
                    TrySendError::Closed(_) => Err(SubmitError::Closed),
                }
            }
        }
    }

    /// Tasks accepted but not yet picked up by a worker
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Spawns the workers. Call once, the returned handle is the only way to stop them
    pub fn start(&self) -> PoolHandle {
        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.worker_count.get() {
            let worker = Worker {
                receiver: self.receiver.clone(),
                pending: self.pending.clone(),
                in_flight: self.in_flight.clone(),
                generator: self.generator.clone(),
                timeout: self.config.resize_timeout,
                task_finished_tx: self.task_finished_tx.clone(),
            };
            workers.spawn(worker.run().instrument(info_span!("resize_worker", worker_id)));
        }
        info!(
            "Started {} resize workers, queue capacity {}, timeout {:?}",
            self.config.worker_count, self.config.queue_capacity, self.config.resize_timeout
        );

        let (stop, stop_rx) = watch::channel(false);
        let drained = tokio::spawn(supervise(
            stop_rx,
            self.sender.clone(),
            self.pending.clone(),
            workers,
        ));

        PoolHandle { stop, drained }
    }
}

/// Closes the queue once asked to (or once the handle is gone) and waits for the workers
async fn supervise(
    mut stop_rx: watch::Receiver<bool>,
    sender: SharedSender,
    pending: Arc<AtomicUsize>,
    mut workers: JoinSet<()>,
) {
    while !*stop_rx.borrow_and_update() {
        if stop_rx.changed().await.is_err() {
            break;
        }
    }

    sender
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    info!(
        "Resize queue closed, draining {} pending tasks",
        pending.load(Ordering::SeqCst)
    );

    while let Some(result) = workers.join_next().await {
        if let Err(err) = result {
            error!("Resize worker crashed: {err}");
        }
    }
    info!("Resize queue drained");
}

pub struct PoolHandle {
    stop: watch::Sender<bool>,
    drained: JoinHandle<()>,
}

impl PoolHandle {
    /// Stops accepting tasks and resolves once every accepted task was handled.
    /// Timed out operations still running in background are not waited for
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.drained.await {
            error!("Resize queue supervisor failed: {err}");
        }
    }
}

struct Worker {
    receiver: Arc<Mutex<mpsc::Receiver<ResizeTask>>>,
    pending: Arc<AtomicUsize>,
    in_flight: Arc<Semaphore>,
    generator: Arc<dyn ArtifactGenerator + Send + Sync>,
    timeout: Duration,
    task_finished_tx: Option<TaskFinishedSender>,
}

impl Worker {
    async fn run(self) {
        loop {
            // no task is taken off the queue while the in-flight bound is reached
            let Ok(permit) = self.in_flight.clone().acquire_owned().await else {
                break;
            };
            let task = self.receiver.lock().await.recv().await;
            let Some(task) = task else {
                break;
            };
            self.pending.fetch_sub(1, Ordering::SeqCst);

            self.process(task, permit).await;
        }
        info!("Resize worker stopped");
    }

    async fn process(&self, task: ResizeTask, permit: OwnedSemaphorePermit) {
        let receipt_id = task.artifact.receipt_id.clone();
        let owner = task.artifact.owner.clone();
        let generator = self.generator.clone();

        let start = Instant::now();
        let mut operation = tokio::spawn(async move {
            let _permit = permit;
            generator.generate(&task).await
        });

        // dropping the join handle on timeout detaches the operation, it is not aborted
        let result = match tokio::time::timeout(self.timeout, &mut operation).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(TaskError::Resize(err)),
            Ok(Err(join_err)) => Err(TaskError::Panicked(join_err.to_string())),
            Err(_) => Err(TaskError::TimedOut(self.timeout)),
        };
        let elapsed = start.elapsed();

        let report = TaskReport::new(receipt_id, &result, elapsed);
        let elapsed_ms = elapsed.as_millis() as u64;
        match (&result, report.status) {
            (Ok(()), _) => info!(
                receipt_id = %report.receipt_id, owner = %owner, elapsed_ms,
                "Resize completed"
            ),
            (Err(err), TaskStatus::TimedOut) => warn!(
                receipt_id = %report.receipt_id, owner = %owner, elapsed_ms,
                "Resize timed out: {err}"
            ),
            (Err(err), _) => error!(
                receipt_id = %report.receipt_id, owner = %owner, elapsed_ms,
                "Resize failed: {err}"
            ),
        }

        if let Some(tx) = &self.task_finished_tx {
            let _ = tx.send(report);
        }
    }
}
