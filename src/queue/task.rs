use crate::image_ops::processing::ResizeError;
use crate::store::naming::ImageArtifact;
use crate::utils::types::ReceiptId;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Unit of work for the pool: resize one uploaded original into `dest_dir/<owner>/`
#[derive(Debug, Clone)]
pub struct ResizeTask {
    pub artifact: ImageArtifact,
    pub dest_dir: PathBuf,
}

impl ResizeTask {
    pub fn new(artifact: ImageArtifact, dest_dir: impl Into<PathBuf>) -> Self {
        ResizeTask {
            artifact,
            dest_dir: dest_dir.into(),
        }
    }
}

/// Work the pool runs for every dequeued task
#[async_trait]
pub trait ArtifactGenerator {
    async fn generate(&self, task: &ResizeTask) -> Result<(), ResizeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Resize(#[from] ResizeError),
    /// Deadline passed, the operation itself may still be running
    #[error("resize did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("resize panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskError::TimedOut(_) => TaskStatus::TimedOut,
            TaskError::Resize(_) | TaskError::Panicked(_) => TaskStatus::Failed,
        }
    }
}

/// Outcome of one task as seen by the worker that ran it
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub receipt_id: ReceiptId,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl TaskReport {
    pub fn new(
        receipt_id: ReceiptId,
        result: &Result<(), TaskError>,
        elapsed: Duration,
    ) -> Self {
        let (status, error) = match result {
            Ok(()) => (TaskStatus::Completed, None),
            Err(err) => (err.status(), Some(err.to_string())),
        };
        TaskReport {
            receipt_id,
            status,
            error,
            elapsed,
        }
    }
}
