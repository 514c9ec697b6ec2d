//! Handle to a crypto job running on the blocking pool.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::{JobMode, JobOutput, JobStatus};
use crate::error::{Error, Result};

/// A running (or finished) file job.
///
/// Dropping the handle does not stop the job; call [`cancel`](Self::cancel)
/// for that.
#[derive(Debug)]
pub struct JobHandle {
    mode: JobMode,
    status: watch::Receiver<JobStatus>,
    cancel: CancellationToken,
    task: JoinHandle<Result<JobOutput>>,
}

impl JobHandle {
    pub(crate) const fn new(
        mode: JobMode,
        status: watch::Receiver<JobStatus>,
        cancel: CancellationToken,
        task: JoinHandle<Result<JobOutput>>,
    ) -> Self {
        Self {
            mode,
            status,
            cancel,
            task,
        }
    }

    pub const fn mode(&self) -> JobMode {
        self.mode
    }

    /// Latest reported status.
    pub fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    /// A receiver that is notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status.clone()
    }

    /// Request cooperative cancellation. Takes effect at the next chunk
    /// boundary; the destination is left untouched.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the job to finish.
    pub async fn wait(self) -> Result<JobOutput> {
        self.task.await.map_err(join_error)?
    }
}

pub(crate) fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(format!("background task failed: {e}")))
}
