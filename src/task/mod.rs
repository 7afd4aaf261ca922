//! Task abstraction and composition
//!
//! Every unit of work the manager drives implements [`Task`]: four control
//! operations plus progress, completion and failure observers.
//!
//! - [`PanTransferTask`]: downloads one remote file through the framed
//!   transfer protocol.
//! - [`InstallTask`]: recursively unpacks a downloaded archive.
//! - [`SequentialTask`]: runs a transfer and then an install as one task.

mod install;
mod sequential;
mod transfer;

pub use install::InstallTask;
pub use sequential::SequentialTask;
pub use transfer::PanTransferTask;

use crate::error::Result;
use crate::listener::{ListenerId, Listeners};
use crate::types::TransferProgress;
use async_trait::async_trait;

/// Progress observer
pub type ProgressHandler = Box<dyn Fn(&TransferProgress) + Send + Sync>;
/// Completion observer
pub type CompletionHandler = Box<dyn Fn() + Send + Sync>;
/// Failure observer, receives a human-readable reason
pub type FailureHandler = Box<dyn Fn(&str) + Send + Sync>;

/// A pausable, resumable unit of work
///
/// Control operations return once the work has been launched or halted;
/// outcomes are reported through the observers.
#[async_trait]
pub trait Task: Send + Sync {
    /// Begin the work
    async fn start(&self) -> Result<()>;

    /// Halt the work and discard partial results
    async fn stop(&self) -> Result<()>;

    /// Halt the work, keeping partial results
    async fn pause(&self) -> Result<()>;

    /// Continue paused work
    async fn resume(&self) -> Result<()>;

    /// Observe progress updates
    fn on_progress(&self, f: ProgressHandler) -> ListenerId;

    /// Observe completion; may fire more than once per run
    fn on_completed(&self, f: CompletionHandler) -> ListenerId;

    /// Observe failures that ended the work
    fn on_failed(&self, f: FailureHandler) -> ListenerId;
}

/// Observer registries shared by the task implementations
#[derive(Default)]
pub(crate) struct TaskEvents {
    pub(crate) progress: Listeners<TransferProgress>,
    pub(crate) completed: Listeners<()>,
    pub(crate) failed: Listeners<str>,
}

impl TaskEvents {
    pub(crate) fn on_progress(&self, f: ProgressHandler) -> ListenerId {
        self.progress.add(f)
    }

    pub(crate) fn on_completed(&self, f: CompletionHandler) -> ListenerId {
        self.completed.add(move |_| f())
    }

    pub(crate) fn on_failed(&self, f: FailureHandler) -> ListenerId {
        self.failed.add(f)
    }
}

/// Remove a file or directory tree, ignoring a path that does not exist
pub(crate) async fn remove_path(path: &std::path::Path) -> std::io::Result<()> {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
