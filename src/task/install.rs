//! Recursive archive installation

use super::{CompletionHandler, FailureHandler, ProgressHandler, Task, TaskEvents, remove_path};
use crate::error::Result;
use crate::extraction::{ArchiveTool, nested_archive};
use crate::listener::ListenerId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to unpack and where
struct InstallJob {
    archive: PathBuf,
    install_dir: PathBuf,
    password: Option<String>,
    tool: Arc<dyn ArchiveTool>,
    archive_extensions: Vec<String>,
    max_depth: usize,
}

impl InstallJob {
    /// Extract `archive` and return the nested archive it contained, if any
    async fn unpack(&self, archive: &Path, cancel: &CancellationToken) -> Result<Option<PathBuf>> {
        debug!(?archive, dest = ?self.install_dir, tool = self.tool.name(), "unpacking");
        self.tool
            .extract(archive, &self.install_dir, self.password.as_deref(), cancel)
            .await?;

        let entries = self.tool.list(archive).await?;
        let nested = nested_archive(&entries, &self.install_dir, &self.archive_extensions);
        if let Some(inner) = &nested {
            info!(?inner, "found nested archive");
        }
        Ok(nested)
    }

    /// Unpack until no nested archive is left. Returns false if cancelled.
    async fn run(&self, cancel: &CancellationToken) -> Result<bool> {
        info!(archive = ?self.archive, dest = ?self.install_dir, "install started");

        let mut nested = self.unpack(&self.archive, cancel).await?;
        let mut depth = 0;

        while let Some(inner) = nested {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            depth += 1;
            if depth > self.max_depth {
                warn!(
                    archive = ?inner,
                    max_depth = self.max_depth,
                    "nested archive depth limit reached, leaving archive in place"
                );
                break;
            }

            nested = self.unpack(&inner, cancel).await?;
            if let Err(e) = remove_path(&inner).await {
                warn!(path = ?inner, error = %e, "failed to remove intermediate archive");
            }
        }

        Ok(!cancel.is_cancelled())
    }
}

/// Unpacks a downloaded archive into the install directory
///
/// Start runs the unpack loop in the background and returns immediately.
/// After each step the archive manifest is inspected; if its first entry is
/// itself an archive, that one is unpacked next and then deleted. Stop
/// cancels the loop between steps and kills a running extraction. Pause is
/// the same as stop and resume the same as start.
pub struct InstallTask {
    job: Arc<InstallJob>,
    events: Arc<TaskEvents>,
    cancel: Mutex<CancellationToken>,
    running: Mutex<Option<JoinHandle<()>>>,
}

impl InstallTask {
    /// Create an installer for `archive`
    pub fn new(
        tool: Arc<dyn ArchiveTool>,
        archive: impl Into<PathBuf>,
        install_dir: impl Into<PathBuf>,
        password: Option<String>,
    ) -> Self {
        Self {
            job: Arc::new(InstallJob {
                archive: archive.into(),
                install_dir: install_dir.into(),
                password,
                tool,
                archive_extensions: vec!["zip".to_string(), "rar".to_string(), "7z".to_string()],
                max_depth: 8,
            }),
            events: Arc::new(TaskEvents::default()),
            cancel: Mutex::new(CancellationToken::new()),
            running: Mutex::new(None),
        }
    }

    /// Override nested archive detection (extensions without dots, recursion bound)
    pub fn with_nesting(mut self, archive_extensions: Vec<String>, max_depth: usize) -> Self {
        if let Some(job) = Arc::get_mut(&mut self.job) {
            job.archive_extensions = archive_extensions;
            job.max_depth = max_depth;
        }
        self
    }

    /// Wait for a running unpack loop to finish
    pub async fn wait(&self) {
        let handle = self.running.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "install loop panicked");
        }
    }
}

#[async_trait]
impl Task for InstallTask {
    async fn start(&self) -> Result<()> {
        let cancel = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.cancel.lock().await, cancel.clone());
        previous.cancel();

        let job = self.job.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            match job.run(&cancel).await {
                Ok(true) => {
                    info!(dest = ?job.install_dir, "install completed");
                    events.completed.emit(&());
                }
                Ok(false) => info!(archive = ?job.archive, "install stopped"),
                Err(_) if cancel.is_cancelled() => info!(archive = ?job.archive, "install stopped"),
                Err(e) => {
                    warn!(archive = ?job.archive, error = %e, "install failed");
                    events.failed.emit(&e.to_string());
                }
            }
        });

        if let Some(stale) = self.running.lock().await.replace(handle) {
            stale.abort();
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.lock().await.cancel();
        self.wait().await;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.stop().await
    }

    async fn resume(&self) -> Result<()> {
        self.start().await
    }

    fn on_progress(&self, f: ProgressHandler) -> ListenerId {
        self.events.on_progress(f)
    }

    fn on_completed(&self, f: CompletionHandler) -> ListenerId {
        self.events.on_completed(f)
    }

    fn on_failed(&self, f: FailureHandler) -> ListenerId {
        self.events.on_failed(f)
    }
}
