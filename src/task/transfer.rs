//! Download of one remote file

use super::{CompletionHandler, FailureHandler, ProgressHandler, Task, TaskEvents, remove_path};
use crate::error::Result;
use crate::listener::ListenerId;
use crate::pcs::{PcsClient, Transfer};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Downloads `pan_path` into `save_dir` through BaiduPCS-Go
///
/// Each start launches a fresh transfer program; pause kills it and stop
/// additionally deletes the partial local file. When existing-file
/// verification is enabled and the local file already matches the expected
/// MD5, start reports completion without launching anything.
pub struct PanTransferTask {
    pcs: PcsClient,
    pan_path: String,
    save_dir: PathBuf,
    local_path: PathBuf,
    md5: String,
    verify_existing: bool,
    events: Arc<TaskEvents>,
    transfer: Mutex<Option<Transfer>>,
}

impl PanTransferTask {
    /// Create a task; `local_path` is where the transfer will leave the file
    pub fn new(
        pcs: PcsClient,
        pan_path: impl Into<String>,
        save_dir: impl Into<PathBuf>,
        local_path: impl Into<PathBuf>,
        md5: impl Into<String>,
    ) -> Self {
        Self {
            pcs,
            pan_path: pan_path.into(),
            save_dir: save_dir.into(),
            local_path: local_path.into(),
            md5: md5.into(),
            verify_existing: false,
            events: Arc::new(TaskEvents::default()),
            transfer: Mutex::new(None),
        }
    }

    /// Skip the transfer when the local file already has the expected MD5
    pub fn verify_existing(mut self, enabled: bool) -> Self {
        self.verify_existing = enabled;
        self
    }

    /// Where the downloaded file ends up
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    async fn already_downloaded(&self) -> bool {
        if !self.verify_existing || self.md5.is_empty() {
            return false;
        }
        match file_md5(&self.local_path).await {
            Ok(Some(digest)) if digest.eq_ignore_ascii_case(&self.md5) => true,
            Ok(Some(digest)) => {
                debug!(path = ?self.local_path, expected = %self.md5, actual = %digest, "local file differs");
                false
            }
            Ok(None) => false,
            Err(e) => {
                warn!(path = ?self.local_path, error = %e, "failed to hash existing file");
                false
            }
        }
    }
}

/// Hex MD5 of the file at `path`, `None` if it does not exist
async fn file_md5(path: &Path) -> std::io::Result<Option<String>> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        use std::io::Read;

        let mut file = match std::fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut context = md5::Context::new();
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            context.consume(&chunk[..n]);
        }
        Ok(Some(format!("{:x}", context.compute())))
    })
    .await
    .map_err(std::io::Error::other)?
}

#[async_trait]
impl Task for PanTransferTask {
    async fn start(&self) -> Result<()> {
        if self.already_downloaded().await {
            info!(path = ?self.local_path, "md5 matched, skipping transfer");
            self.events.completed.emit(&());
            return Ok(());
        }

        let transfer = self.pcs.downloader();
        let events = self.events.clone();
        transfer.on_progress(move |progress| events.progress.emit(progress));
        let events = self.events.clone();
        let local_path = self.local_path.clone();
        transfer.on_completed(move || {
            info!(path = ?local_path, "transfer completed");
            events.completed.emit(&());
        });
        let events = self.events.clone();
        transfer.on_failed(move |reason| events.failed.emit(reason));

        info!(pan_path = %self.pan_path, path = ?self.local_path, "starting transfer");
        transfer.start(&self.pan_path, &self.save_dir).await?;

        if let Some(previous) = self.transfer.lock().await.replace(transfer) {
            // only reachable when start is called twice without a pause
            if let Err(e) = previous.kill().await {
                debug!(error = %e, "previous transfer already gone");
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.pause().await?;
        if let Err(e) = remove_path(&self.local_path).await {
            warn!(path = ?self.local_path, error = %e, "failed to remove partial download");
        }
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        info!(pan_path = %self.pan_path, "pausing transfer");
        let Some(transfer) = self.transfer.lock().await.take() else {
            return Ok(());
        };
        match transfer.kill().await {
            Err(e) if !e.is_not_started() => Err(e),
            _ => Ok(()),
        }
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
