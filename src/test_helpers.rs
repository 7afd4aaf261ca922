//! Shared test helpers: fake wrapped programs, a fake archive tool and a
//! manager wired to them.

use crate::config::Config;
use crate::context::AppContext;
use crate::error::{ExtractionError, Result};
use crate::extraction::ArchiveTool;
use crate::manager::TaskManager;
use crate::pcs::PcsClient;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

/// In-memory stand-in for 7-Zip
///
/// `extract` records the call and creates the entries registered for the
/// archive as empty files under the destination.
#[derive(Default)]
pub(crate) struct FakeArchiveTool {
    listings: HashMap<PathBuf, Vec<String>>,
    delay: Option<Duration>,
    failure: Option<String>,
    calls: Mutex<Vec<(PathBuf, Option<String>)>>,
}

impl FakeArchiveTool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Entries reported (and created on extraction) for `archive`
    pub(crate) fn with_listing(mut self, archive: &Path, entries: &[&str]) -> Self {
        self.listings.insert(
            archive.to_path_buf(),
            entries.iter().map(|e| e.to_string()).collect(),
        );
        self
    }

    /// Make every extraction take `delay` unless cancelled
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every extraction fail with `reason`
    pub(crate) fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    /// Archives extracted so far, in order
    pub(crate) fn extracted(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().iter().map(|(a, _)| a.clone()).collect()
    }

    /// Passwords supplied to each extraction, in order
    pub(crate) fn passwords(&self) -> Vec<Option<String>> {
        self.calls.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
    }
}

#[async_trait]
impl ArchiveTool for FakeArchiveTool {
    async fn list(&self, archive: &Path) -> Result<Vec<String>> {
        Ok(self.listings.get(archive).cloned().unwrap_or_default())
    }

    async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((archive.to_path_buf(), password.map(str::to_string)));

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(ExtractionError::Cancelled {
                        archive: archive.to_path_buf(),
                    }
                    .into());
                }
            }
        }

        if let Some(reason) = &self.failure {
            return Err(ExtractionError::ExtractionFailed {
                archive: archive.to_path_buf(),
                reason: reason.clone(),
            }
            .into());
        }

        for entry in self.listings.get(archive).into_iter().flatten() {
            let path = dest.join(entry);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, b"").await?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// JSON of a `download_progress` message
pub(crate) fn progress_frame(downloaded: u64, total: u64) -> String {
    format!(
        r#"{{"session_id":"s1","type":"event","name":"download_progress","data":{{"id":"f1","downloaded":{downloaded},"total":{total},"speed":1024,"elapsed":1,"timeLeft":3}}}}"#
    )
}

/// JSON of a `download_exited` message
pub(crate) fn exit_frame(success: bool, error: &str) -> String {
    format!(
        r#"{{"session_id":"s1","type":"event","name":"download_exited","data":{{"success":{success},"error":"{error}"}}}}"#
    )
}

/// Write an executable `sh` script called `name` into `dir`
#[cfg(unix)]
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A fake transfer program that prints each frame followed by some human
/// readable noise, then runs `tail`
#[cfg(unix)]
pub(crate) fn fake_transfer_program(dir: &Path, frames: &[String], tail: &str) -> PathBuf {
    let mut body = String::from("#!/bin/sh\n[ \"$1\" = \"d\" ] || exit 2\n");
    for json in frames {
        body.push_str(&format!(
            "printf '\\nINC-PROTO-BEGIN\\n%s\\nINC-PROTO-END\\n' '{json}'\n"
        ));
        body.push_str("printf '[1] downloading...\\n'\n");
    }
    body.push_str(tail);
    write_script(dir, "fake-pcs", &body)
}

/// Helper to create a TaskManager over a store inside a fresh temp dir.
/// Returns the manager and the tempdir (which must be kept alive).
pub(crate) fn create_test_manager(
    pcs_path: &Path,
    tool: Arc<dyn ArchiveTool>,
) -> (TaskManager, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let manager = manager_over(temp_dir.path(), pcs_path, tool);
    (manager, temp_dir)
}

/// A TaskManager whose store and directories live under `root`
pub(crate) fn manager_over(root: &Path, pcs_path: &Path, tool: Arc<dyn ArchiveTool>) -> TaskManager {
    let mut config = Config::default();
    config.persistence.store_path = root.join("tasks.json");
    config.download.download_dir = root.join("downloads");
    config.download.install_dir = root.join("install");
    std::fs::create_dir_all(&config.download.download_dir).unwrap();
    std::fs::create_dir_all(&config.download.install_dir).unwrap();

    let ctx = AppContext::new(config, PcsClient::new(pcs_path), tool);
    TaskManager::new(ctx)
}
