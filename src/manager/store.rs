//! Persisted task store
//!
//! The whole record set lives in one pretty-printed JSON file:
//!
//! ```json
//! { "latestId": 2, "tasks": [ { "id": 1, "name": "...", "state": "paused", ... } ] }
//! ```
//!
//! Every mutation rewrites the file in full.

use crate::error::Result;
use crate::types::{TaskId, TaskRecord, TaskState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// All persisted task records plus the id counter
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskStore {
    /// Highest id handed out so far
    pub latest_id: u64,
    /// Records in insertion order
    pub tasks: Vec<TaskRecord>,
}

impl TaskStore {
    /// Read the store at `path`
    ///
    /// A missing or unreadable file yields an empty store. Records left in
    /// `downloading` by a previous run come back as `paused`, since no
    /// transfer survives a restart.
    pub async fn load(path: &Path) -> Self {
        let mut store = match tokio::fs::read_to_string(path).await {
            Ok(text) => match serde_json::from_str::<TaskStore>(&text) {
                Ok(store) => store,
                Err(e) => {
                    warn!(?path, error = %e, "task store is corrupt, starting empty");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?path, "no task store yet");
                Self::default()
            }
            Err(e) => {
                warn!(?path, error = %e, "failed to read task store, starting empty");
                Self::default()
            }
        };

        for record in &mut store.tasks {
            if record.state == TaskState::Downloading {
                debug!(task_id = %record.id, "stale downloading task marked paused");
                record.state = TaskState::Paused;
            }
        }
        store
    }

    /// Rewrite the store at `path`
    ///
    /// The JSON goes to a sibling temp file first and is renamed over the
    /// target, so readers never observe a half-written store.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Record with `id`
    pub fn get(&self, id: TaskId) -> Option<&TaskRecord> {
        self.tasks.iter().find(|r| r.id == id)
    }

    /// Mutable record with `id`
    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|r| r.id == id)
    }

    /// Allocate the next id; ids are never reused
    pub fn next_id(&mut self) -> TaskId {
        self.latest_id += 1;
        TaskId(self.latest_id)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
