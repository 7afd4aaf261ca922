//! Live task construction and the loop that applies task events to the store

use super::{Inner, ManagerState, now_millis};
use crate::task::{InstallTask, PanTransferTask, SequentialTask, Task};
use crate::types::{Event, InstallConfig, TaskId, TaskRecord, TaskSource, TaskState, TransferProgress};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What a live task reported
#[derive(Debug)]
pub(crate) enum TaskSignal {
    Progress {
        id: TaskId,
        progress: TransferProgress,
    },
    Completed {
        id: TaskId,
    },
    Failed {
        id: TaskId,
        reason: String,
    },
}

impl Inner {
    /// Build the live task for `record` and wire its observers to the
    /// signal channel
    pub(super) fn create_task(&self, record: &TaskRecord) -> Arc<dyn Task> {
        let config = self.ctx.config();

        let transfer: Arc<dyn Task> = match &record.source {
            TaskSource::Pan { pan_path } => Arc::new(
                PanTransferTask::new(
                    self.ctx.pcs().clone(),
                    pan_path.clone(),
                    &record.save_dir,
                    &record.local_path,
                    record.md5.clone(),
                )
                .verify_existing(config.download.verify_existing),
            ),
        };

        let installer: Arc<dyn Task> = match &record.install {
            InstallConfig::Archive { password } => Arc::new(
                InstallTask::new(
                    self.ctx.archive_tool(),
                    &record.local_path,
                    &record.install_dir,
                    password.clone(),
                )
                .with_nesting(
                    config.extraction.archive_extensions.clone(),
                    config.extraction.max_recursion_depth,
                ),
            ),
        };

        let task = SequentialTask::new(transfer, installer);
        let id = record.id;

        let tx = self.signal_tx.clone();
        task.on_progress(Box::new(move |progress: &TransferProgress| {
            tx.send(TaskSignal::Progress {
                id,
                progress: progress.clone(),
            })
            .ok();
        }));
        let tx = self.signal_tx.clone();
        task.on_completed(Box::new(move || {
            tx.send(TaskSignal::Completed { id }).ok();
        }));
        let tx = self.signal_tx.clone();
        task.on_failed(Box::new(move |reason: &str| {
            tx.send(TaskSignal::Failed {
                id,
                reason: reason.to_string(),
            })
            .ok();
        }));

        debug!(task_id = %id, name = %record.name, "live task created");
        Arc::new(task)
    }

    async fn apply_signal(&self, signal: TaskSignal) {
        let mut guard = self.lock_loaded().await;
        let state: &mut ManagerState = &mut guard;

        let event = match signal {
            TaskSignal::Progress { id, progress } => {
                let Some(record) = state.store.get_mut(id) else {
                    return;
                };
                record.progress = progress.clone();
                record.updated_at = now_millis();
                Event::TaskProgress { id, progress }
            }
            TaskSignal::Completed { id } => {
                let Some(record) = state.store.get_mut(id) else {
                    return;
                };
                // completion can be reported more than once per run
                if record.state != TaskState::Downloading {
                    debug!(task_id = %id, state = %record.state, "completion ignored");
                    return;
                }
                let now = now_millis();
                record.state = TaskState::Completed;
                record.completed_at = now;
                record.updated_at = now;
                info!(task_id = %id, name = %record.name, "download finished");
                state.live.remove(&id);
                Event::TaskStateChanged { id }
            }
            TaskSignal::Failed { id, reason } => {
                let Some(record) = state.store.get_mut(id) else {
                    return;
                };
                if record.state != TaskState::Downloading {
                    debug!(task_id = %id, state = %record.state, %reason, "failure ignored");
                    return;
                }
                record.state = TaskState::Error;
                record.updated_at = now_millis();
                warn!(task_id = %id, name = %record.name, %reason, "task failed");
                state.live.remove(&id);
                Event::TaskStateChanged { id }
            }
        };

        if let Err(e) = state.store.save(&self.store_path).await {
            warn!(path = ?self.store_path, error = %e, "failed to persist task store");
        }
        self.emit(event);
    }
}

/// Apply task signals in arrival order until the manager is dropped
pub(super) async fn apply_signals(
    inner: Weak<Inner>,
    mut signals: mpsc::UnboundedReceiver<TaskSignal>,
) {
    while let Some(signal) = signals.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.apply_signal(signal).await;
    }
    debug!("task signal loop finished");
}
