//! Shutdown coordination.

use crate::error::Result;
use crate::types::TaskState;

use super::TaskManager;

impl TaskManager {
    /// Gracefully shut down the manager
    ///
    /// Every `downloading` task is paused, which kills its wrapped program
    /// (or cancels its install) and persists it as `paused`, so the next run
    /// finds it resumable. Failures to pause one task are logged and the
    /// remaining tasks are still paused.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        let running: Vec<_> = self
            .get_tasks()
            .await
            .into_iter()
            .filter(|record| record.state == TaskState::Downloading)
            .map(|record| record.id)
            .collect();

        for id in running {
            if let Err(e) = self.pause_task(id).await {
                tracing::warn!(task_id = %id, error = %e, "Failed to pause task during shutdown");
            }
        }

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
