//! Task control: add, start, stop, pause, resume, cancel, delete and restart.

use super::{TaskManager, now_millis};
use crate::error::{Result, TaskError};
use crate::task::remove_path;
use crate::types::{Event, TaskId, TaskParams, TaskRecord, TaskSource, TaskState};
use tracing::{info, warn};

/// A validated state change
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transition {
    Start,
    Stop,
    Pause,
    Resume,
    Cancel,
}

impl Transition {
    fn operation(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Stop => "stop",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Cancel => "cancel",
        }
    }

    /// States the transition may leave from
    fn sources(self) -> &'static [TaskState] {
        match self {
            Transition::Start => &[TaskState::Waiting, TaskState::Paused],
            Transition::Stop => &[TaskState::Downloading, TaskState::Paused],
            Transition::Pause => &[TaskState::Downloading],
            Transition::Resume => &[TaskState::Paused],
            Transition::Cancel => &[
                TaskState::Waiting,
                TaskState::Downloading,
                TaskState::Paused,
            ],
        }
    }

    fn target(self) -> TaskState {
        match self {
            Transition::Start | Transition::Resume => TaskState::Downloading,
            Transition::Stop => TaskState::Waiting,
            Transition::Pause => TaskState::Paused,
            Transition::Cancel => TaskState::Canceled,
        }
    }

    /// Whether the live task is discarded afterwards
    fn releases_task(self) -> bool {
        matches!(
            self,
            Transition::Stop | Transition::Pause | Transition::Cancel
        )
    }
}

impl TaskManager {
    /// Add a task in state `waiting`
    ///
    /// The record is persisted and its live task constructed, but nothing is
    /// started. Ids increase monotonically and are never reused. An empty
    /// `save_dir` falls back to the configured download directory, an empty
    /// `install_dir` to a folder named after the task under the configured
    /// install directory.
    pub async fn add_task(&self, params: TaskParams, source: TaskSource) -> Result<TaskId> {
        let params = self.with_default_dirs(params);
        let mut guard = self.inner.lock_loaded().await;
        let state = &mut *guard;

        let latest_id = state.store.latest_id;
        let id = state.store.next_id();
        let record = TaskRecord::new(id, params, source, now_millis());
        let task = self.inner.create_task(&record);
        let name = record.name.clone();

        state.store.tasks.push(record);
        if let Err(e) = state.store.save(&self.inner.store_path).await {
            state.store.tasks.pop();
            state.store.latest_id = latest_id;
            return Err(e);
        }
        state.live.insert(id, task);

        info!(task_id = %id, %name, "task added");
        Ok(id)
    }

    fn with_default_dirs(&self, mut params: TaskParams) -> TaskParams {
        let config = self.inner.ctx.config();
        if params.save_dir.as_os_str().is_empty() {
            params.save_dir = config.download_dir().clone();
        }
        if params.install_dir.as_os_str().is_empty() {
            params.install_dir = config.install_dir().join(&params.name);
        }
        params
    }

    /// Add a task that downloads `pan_path` from the pan
    pub async fn add_pan_task(
        &self,
        params: TaskParams,
        pan_path: impl Into<String>,
    ) -> Result<TaskId> {
        self.add_task(
            params,
            TaskSource::Pan {
                pan_path: pan_path.into(),
            },
        )
        .await
    }

    /// Start a waiting or paused task
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] for an unknown id, [`TaskError::InvalidState`]
    /// from any other state, or the error that kept the task from starting.
    /// The record is unchanged on error.
    pub async fn start_task(&self, id: TaskId) -> Result<()> {
        self.transition(id, Transition::Start).await
    }

    /// Stop a downloading or paused task, discarding the partial download
    ///
    /// The task goes back to `waiting`.
    pub async fn stop_task(&self, id: TaskId) -> Result<()> {
        self.transition(id, Transition::Stop).await
    }

    /// Pause a downloading task, keeping the partial download
    pub async fn pause_task(&self, id: TaskId) -> Result<()> {
        self.transition(id, Transition::Pause).await
    }

    /// Resume a paused task
    pub async fn resume_task(&self, id: TaskId) -> Result<()> {
        self.transition(id, Transition::Resume).await
    }

    /// Cancel a task that has not finished
    pub async fn cancel_task(&self, id: TaskId) -> Result<()> {
        self.transition(id, Transition::Cancel).await
    }

    /// Remove a task in any state
    ///
    /// A running task is stopped first. With `delete_files` the downloaded
    /// file is removed too; cleanup failures are logged, not returned.
    pub async fn delete_task(&self, id: TaskId, delete_files: bool) -> Result<()> {
        let mut guard = self.inner.lock_loaded().await;
        let state = &mut *guard;

        let index = state
            .store
            .tasks
            .iter()
            .position(|r| r.id == id)
            .ok_or(TaskError::NotFound { id })?;

        if let Some(task) = state.live.remove(&id) {
            let current = state.store.tasks[index].state;
            if matches!(current, TaskState::Downloading | TaskState::Paused)
                && let Err(e) = task.stop().await
            {
                warn!(task_id = %id, error = %e, "failed to stop task being deleted");
            }
        }

        let record = state.store.tasks.remove(index);
        if delete_files && let Err(e) = remove_path(&record.local_path).await {
            warn!(task_id = %id, path = ?record.local_path, error = %e, "failed to delete task files");
        }

        if let Err(e) = state.store.save(&self.inner.store_path).await {
            state.store.tasks.insert(index, record);
            return Err(e);
        }
        self.inner.emit(Event::TaskStateChanged { id });
        drop(guard);

        info!(task_id = %id, delete_files, "task deleted");
        Ok(())
    }

    /// Replace a task with a fresh copy and start it
    ///
    /// The old record is deleted (keeping its files) and a new `waiting`
    /// record with the same parameters is added under a new id, which is
    /// returned.
    pub async fn restart_task(&self, id: TaskId) -> Result<TaskId> {
        let record = self
            .get_task(id)
            .await
            .ok_or(TaskError::NotFound { id })?;

        self.delete_task(id, false).await?;
        let new_id = self.add_task(record.params(), record.source).await?;
        self.start_task(new_id).await?;

        info!(old_id = %id, task_id = %new_id, "task restarted");
        Ok(new_id)
    }

    /// The single transition routine
    ///
    /// Validates the current state, runs the operation against the live
    /// task (creating it if needed), then records the target state, persists
    /// and broadcasts. The registry stays locked throughout, so task events
    /// raised during the operation are applied (and broadcast) after the new
    /// state.
    async fn transition(&self, id: TaskId, transition: Transition) -> Result<()> {
        let mut guard = self.inner.lock_loaded().await;
        let state = &mut *guard;

        let record = state.store.get(id).ok_or(TaskError::NotFound { id })?;
        let from = record.state;
        if !transition.sources().contains(&from) {
            return Err(TaskError::InvalidState {
                id,
                operation: transition.operation().to_string(),
                current_state: from,
            }
            .into());
        }

        let task = match state.live.get(&id) {
            Some(task) => task.clone(),
            None => {
                let task = self.inner.create_task(record);
                state.live.insert(id, task.clone());
                task
            }
        };

        let result = match transition {
            Transition::Start => task.start().await,
            Transition::Stop => task.stop().await,
            Transition::Pause => task.pause().await,
            Transition::Resume => task.resume().await,
            // nothing runs yet
            Transition::Cancel if from == TaskState::Waiting => Ok(()),
            Transition::Cancel => task.stop().await,
        };

        if transition.releases_task() || result.is_err() {
            state.live.remove(&id);
        }
        if let Err(e) = result {
            warn!(task_id = %id, operation = transition.operation(), error = %e, "task operation failed");
            return Err(e);
        }

        let to = transition.target();
        let record = state
            .store
            .get_mut(id)
            .ok_or(TaskError::NotFound { id })?;
        record.state = to;
        record.updated_at = now_millis();
        let name = record.name.clone();

        state.store.save(&self.inner.store_path).await?;
        self.inner.emit(Event::TaskStateChanged { id });
        drop(guard);

        info!(task_id = %id, %from, %to, "task state changed");
        if transition == Transition::Start {
            info!(task_id = %id, %name, "download started");
        }
        Ok(())
    }
}
