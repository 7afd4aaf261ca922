//! Task manager
//!
//! [`TaskManager`] owns the persisted record set and the live task objects
//! behind it. Every state change goes through one transition routine that
//! validates the current state, runs the task operation, persists the whole
//! store and broadcasts an [`Event`].
//!
//! ```text
//! waiting ──start──▶ downloading ──pause──▶ paused ──resume──▶ downloading
//!    ▲                  │  │  │                │
//!    └──────stop────────┘  │  └─ completed     ├─stop─▶ waiting
//!                          └──── error         └─cancel─▶ canceled
//! ```
//!
//! Live tasks are created lazily from their record on the first operation
//! (or eagerly by `add_task`) and report back through a signal channel that
//! a background loop applies to the store in arrival order.

mod control;
mod lifecycle;
mod store;
mod tasks;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use store::TaskStore;

use crate::context::AppContext;
use crate::task::Task;
use crate::types::{Event, TaskId, TaskRecord};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, broadcast, mpsc};

use tasks::TaskSignal;

/// Event buffer per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 1000;

/// Task registry and state machine
///
/// Cheap to clone; clones share the same registry.
///
/// # Examples
///
/// ```no_run
/// use pan_dl::{AppContext, Config, TaskManager, TaskParams};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ctx = AppContext::from_config(Config::load("pan-dl.json")?)?;
/// let manager = TaskManager::new(ctx);
///
/// let mut events = manager.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = events.recv().await {
///         println!("{:?}", event);
///     }
/// });
///
/// let params = TaskParams {
///     name: "Example".to_string(),
///     save_dir: "./downloads".into(),
///     install_dir: "./games/example".into(),
///     ..Default::default()
/// };
/// let id = manager.add_pan_task(params, "/games/example.zip").await?;
/// manager.start_task(id).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    ctx: AppContext,
    store_path: PathBuf,
    state: Mutex<ManagerState>,
    event_tx: broadcast::Sender<Event>,
    signal_tx: mpsc::UnboundedSender<TaskSignal>,
}

/// Everything guarded by the registry lock
#[derive(Default)]
struct ManagerState {
    store: TaskStore,
    loaded: bool,
    live: HashMap<TaskId, Arc<dyn Task>>,
}

impl TaskManager {
    /// Create a manager over the store named by the context's config
    ///
    /// The store is read lazily on first use. Must be called within a Tokio
    /// runtime: the loop that applies task events is spawned here.
    pub fn new(ctx: AppContext) -> Self {
        let store_path = ctx.config().persistence.store_path.clone();
        let (event_tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            ctx,
            store_path,
            state: Mutex::new(ManagerState::default()),
            event_tx,
            signal_tx,
        });
        tokio::spawn(tasks::apply_signals(Arc::downgrade(&inner), signal_rx));

        Self { inner }
    }

    /// Subscribe to state and progress events
    ///
    /// Each subscriber receives every event independently. A subscriber that
    /// falls more than 1000 events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.event_tx.subscribe()
    }

    /// Snapshot of one record
    pub async fn get_task(&self, id: TaskId) -> Option<TaskRecord> {
        self.inner.lock_loaded().await.store.get(id).cloned()
    }

    /// Snapshot of all records, in insertion order
    pub async fn get_tasks(&self) -> Vec<TaskRecord> {
        self.inner.lock_loaded().await.store.tasks.clone()
    }

    /// Path of the persisted store
    pub fn store_path(&self) -> &std::path::Path {
        &self.inner.store_path
    }
}

impl Inner {
    /// Lock the registry, reading the store on first access
    async fn lock_loaded(&self) -> MutexGuard<'_, ManagerState> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            state.store = TaskStore::load(&self.store_path).await;
            state.loaded = true;
            tracing::debug!(
                path = ?self.store_path,
                tasks = state.store.tasks.len(),
                "task store loaded"
            );
        }
        state
    }

    fn emit(&self, event: Event) {
        // no subscribers is fine
        self.event_tx.send(event).ok();
    }
}

/// Current time as unix milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
