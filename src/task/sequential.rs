//! Two tasks run back to back

use super::{CompletionHandler, FailureHandler, ProgressHandler, Task};
use crate::error::Result;
use crate::listener::ListenerId;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Runs `first` and, once it completes, `second`
///
/// Progress comes from the first task only; completion from the second only,
/// so the composite is done when both phases are. Failures of either phase
/// are forwarded. The hand-off fires at most once per start, even when the
/// first task reports completion repeatedly.
///
/// Every control call bumps a run generation. The spawned hand-off only
/// starts the second task if the generation it was fired under is still
/// current, and it does so while holding the hand-off lock that `stop` and
/// `pause` also take. The installer is therefore either never started or
/// started and then stopped.
pub struct SequentialTask {
    first: Arc<dyn Task>,
    second: Arc<dyn Task>,
    armed: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    handoff: Arc<Mutex<()>>,
}

impl SequentialTask {
    /// Chain `second` after `first`
    pub fn new(first: Arc<dyn Task>, second: Arc<dyn Task>) -> Self {
        let armed = Arc::new(AtomicBool::new(false));
        let generation = Arc::new(AtomicU64::new(0));
        let handoff = Arc::new(Mutex::new(()));

        let next = second.clone();
        let gate = armed.clone();
        let current = generation.clone();
        let lock = handoff.clone();
        first.on_completed(Box::new(move || {
            if !gate.swap(false, Ordering::SeqCst) {
                debug!("duplicate completion of first phase ignored");
                return;
            }
            let fired_under = current.load(Ordering::SeqCst);
            let next = next.clone();
            let current = current.clone();
            let lock = lock.clone();
            tokio::spawn(async move {
                let _guard = lock.lock().await;
                if current.load(Ordering::SeqCst) != fired_under {
                    debug!("second phase hand-off superseded by stop or pause");
                    return;
                }
                if let Err(e) = next.start().await {
                    warn!(error = %e, "failed to start second phase");
                }
            });
        }));

        Self {
            first,
            second,
            armed,
            generation,
            handoff,
        }
    }

    fn arm(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.armed.store(false, Ordering::SeqCst);
    }

    async fn stop_second(&self) -> Result<()> {
        let _guard = self.handoff.lock().await;
        self.disarm();
        self.second.stop().await
    }
}

#[async_trait]
impl Task for SequentialTask {
    async fn start(&self) -> Result<()> {
        self.arm();
        if let Err(e) = self.first.start().await {
            self.disarm();
            return Err(e);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.disarm();
        self.first.stop().await?;
        self.stop_second().await
    }

    async fn pause(&self) -> Result<()> {
        self.disarm();
        self.first.pause().await?;
        self.stop_second().await
    }

    async fn resume(&self) -> Result<()> {
        self.arm();
        if let Err(e) = self.first.resume().await {
            self.disarm();
            return Err(e);
        }
        Ok(())
    }

    fn on_progress(&self, f: ProgressHandler) -> ListenerId {
        self.first.on_progress(f)
    }

    fn on_completed(&self, f: CompletionHandler) -> ListenerId {
        self.second.on_completed(f)
    }

    fn on_failed(&self, f: FailureHandler) -> ListenerId {
        let f: Arc<dyn Fn(&str) + Send + Sync> = Arc::from(f);
        let forward = f.clone();
        self.first.on_failed(Box::new(move |reason: &str| forward(reason)));
        self.second.on_failed(Box::new(move |reason: &str| f(reason)))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskEvents;
    use crate::types::TransferProgress;
    use std::time::Duration;

    /// Records control calls; completion and progress are fired by the test
    struct Scripted {
        name: &'static str,
        log: Arc<std::sync::Mutex<Vec<String>>>,
        events: TaskEvents,
    }

    impl Scripted {
        fn new(name: &'static str, log: Arc<std::sync::Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                log,
                events: TaskEvents::default(),
            })
        }

        fn record(&self, op: &str) {
            self.log.lock().unwrap().push(format!("{}.{op}", self.name));
        }
    }

    #[async_trait]
    impl Task for Scripted {
        async fn start(&self) -> Result<()> {
            self.record("start");
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            self.record("stop");
            Ok(())
        }
        async fn pause(&self) -> Result<()> {
            self.record("pause");
            Ok(())
        }
        async fn resume(&self) -> Result<()> {
            self.record("resume");
            Ok(())
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

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn first_completion_starts_second_once() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = Scripted::new("transfer", log.clone());
        let second = Scripted::new("install", log.clone());
        let task = SequentialTask::new(first.clone(), second.clone());

        task.start().await.unwrap();
        first.events.completed.emit(&());
        first.events.completed.emit(&());
        settle().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["transfer.start", "install.start"],
            "a repeated completion must not restart the installer"
        );
    }

    #[tokio::test]
    async fn only_second_completion_completes_composite() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = Scripted::new("transfer", log.clone());
        let second = Scripted::new("install", log);
        let task = SequentialTask::new(first.clone(), second.clone());
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        task.on_completed(Box::new(move || flag.store(true, Ordering::SeqCst)));

        task.start().await.unwrap();
        first.events.completed.emit(&());
        settle().await;
        assert!(!done.load(Ordering::SeqCst));

        second.events.completed.emit(&());
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn progress_comes_from_first_and_failures_from_both() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = Scripted::new("transfer", log.clone());
        let second = Scripted::new("install", log);
        let task = SequentialTask::new(first.clone(), second.clone());
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let sink = seen.clone();
        task.on_progress(Box::new(move |p: &TransferProgress| {
            sink.lock().unwrap().push(format!("progress {}", p.downloaded))
        }));
        let sink = seen.clone();
        task.on_failed(Box::new(move |reason: &str| sink.lock().unwrap().push(reason.to_string())));

        let progress = TransferProgress {
            downloaded: 7,
            ..Default::default()
        };
        first.events.progress.emit(&progress);
        second.events.progress.emit(&progress);
        first.events.failed.emit("transfer broke");
        second.events.failed.emit("install broke");

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["progress 7", "transfer broke", "install broke"]
        );
    }

    #[tokio::test]
    async fn pause_disarms_hand_off_and_stops_both() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = Scripted::new("transfer", log.clone());
        let second = Scripted::new("install", log.clone());
        let task = SequentialTask::new(first.clone(), second);

        task.start().await.unwrap();
        task.pause().await.unwrap();
        first.events.completed.emit(&());
        settle().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["transfer.start", "transfer.pause", "install.stop"]
        );

        task.resume().await.unwrap();
        first.events.completed.emit(&());
        settle().await;
        assert_eq!(
            log.lock().unwrap().last().map(String::as_str),
            Some("install.start")
        );
    }

    #[tokio::test]
    async fn pause_right_after_completion_keeps_installer_stopped() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = Scripted::new("transfer", log.clone());
        let second = Scripted::new("install", log.clone());
        let task = SequentialTask::new(first.clone(), second);

        task.start().await.unwrap();
        first.events.completed.emit(&());
        task.pause().await.unwrap();
        settle().await;

        let log = log.lock().unwrap().clone();
        assert_ne!(
            log.last().map(String::as_str),
            Some("install.start"),
            "installer started after pause returned: {log:?}"
        );
        assert_eq!(log, vec!["transfer.start", "transfer.pause", "install.stop"]);
    }

    #[tokio::test]
    async fn stop_after_hand_off_ran_stops_installer() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = Scripted::new("transfer", log.clone());
        let second = Scripted::new("install", log.clone());
        let task = SequentialTask::new(first.clone(), second);

        task.start().await.unwrap();
        first.events.completed.emit(&());
        settle().await;
        task.stop().await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["transfer.start", "install.start", "transfer.stop", "install.stop"]
        );
    }
}
