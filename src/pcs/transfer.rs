//! Framed transfer protocol
//!
//! `BaiduPCS-Go d <panPath> --saveto <dir>` interleaves human-readable output
//! with framed JSON messages:
//!
//! ```text
//! \nINC-PROTO-BEGIN\n{"session_id":..,"type":..,"name":"download_progress","data":{..}}\nINC-PROTO-END\n
//! ```
//!
//! [`Transfer`] launches the program and runs a pump that reads through each
//! frame suffix, decodes complete frames with a [`FrameBuffer`] and
//! dispatches `download_progress` and `download_exited` messages to the
//! registered observers. Unknown message names are ignored.

use crate::error::{Error, ProcessError, ProtocolError, Result};
use crate::process::Process;
use crate::types::{ExitStatus, TransferProgress};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Opens a frame
pub const FRAME_PREFIX: &str = "\nINC-PROTO-BEGIN\n";
/// Closes a frame
pub const FRAME_SUFFIX: &str = "\nINC-PROTO-END\n";

/// The reader drops one character after each suffix, which is the leading
/// newline of a directly following prefix. Frames are therefore located by
/// the prefix without its newline.
const BEGIN_MARKER: &str = "INC-PROTO-BEGIN\n";

const PROGRESS_MESSAGE: &str = "download_progress";
const EXITED_MESSAGE: &str = "download_exited";

/// A decoded frame
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Session identifier chosen by the wrapped program
    #[serde(default)]
    pub session_id: String,
    /// Message category
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Message name, selects the payload shape
    pub name: String,
    /// Payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Accumulates output and yields complete frames
///
/// Text outside frames is discarded. An incomplete frame (or a partial
/// begin marker) at the end is kept for the next [`FrameBuffer::push`].
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and decode every frame that is now complete
    pub fn push(&mut self, chunk: &str) -> Vec<Message> {
        self.pending.push_str(chunk);

        let mut messages = Vec::new();
        let mut cursor = 0;
        let keep_from = loop {
            let Some(begin) = self.pending[cursor..].find(BEGIN_MARKER) else {
                let tail = partial_marker_len(&self.pending[cursor..], BEGIN_MARKER);
                break self.pending.len() - tail;
            };
            let body_start = cursor + begin + BEGIN_MARKER.len();
            let Some(body_len) = self.pending[body_start..].find(FRAME_SUFFIX) else {
                break cursor + begin;
            };
            let body = &self.pending[body_start..body_start + body_len];
            match serde_json::from_str::<Message>(body) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(error = %e, frame = body, "skipping malformed frame"),
            }
            cursor = body_start + body_len + FRAME_SUFFIX.len();
        };

        self.pending.drain(..keep_from);
        messages
    }

    /// Text held back for the next push
    pub fn pending(&self) -> &str {
        &self.pending
    }
}

/// Length of the longest proper prefix of `marker` that `text` ends with
fn partial_marker_len(text: &str, marker: &str) -> usize {
    (1..marker.len())
        .rev()
        .find(|&len| text.ends_with(&marker[..len]))
        .unwrap_or(0)
}

type ProgressHandler = Arc<dyn Fn(&TransferProgress) + Send + Sync>;
type CompletionHandler = Arc<dyn Fn() + Send + Sync>;
type FailureHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Observers {
    progress: Mutex<Option<ProgressHandler>>,
    completed: Mutex<Option<CompletionHandler>>,
    failed: Mutex<Option<FailureHandler>>,
    last_progress: Mutex<TransferProgress>,
    /// Set by `kill`, so a stream ending without an exit frame is not a failure
    killed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Observers {
    fn progress(&self, progress: TransferProgress) {
        *lock(&self.last_progress) = progress.clone();
        let handler = lock(&self.progress).clone();
        if let Some(f) = handler {
            f(&progress);
        }
    }

    fn completed(&self) {
        let handler = lock(&self.completed).clone();
        if let Some(f) = handler {
            f();
        }
    }

    fn failed(&self, message: &str) {
        let handler = lock(&self.failed).clone();
        if let Some(f) = handler {
            f(message);
        }
    }
}

/// A download driven through the framed protocol
///
/// One observer of each kind may be registered; registering another
/// replaces it. Completion is not guaranteed to fire only once per run.
pub struct Transfer {
    binary_path: PathBuf,
    observers: Arc<Observers>,
    process: Mutex<Option<Arc<Process>>>,
    pump: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("binary_path", &self.binary_path)
            .finish_non_exhaustive()
    }
}

impl Transfer {
    /// Create a transfer that launches `binary_path`
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            observers: Arc::new(Observers::default()),
            process: Mutex::new(None),
            pump: Mutex::new(None),
        }
    }

    /// Replace the progress observer
    pub fn on_progress(&self, f: impl Fn(&TransferProgress) + Send + Sync + 'static) {
        *lock(&self.observers.progress) = Some(Arc::new(f));
    }

    /// Replace the completion observer
    pub fn on_completed(&self, f: impl Fn() + Send + Sync + 'static) {
        *lock(&self.observers.completed) = Some(Arc::new(f));
    }

    /// Replace the failure observer
    ///
    /// Called with the program's error message when the exit frame reports
    /// failure, or when the program ends without an exit frame and without
    /// having been killed.
    pub fn on_failed(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        *lock(&self.observers.failed) = Some(Arc::new(f));
    }

    /// The most recent progress frame (zeroed before the first one)
    pub fn last_progress(&self) -> TransferProgress {
        lock(&self.observers.last_progress).clone()
    }

    /// Launch the download of `pan_path` into `save_dir` and start the pump
    pub async fn start(&self, pan_path: &str, save_dir: &Path) -> Result<()> {
        let mut process = Process::new(
            &self.binary_path,
            [
                "d".into(),
                pan_path.into(),
                "--saveto".into(),
                save_dir.as_os_str().to_owned(),
            ],
        );
        process.on_stdout(|chunk| trace!(output = chunk, "transfer output"));
        process.start()?;
        info!(pan_path, save_dir = ?save_dir, pid = process.pid(), "transfer started");

        let process = Arc::new(process);
        self.observers.killed.store(false, Ordering::SeqCst);
        let pump = tokio::spawn(pump(process.clone(), self.observers.clone()));

        *lock(&self.process) = Some(process);
        if let Some(previous) = lock(&self.pump).replace(pump) {
            previous.abort();
        }
        Ok(())
    }

    /// Kill the transfer program
    pub async fn kill(&self) -> Result<()> {
        let process = lock(&self.process)
            .clone()
            .ok_or(Error::Process(ProcessError::NotStarted))?;
        self.observers.killed.store(true, Ordering::SeqCst);
        process.kill().await
    }

    /// Wait for the pump to finish and return its outcome
    ///
    /// Resolves `Ok` when the stream ended cleanly, or with the transfer
    /// failure that stopped it.
    pub async fn finished(&self) -> Result<()> {
        let handle = lock(&self.pump)
            .take()
            .ok_or(Error::Process(ProcessError::NotStarted))?;
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::ExternalTool(format!("transfer pump aborted: {e}"))),
        }
    }
}

async fn pump(process: Arc<Process>, observers: Arc<Observers>) -> Result<()> {
    let mut frames = FrameBuffer::new();
    let mut exit_seen = false;

    loop {
        let chunk = match process.read_until(FRAME_SUFFIX, false).await {
            Ok(chunk) => chunk,
            Err(e) if e.is_end_of_stream() => break,
            Err(e) => return Err(e),
        };

        for message in frames.push(&chunk) {
            match message.name.as_str() {
                PROGRESS_MESSAGE => match serde_json::from_value::<TransferProgress>(message.data) {
                    Ok(progress) => observers.progress(progress),
                    Err(e) => warn!(error = %e, "malformed progress frame"),
                },
                EXITED_MESSAGE => {
                    exit_seen = true;
                    let status: ExitStatus =
                        serde_json::from_value(message.data).unwrap_or_else(|e| ExitStatus {
                            success: false,
                            error: format!("malformed exit frame: {e}"),
                        });
                    if status.success {
                        debug!("transfer reported success");
                        observers.completed();
                    } else {
                        warn!(error = %status.error, "transfer reported failure");
                        observers.failed(&status.error);
                        return Err(ProtocolError::TransferFailed {
                            message: status.error,
                        }
                        .into());
                    }
                }
                other => trace!(name = other, "ignoring frame"),
            }
        }
    }

    if !exit_seen && !observers.killed.load(Ordering::SeqCst) {
        let message = "transfer program exited without reporting a result";
        warn!(pid = process.pid(), "{message}");
        observers.failed(message);
        return Err(ProtocolError::TransferFailed {
            message: message.to_string(),
        }
        .into());
    }

    debug!(pid = process.pid(), "transfer stream ended");
    Ok(())
}
