//! Subprocess channel
//!
//! [`Process`] spawns an external program and exposes its standard output as
//! an append-only buffer that readers consume from the front:
//!
//! - [`Process::read_until`] blocks until a delimiter shows up in the buffer
//!   (or the process exits, or a timeout elapses) and removes the matched
//!   prefix.
//! - [`Process::read_all`] drains whatever is buffered.
//! - Stdout observers see every raw chunk independently of consumption.
//!
//! A background reader task appends chunks to the buffer, and a watcher task
//! owns the child and raises the exited flag once the child is gone and its
//! output has been fully drained.

use crate::error::{ProcessError, Result};
use crate::listener::{ListenerId, Listeners};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// How long the exit watcher waits for stdout to reach EOF after the child is gone.
/// A grandchild that inherited the pipe can keep it open indefinitely.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// State shared between a started [`Process`] and its background tasks
struct Running {
    pid: Option<u32>,
    buffer: Mutex<String>,
    exited: AtomicBool,
    /// Bumped on every appended chunk and once more on exit
    version: watch::Sender<u64>,
    stdin: Mutex<Option<ChildStdin>>,
    kill: CancellationToken,
    /// Serializes blocking reads
    read_lock: Mutex<()>,
}

impl Running {
    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// A spawned external program with a consumable output buffer
pub struct Process {
    program: PathBuf,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
    stdout_listeners: Arc<Listeners<str>>,
    exit_listeners: Arc<Listeners<()>>,
    running: Option<Arc<Running>>,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("pid", &self.pid())
            .field("exited", &self.exited())
            .finish()
    }
}

impl Process {
    /// Describe a process without launching it
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            stdout_listeners: Arc::new(Listeners::new()),
            exit_listeners: Arc::new(Listeners::new()),
            running: None,
        }
    }

    /// Run the program from `dir` instead of the current directory
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The program path used to launch the process
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The argument vector used to launch the process
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Launch the program
    ///
    /// Must be called from within a tokio runtime. Calling `start` on a
    /// process that is already running does nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            debug!(program = ?self.program, "process already started");
            return Ok(());
        }

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| ProcessError::LaunchFailed {
            program: self.program.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        let (version, _) = watch::channel(0u64);
        let running = Arc::new(Running {
            pid,
            buffer: Mutex::new(String::new()),
            exited: AtomicBool::new(false),
            version,
            stdin: Mutex::new(child.stdin.take()),
            kill: CancellationToken::new(),
            read_lock: Mutex::new(()),
        });

        debug!(program = ?self.program, args = ?self.args, pid, "process started");

        let reader = child.stdout.take().map(|stdout| {
            tokio::spawn(read_stdout(
                stdout,
                running.clone(),
                self.stdout_listeners.clone(),
            ))
        });
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr, pid));
        }
        tokio::spawn(watch_exit(
            child,
            reader,
            running.clone(),
            self.exit_listeners.clone(),
        ));

        self.running = Some(running);
        Ok(())
    }

    fn running(&self) -> Result<&Arc<Running>> {
        self.running
            .as_ref()
            .ok_or_else(|| ProcessError::NotStarted.into())
    }

    /// True once `start` has succeeded
    pub fn started(&self) -> bool {
        self.running.is_some()
    }

    /// True once the process has exited and all of its output is buffered
    pub fn exited(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| r.exited.load(Ordering::Acquire))
    }

    /// OS process id, if started
    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().and_then(|r| r.pid)
    }

    /// Register an observer for raw stdout chunks
    pub fn on_stdout(&self, f: impl Fn(&str) + Send + Sync + 'static) -> ListenerId {
        self.stdout_listeners.add(f)
    }

    /// Unregister a stdout observer
    pub fn remove_stdout_listener(&self, id: ListenerId) -> bool {
        self.stdout_listeners.remove(id)
    }

    /// Register an observer for process exit
    ///
    /// Observers registered after the process exited are never called; use
    /// [`Process::wait`] to await exit instead.
    pub fn on_exit(&self, f: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.exit_listeners.add(move |_| f())
    }

    /// Unregister an exit observer
    pub fn remove_exit_listener(&self, id: ListenerId) -> bool {
        self.exit_listeners.remove(id)
    }

    /// Write to the process input
    pub async fn write(&self, data: &str) -> Result<()> {
        let running = self.running()?;
        let mut stdin = running.stdin.lock().await;
        let pipe = stdin.as_mut().ok_or_else(|| {
            ProcessError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdin is closed",
            ))
        })?;
        pipe.write_all(data.as_bytes())
            .await
            .map_err(ProcessError::Io)?;
        pipe.flush().await.map_err(ProcessError::Io)?;
        Ok(())
    }

    /// Forcibly terminate the process and wait until it has exited
    pub async fn kill(&self) -> Result<()> {
        let running = self.running()?;
        debug!(pid = running.pid, "killing process");
        running.kill.cancel();
        self.wait().await
    }

    /// Wait for the process to exit. Returns immediately if it already has.
    pub async fn wait(&self) -> Result<()> {
        let running = self.running()?;
        let mut version = running.version.subscribe();
        while !running.exited.load(Ordering::Acquire) {
            if version.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// True if any unconsumed output is buffered
    pub async fn has_stdout(&self) -> Result<bool> {
        let running = self.running()?;
        Ok(!running.buffer.lock().await.is_empty())
    }

    /// Drain and return the whole buffer
    pub async fn read_all(&self) -> Result<String> {
        let running = self.running()?;
        Ok(std::mem::take(&mut *running.buffer.lock().await))
    }

    /// Block until `delimiter` appears in the buffer and consume through it
    ///
    /// Returns the buffer up to and including the delimiter; the delimiter
    /// and one character after it are removed from the buffer. With
    /// `until_exit`, process exit also ends the read and returns whatever is
    /// buffered. Fails with end-of-stream when the process has exited and
    /// the delimiter can no longer arrive.
    pub async fn read_until(&self, delimiter: &str, until_exit: bool) -> Result<String> {
        Ok(self
            .read_until_timeout(delimiter, until_exit, None)
            .await?
            .unwrap_or_default())
    }

    /// [`Process::read_until`] with an optional timeout
    ///
    /// Returns `Ok(None)` when the timeout elapsed before the delimiter (or,
    /// with `until_exit`, the exit) was seen. The buffer is left untouched in
    /// that case.
    pub async fn read_until_timeout(
        &self,
        delimiter: &str,
        until_exit: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        let running = self.running()?;
        let _guard = running.read_lock.lock().await;

        let read = read_until_inner(running, delimiter, until_exit);
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(result) => result.map(Some),
                Err(_) => {
                    trace!(pid = running.pid, ?limit, "read timed out");
                    Ok(None)
                }
            },
            None => read.await.map(Some),
        }
    }

    /// Read one newline-terminated line
    pub async fn read_line(&self, until_exit: bool) -> Result<String> {
        self.read_until("\n", until_exit).await
    }

    /// [`Process::read_line`] with an optional timeout
    pub async fn read_line_timeout(
        &self,
        until_exit: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<String>> {
        self.read_until_timeout("\n", until_exit, timeout).await
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if let Some(running) = &self.running
            && !running.exited.load(Ordering::Acquire)
        {
            trace!(pid = running.pid, "process handle dropped, killing child");
            running.kill.cancel();
        }
    }
}

async fn read_until_inner(running: &Running, delimiter: &str, until_exit: bool) -> Result<String> {
    let mut version = running.version.subscribe();
    loop {
        version.borrow_and_update();
        // load before scanning: a set flag guarantees the buffer is complete
        let exited = running.exited.load(Ordering::Acquire);

        {
            let mut buffer = running.buffer.lock().await;
            if let Some(content) = take_through(&mut buffer, delimiter) {
                return Ok(content);
            }
            if exited {
                if until_exit && !buffer.is_empty() {
                    return Ok(std::mem::take(&mut *buffer));
                }
                return Err(ProcessError::EndOfStream.into());
            }
        }

        if version.changed().await.is_err() {
            return Err(ProcessError::EndOfStream.into());
        }
    }
}

/// Remove everything through the first `delimiter` plus one trailing
/// character from `buffer`, returning the part through the delimiter.
pub(crate) fn take_through(buffer: &mut String, delimiter: &str) -> Option<String> {
    let start = buffer.find(delimiter)?;
    let end = start + delimiter.len();
    let content = buffer[..end].to_string();
    let skip = buffer[end..].chars().next().map_or(0, char::len_utf8);
    buffer.drain(..end + skip);
    Some(content)
}

/// Decode as much of `pending` as forms complete UTF-8, keeping a trailing
/// partial sequence for the next chunk.
pub(crate) fn decode_utf8(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_owned();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let tail = pending.split_off(e.valid_up_to());
            let text = String::from_utf8_lossy(pending).into_owned();
            *pending = tail;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

async fn read_stdout(
    mut stdout: impl AsyncRead + Unpin,
    running: Arc<Running>,
    listeners: Arc<Listeners<str>>,
) {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut pending = Vec::new();

    loop {
        let n = match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(pid = running.pid, error = %e, "failed to read process stdout");
                break;
            }
        };
        pending.extend_from_slice(&chunk[..n]);

        let text = decode_utf8(&mut pending);
        if text.is_empty() {
            continue;
        }
        running.buffer.lock().await.push_str(&text);
        running.bump();
        listeners.emit(&text);
    }

    if !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending).into_owned();
        running.buffer.lock().await.push_str(&text);
        running.bump();
        listeners.emit(&text);
    }
}

async fn drain_stderr(mut stderr: impl AsyncRead + Unpin, pid: Option<u32>) {
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                debug!(pid, stderr = %String::from_utf8_lossy(&chunk[..n]), "process stderr");
            }
        }
    }
}

async fn watch_exit(
    mut child: Child,
    reader: Option<JoinHandle<()>>,
    running: Arc<Running>,
    exit_listeners: Arc<Listeners<()>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = running.kill.cancelled() => {
            if let Err(e) = child.start_kill() {
                debug!(pid = running.pid, error = %e, "kill signal not delivered");
            }
            child.wait().await
        }
    };

    match status {
        Ok(status) => debug!(pid = running.pid, %status, "process exited"),
        Err(e) => warn!(pid = running.pid, error = %e, "failed to wait for process"),
    }

    if let Some(mut reader) = reader
        && tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, &mut reader).await.is_err()
    {
        warn!(
            pid = running.pid,
            "stdout still open after exit, treating stream as ended"
        );
        // a grandchild may still hold the pipe; nothing may be appended
        // once `exited` is raised
        reader.abort();
        let _ = reader.await;
    }

    running.stdin.lock().await.take();
    running.exited.store(true, Ordering::Release);
    running.bump();
    exit_listeners.emit(&());
}

/// Run a program to completion and return everything it printed
pub async fn run_command<I, S>(program: impl Into<PathBuf>, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut process = Process::new(program, args);
    process.start()?;
    process.wait().await?;
    process.read_all().await
}
