//! Core types for pan-dl

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Unique identifier for a task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Lifecycle state of a persisted task
///
/// The state is the single source of truth for which operations are legal:
///
/// ```text
/// waiting -> downloading -> {paused, completed, canceled, error}
/// paused  -> {downloading, waiting, canceled}
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Added but not started (or stopped)
    #[default]
    Waiting,
    /// Transfer or install running
    Downloading,
    /// Transfer killed, resumable
    Paused,
    /// Transfer and install both finished
    Completed,
    /// Canceled by the user
    Canceled,
    /// The transfer or install reported a failure
    Error,
}

impl TaskState {
    /// Lowercase name, as persisted
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Downloading => "downloading",
            TaskState::Paused => "paused",
            TaskState::Completed => "completed",
            TaskState::Canceled => "canceled",
            TaskState::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress reported by the transfer program
///
/// Only the latest value per task is retained.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferProgress {
    /// Transfer identifier assigned by the wrapped program
    pub id: String,
    /// Bytes written so far
    pub downloaded: u64,
    /// Total size in bytes
    pub total: u64,
    /// Current speed in bytes per second
    pub speed: f64,
    /// Time elapsed since the transfer began
    pub elapsed: f64,
    /// Estimated time remaining
    pub time_left: f64,
}

impl TransferProgress {
    /// Completion percentage in `0.0..=100.0`, or 0 when the size is unknown
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.downloaded as f64 / self.total as f64 * 100.0).min(100.0)
        }
    }
}

/// Terminal status carried by the transfer program's exit frame
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Whether the transfer finished successfully
    #[serde(default)]
    pub success: bool,
    /// Error message when `success` is false
    #[serde(default)]
    pub error: String,
}

/// Where a task's payload comes from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TaskSource {
    /// A file stored on the remote pan
    #[serde(rename = "pan", rename_all = "camelCase")]
    Pan {
        /// Absolute path on the remote pan
        pan_path: String,
    },
}

impl TaskSource {
    /// File name the transfer produces inside the save directory
    pub fn file_name(&self) -> &str {
        match self {
            TaskSource::Pan { pan_path } => pan_path.rsplit('/').next().unwrap_or(pan_path),
        }
    }
}

/// How a downloaded payload gets installed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum InstallConfig {
    /// Recursively unpack an archive into the install directory
    #[serde(rename = "archive")]
    Archive {
        /// Password for encrypted archives
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
}

impl Default for InstallConfig {
    fn default() -> Self {
        InstallConfig::Archive { password: None }
    }
}

/// Caller-supplied parameters for a new task
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParams {
    /// Display name
    pub name: String,
    /// Artwork reference
    #[serde(default)]
    pub image_url: String,
    /// Directory the transfer writes into (empty: configured download dir)
    #[serde(default)]
    pub save_dir: PathBuf,
    /// Expected MD5 of the downloaded file (hex, may be empty)
    #[serde(default)]
    pub md5: String,
    /// Directory the payload is installed into (empty: derived from config)
    #[serde(default)]
    pub install_dir: PathBuf,
    /// Install-time configuration
    #[serde(default)]
    pub install: InstallConfig,
}

/// Persisted task record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Task ID
    pub id: TaskId,
    /// Display name
    pub name: String,
    /// Artwork reference
    #[serde(default)]
    pub image_url: String,
    /// Directory the transfer writes into
    pub save_dir: PathBuf,
    /// Expected MD5 of the downloaded file
    #[serde(default)]
    pub md5: String,
    /// Resolved path of the downloaded file
    pub local_path: PathBuf,
    /// Creation time (unix milliseconds)
    pub created_at: i64,
    /// Last mutation time (unix milliseconds)
    pub updated_at: i64,
    /// Completion time (unix milliseconds, 0 while incomplete)
    #[serde(default)]
    pub completed_at: i64,
    /// Source locator
    pub source: TaskSource,
    /// Directory the payload is installed into
    pub install_dir: PathBuf,
    /// Install-time configuration
    #[serde(default)]
    pub install: InstallConfig,
    /// Lifecycle state
    pub state: TaskState,
    /// Latest reported transfer progress
    #[serde(default)]
    pub progress: TransferProgress,
}

impl TaskRecord {
    /// Build a fresh `waiting` record with zeroed progress
    pub fn new(id: TaskId, params: TaskParams, source: TaskSource, now: i64) -> Self {
        let local_path = local_path_for(&params.save_dir, &source);
        Self {
            id,
            name: params.name,
            image_url: params.image_url,
            save_dir: params.save_dir,
            md5: params.md5,
            local_path,
            created_at: now,
            updated_at: now,
            completed_at: 0,
            source,
            install_dir: params.install_dir,
            install: params.install,
            state: TaskState::Waiting,
            progress: TransferProgress::default(),
        }
    }

    /// The parameters this record was created from
    pub fn params(&self) -> TaskParams {
        TaskParams {
            name: self.name.clone(),
            image_url: self.image_url.clone(),
            save_dir: self.save_dir.clone(),
            md5: self.md5.clone(),
            install_dir: self.install_dir.clone(),
            install: self.install.clone(),
        }
    }
}

/// Local destination of a source inside `save_dir`
pub fn local_path_for(save_dir: &Path, source: &TaskSource) -> PathBuf {
    save_dir.join(source.file_name())
}

/// Verification channel offered by the login flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyChannel {
    /// Receive the code by SMS
    Phone,
    /// Receive the code by e-mail
    Email,
}

impl VerifyChannel {
    /// The menu choice the login program expects
    pub fn as_choice(&self) -> &'static str {
        match self {
            VerifyChannel::Phone => "1",
            VerifyChannel::Email => "2",
        }
    }
}

/// One round-trip of the interactive login
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum LoginStep {
    /// No session yet; supply user name and password
    AwaitCredentials,
    /// The program wants the text of a captcha image
    AwaitCaptcha {
        /// Path of the captcha image saved on disk
        local_image_path: String,
        /// URL of the same captcha image
        remote_image_url: String,
    },
    /// The program asks whether to verify by phone or e-mail
    AwaitVerificationChannelChoice {
        /// Masked phone number
        phone: String,
        /// Masked e-mail address
        email: String,
    },
    /// The program waits for the code that was sent
    AwaitVerificationCode,
    /// Logged in
    Success,
    /// The login program ended without success
    Failed,
}

/// Event emitted by the task manager
///
/// Consumers subscribe via [`crate::TaskManager::subscribe`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A task's record changed state, was added back, or was deleted
    TaskStateChanged {
        /// Task ID
        id: TaskId,
    },

    /// A task reported transfer progress
    TaskProgress {
        /// Task ID
        id: TaskId,
        /// The progress that was persisted
        progress: TransferProgress,
    },
}
