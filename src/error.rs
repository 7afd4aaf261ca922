//! Error types for pan-dl
//!
//! This module provides the error hierarchy for the library:
//! - Domain-specific error types (process, protocol, task, extraction)
//! - A top-level [`Error`] that wraps them through `#[from]` conversions
//! - Helpers for the sentinel conditions callers branch on (end of stream,
//!   not started, illegal transition)

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{TaskId, TaskState};

/// Result type alias for pan-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for pan-dl
///
/// Each variant carries enough context to diagnose the failure without the
/// caller having to re-derive which subprocess or task was involved.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "tools.pcs_path")
        key: Option<String>,
    },

    /// Subprocess channel error
    #[error("process error: {0}")]
    Process(#[from] ProcessError),

    /// Wrapped program produced output the protocol layer could not accept
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Task registry or transition error
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Archive listing or extraction error
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, unknown task kind, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    /// True when a blocking read found the stream closed with nothing left to consume
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::Process(ProcessError::EndOfStream))
    }

    /// True when an operation was attempted on a subprocess or session that was never started
    pub fn is_not_started(&self) -> bool {
        matches!(self, Error::Process(ProcessError::NotStarted))
    }

    /// True when a task transition was rejected because of the task's current state
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Error::Task(TaskError::InvalidState { .. }))
    }
}

/// Subprocess channel errors
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be spawned
    #[error("failed to launch {program}: {reason}")]
    LaunchFailed {
        /// The program that failed to start
        program: PathBuf,
        /// The reason the spawn failed
        reason: String,
    },

    /// Operation attempted before the process was started
    #[error("process not started")]
    NotStarted,

    /// The process exited and its output holds nothing more to read
    #[error("end of stream")]
    EndOfStream,

    /// Writing to the process input failed
    #[error("process I/O failed: {0}")]
    Io(#[source] std::io::Error),
}

/// Errors raised while interpreting a wrapped program's output
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Login output matched none of the known prompts
    #[error("unrecognized prompt: {text}")]
    UnrecognizedPrompt {
        /// The raw text that was read up to the prompt sentinel
        text: String,
    },

    /// No prompt arrived within the configured step timeout
    #[error("no prompt received within {seconds}s")]
    PromptTimedOut {
        /// The timeout that elapsed, in seconds
        seconds: u64,
    },

    /// The transfer program reported a failed exit status
    #[error("transfer failed: {message}")]
    TransferFailed {
        /// The error message carried by the exit frame
        message: String,
    },

    /// A one-shot command printed something other than the expected result
    #[error("unexpected output from `{command}`: {output}")]
    UnexpectedOutput {
        /// The subcommand that was run
        command: String,
        /// The output (or a description of what was missing)
        output: String,
    },
}

/// Task registry and transition errors
#[derive(Debug, Error)]
pub enum TaskError {
    /// No record with this id exists
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was looked up
        id: TaskId,
    },

    /// The requested operation is illegal from the task's current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task ID the operation targeted
        id: TaskId,
        /// The operation that was rejected (e.g., "pause")
        operation: String,
        /// The state the task was in at the time
        current_state: TaskState,
    },
}

/// Archive listing and extraction errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Listing the archive manifest failed
    #[error("failed to list {archive}: {reason}")]
    ListFailed {
        /// The archive that could not be listed
        archive: PathBuf,
        /// The reason listing failed
        reason: String,
    },

    /// Extraction failed
    #[error("extraction failed for {archive}: {reason}")]
    ExtractionFailed {
        /// The archive that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// Extraction was interrupted by a stop request
    #[error("extraction of {archive} was cancelled")]
    Cancelled {
        /// The archive whose extraction was interrupted
        archive: PathBuf,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_helpers_match_only_their_variant() {
        let eos = Error::from(ProcessError::EndOfStream);
        let not_started = Error::from(ProcessError::NotStarted);

        assert!(eos.is_end_of_stream());
        assert!(!eos.is_not_started());
        assert!(not_started.is_not_started());
        assert!(!not_started.is_end_of_stream());
        assert!(!Error::NotSupported("x".into()).is_end_of_stream());
    }

    #[test]
    fn invalid_state_message_names_operation_and_state() {
        let err = Error::from(TaskError::InvalidState {
            id: TaskId(7),
            operation: "pause".to_string(),
            current_state: TaskState::Waiting,
        });

        assert!(err.is_invalid_state());
        assert_eq!(
            err.to_string(),
            "task error: cannot pause task 7 in state waiting"
        );
    }

    #[test]
    fn transfer_failure_surfaces_program_message_unchanged() {
        let err = Error::from(ProtocolError::TransferFailed {
            message: "文件不存在".to_string(),
        });

        assert!(
            err.to_string().ends_with("文件不存在"),
            "the wrapped program's message must reach the caller verbatim, got: {err}"
        );
    }

    #[test]
    fn launch_failure_names_program() {
        let err = Error::from(ProcessError::LaunchFailed {
            program: PathBuf::from("/opt/BaiduPCS-Go"),
            reason: "No such file or directory".to_string(),
        });

        assert!(err.to_string().contains("/opt/BaiduPCS-Go"));
    }
}
