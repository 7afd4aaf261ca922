//! # pan-dl
//!
//! Library for managing long-running download-and-install jobs driven
//! through the BaiduPCS-Go and 7-Zip command line programs.
//!
//! ## Design Philosophy
//!
//! pan-dl is designed to be:
//! - **Subprocess-first** - the wrapped programs are driven through their
//!   text interfaces; nothing is linked in
//! - **Resumable** - every task can be paused, resumed, stopped or canceled,
//!   and its state survives a restart
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Layers
//!
//! - [`process`]: a spawned program as an event-driven output buffer with
//!   blocking delimiter reads
//! - [`pcs`]: the interactive login protocol and the framed transfer
//!   protocol spoken by BaiduPCS-Go
//! - [`task`]: pausable units of work and their composition
//! - [`manager`]: the persisted task registry and its state machine
//!
//! ## Quick Start
//!
//! ```no_run
//! use pan_dl::{AppContext, Config, TaskManager, TaskParams};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("pan-dl.json")?;
//!     let manager = TaskManager::new(AppContext::from_config(config)?);
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let params = TaskParams {
//!         name: "Example".to_string(),
//!         save_dir: "./downloads".into(),
//!         install_dir: "./games/example".into(),
//!         ..Default::default()
//!     };
//!     let id = manager.add_pan_task(params, "/games/example.zip").await?;
//!     manager.start_task(id).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Resolved configuration and external tools
pub mod context;
/// Error types
pub mod error;
/// Archive listing and extraction
pub mod extraction;
/// Observer registries
pub mod listener;
/// Task registry and state machine
pub mod manager;
/// BaiduPCS-Go protocols
pub mod pcs;
/// Subprocess channel
pub mod process;
/// Task abstraction and composition
pub mod task;
/// Core types and events
pub mod types;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::Config;
pub use context::AppContext;
pub use error::{Error, ExtractionError, ProcessError, ProtocolError, Result, TaskError};
pub use extraction::{ArchiveTool, SevenZip};
pub use manager::TaskManager;
pub use pcs::{LoginFlow, LoginSession, PcsClient, Transfer};
pub use process::Process;
pub use task::Task;
pub use types::{
    Event, InstallConfig, LoginStep, TaskId, TaskParams, TaskRecord, TaskSource, TaskState,
    TransferProgress, VerifyChannel,
};

/// Block until the process is asked to terminate, then shut the manager down
///
/// On unix both SIGTERM and SIGINT count; elsewhere only Ctrl+C. Every task
/// still downloading is paused so it can be resumed on the next run.
///
/// # Example
///
/// ```no_run
/// use pan_dl::{AppContext, Config, TaskManager, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ctx = AppContext::from_config(Config::load("pan-dl.json")?)?;
///     let manager = TaskManager::new(ctx);
///
///     run_with_shutdown(manager).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(manager: TaskManager) -> Result<()> {
    wait_for_signal().await;
    manager.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // registration can fail in restricted sandboxes; fall back to ctrl_c
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "signal handler registration failed, using ctrl_c");
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("received Ctrl+C");
}
