//! 7-Zip command line driver

use super::ArchiveTool;
use crate::error::{Error, ExtractionError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Binary names searched on PATH, in order
const BINARY_NAMES: &[&str] = &["7z", "7zz", "7za"];

/// Archive tool backed by the external `7z` binary
///
/// # Examples
///
/// ```no_run
/// use pan_dl::extraction::{ArchiveTool, SevenZip};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let tool = SevenZip::from_path().ok_or("7z not found in PATH")?;
/// let entries = tool.list(Path::new("crate.zip")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct SevenZip {
    binary_path: PathBuf,
    work_dir: Option<PathBuf>,
}

impl SevenZip {
    /// Create a driver with an explicit binary path
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            work_dir: None,
        }
    }

    /// Attempt to find 7-Zip in PATH
    pub fn from_path() -> Option<Self> {
        BINARY_NAMES
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::new)
    }

    /// Use `dir` as 7-Zip's working directory for temporary files (`-w`)
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Path of the wrapped binary
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Arguments for `x -y -o<dst> <archive> [-p<pw>] [-w<dir>]`
    fn extract_args(&self, archive: &Path, dest: &Path, password: Option<&str>) -> Vec<OsString> {
        let mut output_flag = OsString::from("-o");
        output_flag.push(dest);

        let mut args = vec![
            OsString::from("x"),
            OsString::from("-y"),
            output_flag,
            archive.as_os_str().to_owned(),
        ];
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            args.push(OsString::from(format!("-p{password}")));
        }
        if let Some(dir) = &self.work_dir {
            let mut work_flag = OsString::from("-w");
            work_flag.push(dir);
            args.push(work_flag);
        }
        args
    }
}

/// Collect `Path = ` fields from `7z l -ba -slt` output
pub(crate) fn parse_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim_end_matches('\r').strip_prefix("Path = "))
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ArchiveTool for SevenZip {
    async fn list(&self, archive: &Path) -> Result<Vec<String>> {
        let output = Command::new(&self.binary_path)
            .args(["l", "-ba", "-slt"])
            .arg(archive)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::ExternalTool(format!("Failed to execute 7z: {}", e)))?;

        if !output.status.success() {
            return Err(ExtractionError::ListFailed {
                archive: archive.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let entries = parse_listing(&String::from_utf8_lossy(&output.stdout));
        debug!(?archive, count = entries.len(), "listed archive");
        Ok(entries)
    }

    async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(?archive, ?dest, "extracting with 7z");

        let mut command = Command::new(&self.binary_path);
        command
            .args(self.extract_args(archive, dest, password))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // dropping the output future drops the child, which kills it
        let output = tokio::select! {
            output = command.output() => output
                .map_err(|e| Error::ExternalTool(format!("Failed to execute 7z: {}", e)))?,
            _ = cancel.cancelled() => {
                info!(?archive, "extraction cancelled");
                return Err(ExtractionError::Cancelled {
                    archive: archive.to_path_buf(),
                }
                .into());
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let reason = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(ExtractionError::ExtractionFailed {
                archive: archive.to_path_buf(),
                reason,
            }
            .into());
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "7z"
    }
}
