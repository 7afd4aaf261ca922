//! One-shot BaiduPCS-Go commands

use super::first_capture;
use super::login::{LoginFlow, LoginSession};
use super::transfer::Transfer;
use crate::error::{ProtocolError, Result};
use crate::process::run_command;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Binary names searched on PATH, in order
const BINARY_NAMES: &[&str] = &["BaiduPCS-Go", "baidupcs-go"];

const USER_NAME_PATTERN: &str = r"用户名: ([^,]+),";
const SAVED_NAME_PATTERN: &str = r"保存了(.+)到当前目录";

/// An entry of `ls -json`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanEntry {
    /// Remote file system id
    pub fs_id: u64,
    /// Absolute remote path
    pub path: String,
    /// Last path segment
    pub file_name: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes
    pub size: u64,
    /// MD5 reported by the pan (empty for directories)
    pub md5: String,
    /// Creation time (unix seconds)
    pub ctime: i64,
    /// Modification time (unix seconds)
    pub mtime: i64,
    /// Uploading application id
    pub app_id: u64,
}

/// Result of saving a share link into the pan
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    /// Share link
    pub url: String,
    /// Extraction code of the share link
    pub code: String,
    /// Remote directory the share was saved into
    pub dst: String,
    /// Name of the saved entry inside `dst`
    pub pan_path: String,
    /// MD5 of the saved entry
    pub md5: String,
}

/// Handle on the BaiduPCS-Go binary
///
/// Account commands run to completion; [`PcsClient::login`] and
/// [`PcsClient::downloader`] hand out long-lived protocol drivers.
#[derive(Clone, Debug)]
pub struct PcsClient {
    binary_path: PathBuf,
    login_timeout: Option<Duration>,
}

impl PcsClient {
    /// Create a client with an explicit binary path
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            login_timeout: None,
        }
    }

    /// Attempt to find BaiduPCS-Go in PATH
    pub fn from_path() -> Option<Self> {
        BINARY_NAMES
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(Self::new)
    }

    /// Bound each login prompt read by `timeout`
    pub fn with_login_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Path of the wrapped binary
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "running pcs command");
        run_command(&self.binary_path, args.iter().copied()).await
    }

    /// Name of the logged-in user, empty when logged out
    pub async fn who(&self) -> Result<String> {
        let output = self.run(&["who"]).await?;
        Ok(parse_user_name(&output))
    }

    /// Log the current user out
    pub async fn logout(&self) -> Result<()> {
        self.run(&["logout"]).await?;
        info!("logged out");
        Ok(())
    }

    /// Current remote working directory
    pub async fn pwd(&self) -> Result<String> {
        Ok(self.run(&["pwd"]).await?.trim().to_string())
    }

    /// Change the remote working directory
    pub async fn cd(&self, path: &str) -> Result<()> {
        self.run(&["cd", path]).await?;
        Ok(())
    }

    /// List a remote directory (the working directory when `path` is `None`)
    pub async fn ls(&self, path: Option<&str>) -> Result<Vec<PanEntry>> {
        let mut args = vec!["ls", "-json"];
        args.extend(path);
        let output = self.run(&args).await?;
        Ok(serde_json::from_str(output.trim())?)
    }

    /// Remove a remote path
    pub async fn rm(&self, path: &str) -> Result<()> {
        self.run(&["rm", path]).await?;
        Ok(())
    }

    /// Save a share link into the remote directory `dst`
    ///
    /// The share is saved from inside `dst`; the previous working directory
    /// is restored afterwards even if saving fails.
    pub async fn transfer(&self, url: &str, code: &str, dst: &str) -> Result<TransferRecord> {
        info!(url, dst, "saving share link");

        let previous = self.pwd().await?;
        self.cd(dst).await?;
        let saved = self.run(&["transfer", url, code]).await;
        if let Err(e) = self.cd(&previous).await {
            warn!(error = %e, dir = %previous, "failed to restore remote working directory");
        }
        let output = saved?;

        let name = parse_saved_name(&output).ok_or_else(|| ProtocolError::UnexpectedOutput {
            command: "transfer".to_string(),
            output: output.trim().to_string(),
        })?;

        let entry = self
            .ls(Some(dst))
            .await?
            .into_iter()
            .find(|entry| entry.file_name == name)
            .ok_or_else(|| ProtocolError::UnexpectedOutput {
                command: "ls".to_string(),
                output: format!("{name} not found in {dst}"),
            })?;

        Ok(TransferRecord {
            url: url.to_string(),
            code: code.to_string(),
            dst: if dst.is_empty() { "/".to_string() } else { dst.to_string() },
            pan_path: name,
            md5: entry.md5,
        })
    }

    /// A fresh, not yet started login session
    pub fn login(&self) -> LoginSession {
        LoginSession::new(&self.binary_path).with_step_timeout(self.login_timeout)
    }

    /// A login driver that resets itself on errors
    pub fn login_flow(&self) -> LoginFlow {
        LoginFlow::new(&self.binary_path, self.login_timeout)
    }

    /// A fresh, not yet started download
    pub fn downloader(&self) -> Transfer {
        Transfer::new(&self.binary_path)
    }
}

/// `当前帐号 uid: 1, 用户名: name, 性别: ..` -> `name`
pub(crate) fn parse_user_name(output: &str) -> String {
    first_capture(USER_NAME_PATTERN, output)
        .map(|name| name.trim().to_string())
        .unwrap_or_default()
}

/// `分享链接转存到网盘成功, 保存了name到当前目录` -> `name`
pub(crate) fn parse_saved_name(output: &str) -> Option<String> {
    first_capture(SAVED_NAME_PATTERN, output).map(|name| name.trim().to_string())
}
