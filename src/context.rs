//! Shared application context
//!
//! Everything a component needs from the outside world is resolved once into
//! an [`AppContext`] and passed down explicitly: the configuration, the
//! BaiduPCS-Go client and the archive tool.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extraction::{ArchiveTool, SevenZip};
use crate::pcs::PcsClient;
use std::path::PathBuf;
use std::sync::Arc;

/// Resolved configuration and external tools
#[derive(Clone)]
pub struct AppContext {
    config: Arc<Config>,
    pcs: PcsClient,
    archive_tool: Arc<dyn ArchiveTool>,
}

impl AppContext {
    /// Build a context from explicit parts
    pub fn new(config: Config, pcs: PcsClient, archive_tool: Arc<dyn ArchiveTool>) -> Self {
        let pcs = pcs.with_login_timeout(config.login.step_timeout);
        Self {
            config: Arc::new(config),
            pcs,
            archive_tool,
        }
    }

    /// Resolve the wrapped binaries named by `config`
    ///
    /// An explicit path always wins. Otherwise PATH is searched when
    /// `tools.search_path` is set, and resolution fails if nothing is found.
    pub fn from_config(config: Config) -> Result<Self> {
        let pcs = resolve_binary(
            config.tools.pcs_path.as_ref(),
            config.tools.search_path,
            "tools.pcs_path",
            "BaiduPCS-Go",
            || PcsClient::from_path().map(|c| c.binary_path().to_path_buf()),
        )
        .map(PcsClient::new)?;

        let sevenzip = resolve_binary(
            config.tools.sevenzip_path.as_ref(),
            config.tools.search_path,
            "tools.sevenzip_path",
            "7z",
            || SevenZip::from_path().map(|t| t.binary_path().to_path_buf()),
        )
        .map(SevenZip::new)?;

        tracing::info!(
            pcs = ?pcs.binary_path(),
            sevenzip = ?sevenzip.binary_path(),
            "external tools resolved"
        );

        Ok(Self::new(config, pcs, Arc::new(sevenzip)))
    }

    /// The configuration this context was built from
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// BaiduPCS-Go client
    pub fn pcs(&self) -> &PcsClient {
        &self.pcs
    }

    /// Archive tool used by install tasks
    pub fn archive_tool(&self) -> Arc<dyn ArchiveTool> {
        self.archive_tool.clone()
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("pcs", &self.pcs)
            .field("archive_tool", &self.archive_tool.name())
            .finish()
    }
}

fn resolve_binary(
    explicit: Option<&PathBuf>,
    search_path: bool,
    key: &str,
    name: &str,
    search: impl FnOnce() -> Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.clone());
    }
    if !search_path {
        return Err(Error::Config {
            message: format!("no {name} path configured and PATH search is disabled"),
            key: Some(key.to_string()),
        });
    }
    search().ok_or_else(|| Error::NotSupported(format!("{name} not found in PATH")))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn explicit_paths_are_used_as_is() {
        let mut config = Config::default();
        config.tools.pcs_path = Some(PathBuf::from("/opt/pcs/BaiduPCS-Go"));
        config.tools.sevenzip_path = Some(PathBuf::from("/opt/7z/7zz"));
        config.tools.search_path = false;

        let ctx = AppContext::from_config(config).unwrap();

        assert_eq!(ctx.pcs().binary_path(), Path::new("/opt/pcs/BaiduPCS-Go"));
        assert_eq!(ctx.archive_tool().name(), "7z");
    }

    #[test]
    fn missing_path_without_search_is_config_error() {
        let mut config = Config::default();
        config.tools.sevenzip_path = Some(PathBuf::from("/opt/7z/7zz"));
        config.tools.search_path = false;

        let err = AppContext::from_config(config).unwrap_err();

        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("tools.pcs_path")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn failed_search_is_not_supported() {
        let result = resolve_binary(None, true, "tools.pcs_path", "BaiduPCS-Go", || None);

        assert!(matches!(result, Err(Error::NotSupported(_))));
    }

    #[test]
    fn login_timeout_is_applied_to_client() {
        let mut config = Config::default();
        config.login.step_timeout = Some(Duration::from_secs(5));
        let tool = Arc::new(SevenZip::new("/usr/bin/7z"));

        let ctx = AppContext::new(config, PcsClient::new("/opt/pcs/BaiduPCS-Go"), tool);

        assert_eq!(ctx.config().login.step_timeout, Some(Duration::from_secs(5)));
        assert!(format!("{ctx:?}").contains("login_timeout: Some(5s)"));
    }
}
