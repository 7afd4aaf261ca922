//! Configuration types for pan-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// External tool paths
///
/// Groups settings for the wrapped binaries.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the BaiduPCS-Go executable (auto-detected if None)
    #[serde(default)]
    pub pcs_path: Option<PathBuf>,

    /// Path to 7z executable (auto-detected if None)
    #[serde(default)]
    pub sevenzip_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            pcs_path: None,
            sevenzip_path: None,
            search_path: true,
        }
    }
}

/// Download behavior configuration
///
/// Default locations for new tasks and existing-file handling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Install directory (default: "./games")
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// Skip the transfer when the local file already matches the record's MD5
    #[serde(default)]
    pub verify_existing: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            install_dir: default_install_dir(),
            verify_existing: false,
        }
    }
}

/// Nested archive handling during install
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Maximum nesting depth for archives within archives (default: 8)
    #[serde(default = "default_max_recursion")]
    pub max_recursion_depth: usize,

    /// File extensions recognized as archives (default: zip, rar, 7z)
    #[serde(default = "default_archive_extensions")]
    pub archive_extensions: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: default_max_recursion(),
            archive_extensions: default_archive_extensions(),
        }
    }
}

/// Interactive login settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Upper bound on a single login round-trip, in seconds (None = wait forever)
    #[serde(default, with = "optional_duration_serde")]
    pub step_timeout: Option<Duration>,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Task store path (default: "./tasks.json")
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
        }
    }
}

/// Main configuration
///
/// Fields are organized into logical sub-configs:
/// - [`tools`](ToolsConfig): external binary paths
/// - [`download`](DownloadConfig): default directories, existing-file check
/// - [`extraction`](ExtractionConfig): nested archive detection
/// - [`login`](LoginConfig): login round-trip bound
/// - [`persistence`](PersistenceConfig): task store location
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// External tool paths
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Archive nesting settings
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Login settings
    #[serde(default)]
    pub login: LoginConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Read a JSON config file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(?path, "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&text).map_err(|e| Error::Config {
            message: format!("invalid config file {}: {}", path.display(), e),
            key: None,
        })
    }

    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Install directory
    pub fn install_dir(&self) -> &PathBuf {
        &self.download.install_dir
    }
}

// Default value functions
fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("./games")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./tasks.json")
}

fn default_true() -> bool {
    true
}

fn default_max_recursion() -> usize {
    8
}

fn default_archive_extensions() -> Vec<String> {
    vec!["zip".into(), "rar".into(), "7z".into()]
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
