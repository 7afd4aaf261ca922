//! Archive listing and extraction
//!
//! Installation unpacks a downloaded archive through an external archive
//! tool. The tool sits behind the [`ArchiveTool`] trait so the installer can
//! be driven by 7-Zip in production and by an in-memory fake in tests.

mod sevenz;

pub use sevenz::SevenZip;

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// External archive tool
#[async_trait]
pub trait ArchiveTool: Send + Sync {
    /// Entry paths of `archive`, in manifest order
    async fn list(&self, archive: &Path) -> Result<Vec<String>>;

    /// Extract `archive` into `dest`, overwriting existing files
    ///
    /// Firing `cancel` aborts the extraction and fails with
    /// [`crate::error::ExtractionError::Cancelled`].
    async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Check if a file is an archive based on its extension
///
/// `archive_extensions` are compared case-insensitively, without dots.
pub fn is_archive(path: &Path, archive_extensions: &[String]) -> bool {
    if let Some(ext) = path.extension() {
        let ext_str = ext.to_string_lossy().to_lowercase();
        archive_extensions
            .iter()
            .any(|ae| ae.to_lowercase() == ext_str)
    } else {
        false
    }
}

/// The nested archive to unpack next, if any
///
/// Only the first manifest entry is considered: a payload wrapped in another
/// archive is the sole (or leading) entry of its outer archive.
pub fn nested_archive(
    entries: &[String],
    dest: &Path,
    archive_extensions: &[String],
) -> Option<PathBuf> {
    let first = entries.first()?;
    is_archive(Path::new(first), archive_extensions).then(|| dest.join(first))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn exts() -> Vec<String> {
        vec!["zip".to_string(), "rar".to_string()]
    }

    #[test]
    fn is_archive_ignores_case() {
        assert!(is_archive(Path::new("inner.ZIP"), &exts()));
        assert!(is_archive(Path::new("dir/inner.rar"), &exts()));
        assert!(!is_archive(Path::new("game.exe"), &exts()));
        assert!(!is_archive(Path::new("README"), &exts()));
    }

    #[test]
    fn nested_archive_only_looks_at_first_entry() {
        let dest = Path::new("/install");
        let nested = vec!["payload.rar".to_string(), "readme.txt".to_string()];
        let plain = vec!["readme.txt".to_string(), "payload.rar".to_string()];

        assert_eq!(
            nested_archive(&nested, dest, &exts()),
            Some(PathBuf::from("/install/payload.rar"))
        );
        assert_eq!(nested_archive(&plain, dest, &exts()), None);
        assert_eq!(nested_archive(&[], dest, &exts()), None);
    }
}
