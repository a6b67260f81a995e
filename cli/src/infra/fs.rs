//! Filesystem infrastructure: implements `LocalFs` and `FileDisposer`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::application::ports::{FileDisposer, LocalFs};
use crate::domain::config::DispositionConfig;

/// Production filesystem implementation of `LocalFs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl LocalFs for HostFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// Expand a leading `~` to the user's home directory.
///
/// Paths without a leading `~` are returned unchanged.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    let Ok(rest) = path.strip_prefix("~") else {
        return Ok(path.to_path_buf());
    };
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.join(rest))
}

/// Moves finished files into the processed or failed directory.
pub struct FsDisposer {
    processed_dir: PathBuf,
    failed_dir: PathBuf,
}

impl FsDisposer {
    #[must_use]
    pub fn new(config: &DispositionConfig) -> Self {
        Self {
            processed_dir: config.processed_dir.clone(),
            failed_dir: config.failed_dir.clone(),
        }
    }
}

impl FileDisposer for FsDisposer {
    fn dispose(&self, path: &Path, succeeded: bool) -> Result<Option<PathBuf>> {
        if !path.is_file() {
            return Ok(None);
        }
        let dir = if succeeded {
            &self.processed_dir
        } else {
            &self.failed_dir
        };
        let name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("{} has no file name", path.display()))?;
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let dest = dir.join(name);

        if std::fs::rename(path, &dest).is_ok() {
            return Ok(Some(dest));
        }

        // Different filesystem: stage a copy next to the destination, then swap it in.
        let mut staged_name = std::ffi::OsString::from(".");
        staged_name.push(name);
        staged_name.push(".tether-tmp");
        let staged = dir.join(staged_name);
        std::fs::copy(path, &staged)
            .with_context(|| format!("copying {} to {}", path.display(), staged.display()))?;
        std::fs::rename(&staged, &dest)
            .with_context(|| format!("renaming {} to {}", staged.display(), dest.display()))?;
        std::fs::remove_file(path).with_context(|| format!("removing {}", path.display()))?;
        debug!(path = %dest.display(), "file disposed by copy");
        Ok(Some(dest))
    }
}
