//! Free disk space probing for cache eviction decisions.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::utils::get_available_space_mb;

/// Reports how much storage is left for the cache
pub trait SpaceProbe: Send + Sync {
    /// Free space in whole MiB
    fn available_mb(&self) -> Result<u64>;
}

/// [`SpaceProbe`] for the file system holding a directory
#[derive(Clone, Debug)]
pub struct DiskSpaceProbe {
    path: PathBuf,
}

impl DiskSpaceProbe {
    /// Probe the file system of `path` (which need not exist yet)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SpaceProbe for DiskSpaceProbe {
    fn available_mb(&self) -> Result<u64> {
        // the cache dir is created lazily; ask its nearest existing ancestor
        let target = self
            .path
            .ancestors()
            .find(|candidate| candidate.exists())
            .unwrap_or_else(|| Path::new("."));

        get_available_space_mb(target).map_err(|e| {
            Error::DiskSpaceCheckFailed(format!("{}: {}", target.display(), e))
        })
    }
}
