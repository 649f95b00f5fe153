//! Persistent local cache: per-resource stores and the directory that holds them.
//!
//! - [`store`] - [`LocalCacheStore`], the byte store for one resource
//! - [`CacheConfiguration`] - the persisted index (metadata + cached intervals)
//! - [`CacheManager`] - opens stores and performs whole-cache maintenance
//!
//! Layout inside the cache directory, keyed by [`cache_key`]:
//! `<key>.data` holds bytes at their resource offsets, `<key>.json` the index.

mod store;

pub use store::LocalCacheStore;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::Result;
use crate::interval::{Interval, IntervalSet};
use crate::types::ResourceMetadata;
use crate::utils::{cache_key, format_count};

const DATA_EXTENSION: &str = "data";
const INDEX_EXTENSION: &str = "json";

/// Persisted index of one cached resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfiguration {
    /// Canonical resource address
    pub url: Url,
    /// Metadata from the first response (absent until then)
    #[serde(default)]
    pub metadata: Option<ResourceMetadata>,
    /// Byte intervals present in the data file
    #[serde(default)]
    pub intervals: IntervalSet,
}

impl CacheConfiguration {
    /// Empty index for `url`
    pub fn new(url: Url) -> Self {
        Self {
            url,
            metadata: None,
            intervals: IntervalSet::new(),
        }
    }

    /// Length of the contiguous cached prefix
    pub fn downloaded_byte_count(&self) -> u64 {
        self.intervals.downloaded_byte_count()
    }

    /// Whether `[0, content_length)` is fully cached
    pub fn is_complete(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(ResourceMetadata::known_length)
            .and_then(|length| Interval::new(0, length).ok())
            .is_some_and(|whole| self.intervals.covers(whole))
    }
}

/// Owner of the cache directory
#[derive(Clone, Debug)]
pub struct CacheManager {
    cache_dir: PathBuf,
}

impl CacheManager {
    /// Manage the cache rooted at `cache_dir` (created lazily)
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Data file location for `url`
    pub fn data_path(&self, url: &Url) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", cache_key(url), DATA_EXTENSION))
    }

    /// Index file location for `url`
    pub fn index_path(&self, url: &Url) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", cache_key(url), INDEX_EXTENSION))
    }

    /// Open the store for `url`, picking up any previously persisted index
    pub fn open(&self, url: &Url) -> Result<LocalCacheStore> {
        std::fs::create_dir_all(&self.cache_dir)?;
        LocalCacheStore::open(url, self.data_path(url), self.index_path(url))
    }

    /// Purge one resource (the remedy for a storage fault)
    pub fn remove(&self, url: &Url) -> Result<()> {
        for path in [self.data_path(url), self.index_path(url)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(url = %url, "Removed cached resource");
        Ok(())
    }

    /// Remove every cached resource; returns the number of data bytes freed
    pub fn clean_all(&self) -> Result<u64> {
        let freed = self.cached_size()?;

        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            // a live store may replace its index concurrently
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            cache_dir = %self.cache_dir.display(),
            freed = %format_count(i64::try_from(freed).unwrap_or(i64::MAX)),
            "Cleaned all cached resources"
        );
        Ok(freed)
    }

    /// Total size of all data files
    pub fn cached_size(&self) -> Result<u64> {
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut total = 0u64;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == DATA_EXTENSION) {
                total = total.saturating_add(entry.metadata()?.len());
            }
        }
        Ok(total)
    }
}
