//! Per-resource byte store: sparse data file plus persisted interval index.

use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use url::Url;

use super::CacheConfiguration;
use crate::error::{Error, Result};
use crate::interval::{Interval, IntervalSet};
use crate::planner::{self, Action};
use crate::types::ResourceMetadata;

/// Cached bytes of one resource, stored at their resource offsets
///
/// Writes land in the data file first and only then extend the in-memory
/// index, so the index never claims bytes that were not written. The index is
/// persisted by [`flush`](Self::flush) (and on drop); losing an unflushed
/// index only costs a re-download.
#[derive(Debug)]
pub struct LocalCacheStore {
    data_path: PathBuf,
    index_path: PathBuf,
    file: File,
    configuration: CacheConfiguration,
    dirty: bool,
}

impl LocalCacheStore {
    /// Open (or create) the store for `url` at the given paths
    pub(crate) fn open(url: &Url, data_path: PathBuf, index_path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&data_path)?;
        let data_len = file.metadata()?.len();

        let mut configuration = load_configuration(&index_path, url);
        let mut dirty = false;
        if let Some(reconciled) = reconcile(&configuration.intervals, data_len) {
            tracing::warn!(
                url = %url,
                data_len,
                "Cache index claimed bytes past end of data file, trimming"
            );
            configuration.intervals = reconciled;
            dirty = true;
        }

        Ok(Self {
            data_path,
            index_path,
            file,
            configuration,
            dirty,
        })
    }

    /// Resource address
    pub fn url(&self) -> &Url {
        &self.configuration.url
    }

    /// Data file path
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    /// Index and metadata snapshot
    pub fn configuration(&self) -> &CacheConfiguration {
        &self.configuration
    }

    /// Cached intervals
    pub fn index(&self) -> &IntervalSet {
        &self.configuration.intervals
    }

    /// Resource metadata, once known
    pub fn metadata(&self) -> Option<&ResourceMetadata> {
        self.configuration.metadata.as_ref()
    }

    /// Length of the contiguous cached prefix
    pub fn downloaded_byte_count(&self) -> u64 {
        self.configuration.intervals.downloaded_byte_count()
    }

    /// Whether the whole resource is cached (requires a known length)
    pub fn is_complete(&self) -> bool {
        self.configuration.is_complete()
    }

    /// Plan `requested` against this store's index and metadata
    pub fn plan(&self, requested: Interval) -> Vec<Action> {
        planner::plan(
            requested,
            &self.configuration.intervals,
            self.configuration.metadata.as_ref(),
        )
    }

    /// Read a cached interval back
    ///
    /// Fails with [`Error::StorageFault`] if the interval is not marked as
    /// cached or the data file cannot produce every byte of it.
    pub fn read(&mut self, interval: Interval) -> Result<Bytes> {
        if interval.is_open_ended() || !self.configuration.intervals.covers(interval) {
            return Err(self.fault(interval, "interval is not cached"));
        }

        let len = usize::try_from(interval.len())
            .map_err(|_| self.fault(interval, "interval too large to read at once"))?;
        let mut buf = vec![0u8; len];

        self.file
            .seek(SeekFrom::Start(interval.start()))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| self.fault(interval, &e.to_string()))?;

        Ok(Bytes::from(buf))
    }

    /// Persist `bytes` at `offset`, then record the interval as cached
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let Ok(interval) = Interval::from_offset(offset, bytes.len() as u64) else {
            return Ok(());
        };

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;

        self.configuration.intervals.insert(interval);
        self.dirty = true;
        Ok(())
    }

    /// Record metadata unless some is already present; returns whether it was stored
    pub fn set_metadata(&mut self, metadata: ResourceMetadata) -> Result<bool> {
        if self.configuration.metadata.is_some() {
            return Ok(false);
        }
        self.configuration.metadata = Some(metadata);
        self.dirty = true;
        self.flush()?;
        Ok(true)
    }

    /// Persist the index if it changed since the last flush
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        self.file.flush()?;
        let json = serde_json::to_vec(&self.configuration)?;
        let tmp_path = self.index_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.index_path)?;

        self.dirty = false;
        Ok(())
    }

    fn fault(&self, interval: Interval, reason: &str) -> Error {
        Error::StorageFault {
            path: self.data_path.clone(),
            interval,
            reason: reason.to_string(),
        }
    }
}

impl Drop for LocalCacheStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(url = %self.configuration.url, error = %e, "Failed to flush cache index on drop");
        }
    }
}

fn load_configuration(index_path: &Path, url: &Url) -> CacheConfiguration {
    let fresh = || CacheConfiguration::new(url.clone());

    let raw = match std::fs::read(index_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return fresh(),
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Could not read cache index, starting empty");
            return fresh();
        }
    };

    match serde_json::from_slice::<CacheConfiguration>(&raw) {
        Ok(configuration) if &configuration.url == url => configuration,
        Ok(_) => {
            tracing::warn!(url = %url, "Cache index belongs to another resource, starting empty");
            fresh()
        }
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Corrupt cache index, starting empty");
            fresh()
        }
    }
}

// Trim index entries that point past the end of the data file (e.g. after the
// data file was removed underneath a live store). `None` when nothing changes.
fn reconcile(intervals: &IntervalSet, data_len: u64) -> Option<IntervalSet> {
    let overhangs = intervals
        .intervals()
        .last()
        .is_some_and(|last| last.end() > data_len);
    if !overhangs {
        return None;
    }

    let mut trimmed = IntervalSet::new();
    for interval in intervals.intervals() {
        if let Some(kept) = interval.clamp_end(data_len) {
            trimmed.insert(kept);
        }
    }
    Some(trimmed)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> LocalCacheStore {
        let url = Url::parse("https://cdn.example.com/clip.mp4").unwrap();
        LocalCacheStore::open(
            &url,
            dir.path().join("clip.data"),
            dir.path().join("clip.json"),
        )
        .unwrap()
    }

    fn iv(start: u64, end: u64) -> Interval {
        Interval::new(start, end).unwrap()
    }

    #[test]
    fn write_then_read_back_at_offset() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        store.write(100, b"hello").unwrap();

        assert_eq!(store.index().intervals(), &[iv(100, 105)]);
        assert_eq!(&store.read(iv(101, 104)).unwrap()[..], b"ell");
        assert_eq!(store.downloaded_byte_count(), 0);
    }

    #[test]
    fn read_of_uncached_interval_is_storage_fault() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        store.write(0, b"abc").unwrap();

        let err = store.read(iv(0, 10)).unwrap_err();
        assert!(matches!(err, Error::StorageFault { .. }));
    }

    #[test]
    fn truncated_data_file_trims_index_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open_store(&dir);
            store.write(0, b"0123456789").unwrap();
            store.flush().unwrap();
        }
        // simulate lost data: truncate the data file behind the index's back
        let data = OpenOptions::new()
            .write(true)
            .open(dir.path().join("clip.data"))
            .unwrap();
        data.set_len(4).unwrap();
        drop(data);

        let mut store = open_store(&dir);
        assert_eq!(store.index().intervals(), &[iv(0, 4)]);
        assert!(matches!(
            store.read(iv(0, 10)),
            Err(Error::StorageFault { .. })
        ));
        assert_eq!(&store.read(iv(0, 4)).unwrap()[..], b"0123");
    }

    #[test]
    fn index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open_store(&dir);
            store.write(0, &[1u8; 64]).unwrap();
            store.write(128, &[2u8; 64]).unwrap();
            store
                .set_metadata(ResourceMetadata {
                    content_length: 4096,
                    content_type: "video/mp4".to_string(),
                    supports_range_requests: true,
                })
                .unwrap();
        } // dropped: flushes

        let mut store = open_store(&dir);
        assert_eq!(store.index().intervals(), &[iv(0, 64), iv(128, 192)]);
        assert_eq!(store.metadata().unwrap().content_length, 4096);
        assert_eq!(&store.read(iv(128, 130)).unwrap()[..], &[2u8, 2u8]);
    }

    #[test]
    fn metadata_is_set_once() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let first = ResourceMetadata {
            content_length: 10,
            content_type: "video/mp4".to_string(),
            supports_range_requests: true,
        };
        let second = ResourceMetadata {
            content_length: 99,
            content_type: "text/plain".to_string(),
            supports_range_requests: false,
        };

        assert!(store.set_metadata(first.clone()).unwrap());
        assert!(!store.set_metadata(second).unwrap());
        assert_eq!(store.metadata(), Some(&first));
    }

    #[test]
    fn corrupt_index_starts_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("clip.json"), b"{not json").unwrap();

        let store = open_store(&dir);
        assert!(store.index().is_empty());
        assert!(store.metadata().is_none());
    }

    #[test]
    fn plan_uses_store_state() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        store.write(0, &[0u8; 50]).unwrap();
        store.write(80, &[0u8; 40]).unwrap();

        assert_eq!(
            store.plan(iv(0, 120)),
            vec![
                Action::LocalRead(iv(0, 50)),
                Action::RemoteFetch(iv(50, 80)),
                Action::LocalRead(iv(80, 120)),
            ]
        );
    }
}
