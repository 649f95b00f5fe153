//! Range download orchestration.
//!
//! - [`DownloadOrchestrator`] - per-resource entry point: plans a request
//!   against the cache and drives a fetch executor
//! - [`executor`] - sequential execution of a plan with suspend/resume/cancel
//! - [`metadata`] - resource metadata inference from response headers
//! - [`registry`] - which resources currently have a live orchestrator

mod executor;
mod metadata;
mod registry;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use registry::{LoadGuard, LoadRegistry};

use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use url::Url;

use crate::cache::LocalCacheStore;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::interval::Interval;
use crate::transport::{RangeTransport, ResponseHead};
use crate::types::{
    DataSource, DownloadEvent, DownloadObserver, ExecutorState, ResourceMetadata,
};

use executor::{ExecutorDelegate, FetchExecutor};

/// Cache store shared between an orchestrator and its executor task
pub(crate) type SharedStore = Arc<Mutex<LocalCacheStore>>;

/// Lock a std mutex, recovering the data if a holder panicked
pub(crate) fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Downloads byte ranges of one resource, serving cached parts locally
///
/// Each [`download`](Self::download) plans the request against the cache
/// index and runs the plan on a background task; results reach the observer
/// as [`DownloadEvent`]s. A new download supersedes the previous one, which
/// reports `Finished(Cancelled)` before any event of the new one. Dropping
/// the orchestrator stops its download silently.
///
/// Must be used from within a tokio runtime.
pub struct DownloadOrchestrator {
    link: Arc<OrchestratorLink>,
    transport: Arc<dyn RangeTransport>,
    resume_prefix_threshold: u64,
    executor: Option<FetchExecutor>,
    _registration: Option<LoadGuard>,
}

impl DownloadOrchestrator {
    /// Orchestrate downloads for the resource behind `store`
    pub fn new(store: LocalCacheStore, transport: Arc<dyn RangeTransport>) -> Self {
        Self::with_registry(store, transport, &LoadRegistry::global())
    }

    /// Like [`new`](Self::new), registering with a specific [`LoadRegistry`]
    pub fn with_registry(
        store: LocalCacheStore,
        transport: Arc<dyn RangeTransport>,
        registry: &Arc<LoadRegistry>,
    ) -> Self {
        let registration = registry.register(store.url());
        Self::build(store, transport, Some(registration))
    }

    /// Orchestrator that does not show up in any [`LoadRegistry`] (used for preloads)
    pub(crate) fn unregistered(store: LocalCacheStore, transport: Arc<dyn RangeTransport>) -> Self {
        Self::build(store, transport, None)
    }

    fn build(
        store: LocalCacheStore,
        transport: Arc<dyn RangeTransport>,
        registration: Option<LoadGuard>,
    ) -> Self {
        let url = store.url().clone();
        Self {
            link: Arc::new(OrchestratorLink {
                url,
                store: Arc::new(Mutex::new(store)),
                observer: RwLock::new(None),
            }),
            transport,
            resume_prefix_threshold: CacheConfig::default().resume_prefix_threshold,
            executor: None,
            _registration: registration,
        }
    }

    /// Set the event observer
    pub fn with_observer(self, observer: Arc<dyn DownloadObserver>) -> Self {
        self.set_observer(Some(observer));
        self
    }

    /// Replace (or clear) the event observer
    pub fn set_observer(&self, observer: Option<Arc<dyn DownloadObserver>>) {
        *self
            .link
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = observer;
    }

    /// Cached prefix length above which `download_to_end(0)` only re-validates the prefix
    pub fn with_resume_prefix_threshold(mut self, threshold: u64) -> Self {
        self.resume_prefix_threshold = threshold;
        self
    }

    /// Resource address
    pub fn url(&self) -> &Url {
        &self.link.url
    }

    /// Resource metadata, once the first response has been seen
    pub fn metadata(&self) -> Option<ResourceMetadata> {
        self.link.store().metadata().cloned()
    }

    /// Length of the contiguous cached prefix
    pub fn downloaded_byte_count(&self) -> u64 {
        self.link.store().downloaded_byte_count()
    }

    /// State of the current download (`Idle` before the first one)
    pub fn state(&self) -> ExecutorState {
        self.executor
            .as_ref()
            .map_or(ExecutorState::Idle, FetchExecutor::state)
    }

    /// Download `[offset, offset + length)`
    ///
    /// Fails only for an empty request. Everything else, including transport
    /// and storage errors, is reported through the observer.
    pub fn download(&mut self, offset: u64, length: u64) -> Result<()> {
        let requested = Interval::from_offset(offset, length)?;
        self.start_plan(requested);
        Ok(())
    }

    /// Download from `offset` to the end of the resource
    ///
    /// At offset 0 with more than the resume threshold already cached, only
    /// that cached prefix is requested: it replays locally and lets the
    /// consumer start while the rest is requested later.
    pub fn download_to_end(&mut self, offset: u64) -> Result<()> {
        let (prefix, known_length) = {
            let store = self.link.store();
            (
                store.downloaded_byte_count(),
                store.metadata().and_then(ResourceMetadata::known_length),
            )
        };

        if offset == 0 && prefix > self.resume_prefix_threshold {
            tracing::debug!(url = %self.link.url, prefix, "Re-validating cached prefix");
            return self.download(0, prefix);
        }

        match known_length {
            Some(length) if offset >= length => Err(Error::InvalidInterval {
                start: offset,
                end: length,
            }),
            Some(length) => self.download(offset, length - offset),
            None => {
                self.start_plan(Interval::open_ended(offset)?);
                Ok(())
            }
        }
    }

    /// Pause the current download; bytes received so far stay cached
    pub fn suspend(&self) {
        if let Some(executor) = &self.executor {
            executor.suspend();
        }
    }

    /// Continue a suspended download
    pub fn resume(&self) {
        if let Some(executor) = &self.executor {
            executor.resume();
        }
    }

    /// Stop the current download; the observer sees `Finished(Cancelled)` once
    pub fn cancel(&mut self) {
        if let Some(executor) = &mut self.executor {
            executor.cancel();
        }
    }

    fn start_plan(&mut self, requested: Interval) {
        // stop the previous executor before planning so its writes are in the index
        if let Some(mut previous) = self.executor.take() {
            previous.supersede();
        }

        let actions = self.link.store().plan(requested);
        tracing::info!(
            url = %self.link.url,
            range = %requested,
            actions = actions.len(),
            "Starting download"
        );

        let mut executor = FetchExecutor::new(
            self.link.url.clone(),
            actions,
            self.link.store.clone(),
            self.transport.clone(),
            self.link.clone(),
        );
        executor.start();
        self.executor = Some(executor);
    }
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("url", &self.link.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Executor delegate: records metadata and forwards events to the observer
struct OrchestratorLink {
    url: Url,
    store: SharedStore,
    observer: RwLock<Option<Arc<dyn DownloadObserver>>>,
}

impl OrchestratorLink {
    fn store(&self) -> MutexGuard<'_, LocalCacheStore> {
        lock_ignoring_poison(&self.store)
    }

    fn emit(&self, event: DownloadEvent) {
        let observer = self
            .observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer.on_event(event);
        }
    }
}

impl ExecutorDelegate for OrchestratorLink {
    fn on_response(&self, head: ResponseHead, requested: Interval) {
        {
            let mut store = self.store();
            if store.metadata().is_none() {
                let metadata = metadata::infer_metadata(&head, requested.start());
                tracing::debug!(
                    url = %self.url,
                    content_length = metadata.content_length,
                    content_type = %metadata.content_type,
                    "Recording resource metadata"
                );
                if let Err(e) = store.set_metadata(metadata) {
                    tracing::warn!(url = %self.url, error = %e, "Failed to persist resource metadata");
                }
            }
        }
        self.emit(DownloadEvent::Response(head));
    }

    fn on_data(&self, offset: u64, bytes: Bytes, source: DataSource) {
        self.emit(DownloadEvent::Data {
            offset,
            bytes,
            source,
        });
    }

    fn on_finished(&self, error: Option<Error>) {
        match &error {
            None => tracing::info!(url = %self.url, "Download finished"),
            Some(e) => tracing::info!(url = %self.url, error = %e, "Download finished with error"),
        }
        self.emit(DownloadEvent::Finished { error });
    }
}
