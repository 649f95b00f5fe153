use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak};
use url::Url;

use super::probe::{DiskSpaceProbe, SpaceProbe};
use crate::cache::CacheManager;
use crate::config::{Config, PreloadConfig};
use crate::downloader::{DownloadOrchestrator, LoadRegistry};
use crate::error::{Error, Result};
use crate::transport::{HttpTransport, RangeTransport};
use crate::types::{DownloadEvent, DownloadObserver, PreloadEvent, PreloadObserver};
use crate::utils::format_count;

/// Warms the start of upcoming resources, one at a time, in queue order
///
/// Each queued resource gets a bounded fetch of its first
/// `preload_byte_count` bytes. When that fetch ends, successfully or not, the
/// scheduler moves on to the next address without outside help. Resources
/// that some other component is already loading (per the [`LoadRegistry`])
/// are skipped.
///
/// Cloning yields another handle to the same scheduler. Operations that start
/// a preload must run inside a tokio runtime.
#[derive(Clone)]
pub struct PreloadScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: PreloadConfig,
    cache: CacheManager,
    transport: Arc<dyn RangeTransport>,
    probe: Arc<dyn SpaceProbe>,
    registry: Arc<LoadRegistry>,
    state: Mutex<SchedulerState>,
    observer: RwLock<Option<Arc<dyn PreloadObserver>>>,
}

struct SchedulerState {
    queue: VecDeque<Url>,
    active: Option<ActivePreload>,
    auto_start: bool,
    next_id: u64,
}

struct ActivePreload {
    id: u64,
    orchestrator: DownloadOrchestrator,
}

impl PreloadScheduler {
    /// Process-wide scheduler built from [`Config::default`] on first use
    pub fn shared() -> Result<&'static PreloadScheduler> {
        static SHARED: OnceLock<PreloadScheduler> = OnceLock::new();

        if let Some(scheduler) = SHARED.get() {
            return Ok(scheduler);
        }
        let scheduler = PreloadScheduler::new(&Config::default())?;
        Ok(SHARED.get_or_init(|| scheduler))
    }

    /// Scheduler over the configured cache directory and an HTTP transport
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let transport = Arc::new(HttpTransport::new(&config.http)?);
        Ok(Self::with_parts(
            config.preload.clone(),
            CacheManager::new(config.cache_dir().clone()),
            transport,
            Arc::new(DiskSpaceProbe::new(config.cache_dir().clone())),
            LoadRegistry::global(),
        ))
    }

    /// Scheduler from explicit collaborators
    pub fn with_parts(
        config: PreloadConfig,
        cache: CacheManager,
        transport: Arc<dyn RangeTransport>,
        probe: Arc<dyn SpaceProbe>,
        registry: Arc<LoadRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                cache,
                transport,
                probe,
                registry,
                state: Mutex::new(SchedulerState {
                    queue: VecDeque::new(),
                    active: None,
                    auto_start: true,
                    next_id: 0,
                }),
                observer: RwLock::new(None),
            }),
        }
    }

    /// Replace (or clear) the event observer
    pub fn set_observer(&self, observer: Option<Arc<dyn PreloadObserver>>) {
        *self
            .inner
            .observer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = observer;
    }

    /// Replace the queue, dropping the active preload
    ///
    /// When free space is at or below `min_free_space_mb`, the whole cache is
    /// purged first. Starts preloading unless the scheduler was paused.
    pub fn set_queue(&self, urls: impl IntoIterator<Item = Url>) {
        let events = {
            let mut state = self.inner.state();
            // dropping the orchestrator stops it without a terminal event
            state.active = None;
            state.queue = urls.into_iter().collect();
            tracing::debug!(queued = state.queue.len(), "Preload queue replaced");

            if self.is_space_not_available() {
                match self.inner.cache.clean_all() {
                    Ok(freed) => tracing::info!(
                        freed = %format_count(i64::try_from(freed).unwrap_or(i64::MAX)),
                        "Low disk space, purged preload cache"
                    ),
                    Err(e) => tracing::warn!(error = %e, "Failed to purge cache on low disk space"),
                }
            }

            if state.auto_start {
                self.inner.start_locked(&mut state)
            } else {
                Vec::new()
            }
        };
        self.inner.emit_all(events);
    }

    /// Start preloading the next queued resource, or resume a paused one
    pub fn start(&self) {
        let events = {
            let mut state = self.inner.state();
            self.inner.start_locked(&mut state)
        };
        self.inner.emit_all(events);
    }

    /// Suspend the active preload and stop advancing automatically
    pub fn pause(&self) {
        {
            let mut state = self.inner.state();
            if let Some(active) = &state.active {
                active.orchestrator.suspend();
            }
            state.auto_start = false;
        }
        tracing::debug!("Preloading paused");
        self.inner.emit(PreloadEvent::Paused);
    }

    /// Forget `url`: drop it from the queue and stop it if it is preloading
    pub fn remove(&self, url: &Url) {
        let mut state = self.inner.state();
        state.queue.retain(|queued| queued != url);
        if state
            .active
            .as_ref()
            .is_some_and(|active| active.orchestrator.url() == url)
        {
            tracing::debug!(url = %url, "Dropping active preload");
            state.active = None;
        }
    }

    /// Addresses still waiting, in order
    pub fn queue(&self) -> Vec<Url> {
        self.inner.state().queue.iter().cloned().collect()
    }

    /// Address currently being preloaded
    pub fn active_url(&self) -> Option<Url> {
        self.inner
            .state()
            .active
            .as_ref()
            .map(|active| active.orchestrator.url().clone())
    }

    /// Whether free space is at or below the configured minimum
    ///
    /// A failed probe counts as enough space.
    pub fn is_space_not_available(&self) -> bool {
        match self.inner.probe.available_mb() {
            Ok(available) => available <= self.inner.config.min_free_space_mb,
            Err(e) => {
                tracing::warn!(error = %e, "Could not determine free disk space");
                false
            }
        }
    }
}

impl std::fmt::Debug for PreloadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadScheduler")
            .field("cache_dir", &self.inner.cache.cache_dir())
            .field("preload_byte_count", &self.inner.config.preload_byte_count)
            .finish_non_exhaustive()
    }
}

impl SchedulerInner {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_locked(self: &Arc<Self>, state: &mut SchedulerState) -> Vec<PreloadEvent> {
        if let Some(active) = &state.active {
            active.orchestrator.resume();
            return Vec::new();
        }
        if state.queue.is_empty() {
            return Vec::new();
        }
        state.auto_start = true;

        while let Some(url) = state.queue.pop_front() {
            if self.registry.contains(&url) {
                tracing::warn!(url = %url, "Skipping preload, resource is already loading");
                continue;
            }

            let store = match self.cache.open(&url) {
                Ok(store) => store,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Skipping preload, cache unavailable");
                    continue;
                }
            };
            let already_cached = store.downloaded_byte_count();

            let id = state.next_id;
            state.next_id += 1;
            let completion = Arc::new(PreloadCompletion {
                scheduler: Arc::downgrade(self),
                id,
            });
            let mut orchestrator = DownloadOrchestrator::unregistered(store, self.transport.clone())
                .with_observer(completion);

            if let Err(e) = orchestrator.download(0, self.config.preload_byte_count) {
                tracing::warn!(url = %url, error = %e, "Skipping preload");
                continue;
            }
            tracing::info!(
                url = %url,
                cached = already_cached,
                remaining = state.queue.len(),
                "Preload started"
            );
            state.active = Some(ActivePreload { id, orchestrator });

            if already_cached < self.config.preload_byte_count {
                return vec![PreloadEvent::Started { url }];
            }
            return Vec::new();
        }
        Vec::new()
    }

    fn on_preload_finished(self: &Arc<Self>, id: u64, error: Option<Error>) {
        let (url, started) = {
            let mut state = self.state();
            if state.active.as_ref().map(|active| active.id) != Some(id) {
                return;
            }
            let Some(finished) = state.active.take() else {
                return;
            };
            let url = finished.orchestrator.url().clone();
            drop(finished);

            match &error {
                None => tracing::info!(url = %url, "Preload finished"),
                Some(e) => tracing::warn!(url = %url, error = %e, "Preload failed"),
            }
            (url, self.start_locked(&mut state))
        };

        self.emit(PreloadEvent::Finished { url, error });
        self.emit_all(started);
    }

    fn emit(&self, event: PreloadEvent) {
        let observer = self
            .observer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(observer) = observer {
            observer.on_event(event);
        }
    }

    fn emit_all(&self, events: Vec<PreloadEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Observer on the active preload that advances the scheduler
struct PreloadCompletion {
    scheduler: Weak<SchedulerInner>,
    id: u64,
}

impl DownloadObserver for PreloadCompletion {
    fn on_event(&self, event: DownloadEvent) {
        let DownloadEvent::Finished { error } = event else {
            return;
        };
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.on_preload_finished(self.id, error);
        }
    }
}
