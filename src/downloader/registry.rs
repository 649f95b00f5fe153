//! Process-wide record of resources that have a live orchestrator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use url::Url;

use super::lock_ignoring_poison;

/// Which resources currently have a live [`DownloadOrchestrator`](super::DownloadOrchestrator)
///
/// Orchestrators register on construction and unregister when dropped; the
/// preload scheduler consults the registry so it never warms a resource that
/// something else is already loading.
#[derive(Debug, Default)]
pub struct LoadRegistry {
    active: Mutex<HashMap<Url, usize>>,
}

impl LoadRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by every orchestrator that was not given its own
    pub fn global() -> Arc<LoadRegistry> {
        static GLOBAL: OnceLock<Arc<LoadRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(LoadRegistry::new())).clone()
    }

    /// Mark `url` as loading until the returned guard is dropped
    pub fn register(self: &Arc<Self>, url: &Url) -> LoadGuard {
        *lock_ignoring_poison(&self.active)
            .entry(url.clone())
            .or_insert(0) += 1;
        LoadGuard {
            registry: self.clone(),
            url: url.clone(),
        }
    }

    /// Whether any orchestrator for `url` is alive
    pub fn contains(&self, url: &Url) -> bool {
        lock_ignoring_poison(&self.active).contains_key(url)
    }

    fn release(&self, url: &Url) {
        let mut active = lock_ignoring_poison(&self.active);
        if let Some(count) = active.get_mut(url) {
            *count -= 1;
            if *count == 0 {
                active.remove(url);
            }
        }
    }
}

/// Registration handle; unregisters on drop
#[derive(Debug)]
pub struct LoadGuard {
    registry: Arc<LoadRegistry>,
    url: Url,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.registry.release(&self.url);
    }
}
