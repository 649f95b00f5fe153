use super::test_helpers::*;
use super::*;
use std::sync::Arc;


fn orchestrator(store: LocalCacheStore, transport: &Arc<ScriptedTransport>) -> DownloadOrchestrator {
    DownloadOrchestrator::with_registry(store, transport.clone(), &Arc::new(LoadRegistry::new()))
}
