//! # media-cache-dl
//!
//! Range-based download and cache orchestration for progressively played media.
//!
//! ## Design Philosophy
//!
//! media-cache-dl is designed to be:
//! - **Cache-first** - Every byte fetched is persisted; cached ranges are replayed locally
//! - **Range-exact** - Only the gaps in the cache are ever requested from the network
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding in a player
//! - **Event-driven** - Consumers observe response, data and completion events
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use media_cache_dl::{CacheManager, Config, DownloadEvent, DownloadOrchestrator, HttpTransport};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let cache = CacheManager::new(config.cache_dir());
//!     let transport = Arc::new(HttpTransport::new(&config.http)?);
//!
//!     let url = Url::parse("https://cdn.example.com/videos/intro.mp4")?;
//!     let (tx, mut events) = tokio::sync::mpsc::unbounded_channel();
//!     let mut orchestrator =
//!         DownloadOrchestrator::new(cache.open(&url)?, transport).with_observer(Arc::new(tx));
//!
//!     // First megabyte: cached parts are replayed, gaps are fetched
//!     orchestrator.download(0, 1024 * 1024)?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             DownloadEvent::Data { offset, bytes, .. } => {
//!                 println!("{} bytes at {}", bytes.len(), offset);
//!             }
//!             DownloadEvent::Finished { error } => {
//!                 println!("done: {:?}", error);
//!                 break;
//!             }
//!             DownloadEvent::Response(_) => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Local byte cache and its on-disk layout
pub mod cache;
/// Configuration types
pub mod config;
/// Download orchestration (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Half-open byte intervals and the cached-interval index
pub mod interval;
/// Splitting requests into cache replays and network fetches
pub mod planner;
/// Background preloading
pub mod preload;
/// Range request transport
pub mod transport;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use cache::{CacheConfiguration, CacheManager, LocalCacheStore};
pub use config::{CacheConfig, Config, HttpConfig, PreloadConfig};
pub use downloader::{DownloadOrchestrator, LoadGuard, LoadRegistry};
pub use error::{Error, ErrorKind, Result};
pub use interval::{Interval, IntervalSet};
pub use planner::{Action, plan};
pub use preload::{DiskSpaceProbe, PreloadScheduler, SpaceProbe};
pub use transport::{ByteStream, HttpTransport, RangeResponse, RangeTransport, ResponseHead};
pub use types::{
    DataSource, DownloadEvent, DownloadObserver, ExecutorState, PreloadEvent, PreloadObserver,
    ResourceMetadata,
};
