//! Core types for media-cache-dl

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::transport::ResponseHead;

/// Facts about a remote resource learned from its first response
///
/// Recorded once per resource and never overwritten afterwards.
/// A `content_length` of 0 means the length is unknown.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Total resource length in bytes (0 = unknown)
    pub content_length: u64,
    /// MIME type reported by the server (empty if absent)
    pub content_type: String,
    /// Whether the server advertised `Accept-Ranges: bytes`
    pub supports_range_requests: bool,
}

impl ResourceMetadata {
    /// Content length, or `None` when the server did not tell us
    pub fn known_length(&self) -> Option<u64> {
        (self.content_length > 0).then_some(self.content_length)
    }
}

/// Where a delivered chunk came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Replayed from the local cache
    Local,
    /// Received from the network (and written to the cache)
    Remote,
}

/// Event emitted by a download to its observer
#[derive(Debug)]
pub enum DownloadEvent {
    /// Response headers of a range request were received
    Response(ResponseHead),

    /// A chunk of resource bytes is ready for the consumer
    Data {
        /// Resource offset of the first byte in `bytes`
        offset: u64,
        /// The bytes themselves
        bytes: Bytes,
        /// Cache replay or network
        source: DataSource,
    },

    /// The download reached a terminal state (delivered exactly once)
    Finished {
        /// `None` on success; `Some(Error::Cancelled)` after an explicit cancel
        error: Option<Error>,
    },
}

/// Receiver of [`DownloadEvent`]s
///
/// One observer per orchestrator. Events are delivered from the download task
/// in order; implementations must not block for long.
pub trait DownloadObserver: Send + Sync {
    /// Handle one event
    fn on_event(&self, event: DownloadEvent);
}

impl DownloadObserver for tokio::sync::mpsc::UnboundedSender<DownloadEvent> {
    fn on_event(&self, event: DownloadEvent) {
        // receiver gone means nobody is listening any more
        self.send(event).ok();
    }
}

/// Lifecycle state of a fetch executor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorState {
    /// Created, not yet started
    Idle,
    /// Executing actions
    Running,
    /// Paused by the caller; resumable
    Suspended,
    /// All actions finished
    Completed,
    /// Aborted by a transport or storage error
    Failed,
    /// Stopped by the caller
    Cancelled,
}

impl ExecutorState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutorState::Completed | ExecutorState::Failed | ExecutorState::Cancelled
        )
    }
}

/// Event emitted by the preload scheduler
#[derive(Debug)]
pub enum PreloadEvent {
    /// A background preload began for a resource that was not yet warm
    Started {
        /// Resource being warmed
        url: Url,
    },

    /// The scheduler was paused
    Paused,

    /// The active preload ended
    Finished {
        /// Resource that was being warmed
        url: Url,
        /// Terminal error, if any
        error: Option<Error>,
    },
}

/// Receiver of [`PreloadEvent`]s
pub trait PreloadObserver: Send + Sync {
    /// Handle one event
    fn on_event(&self, event: PreloadEvent);
}

impl PreloadObserver for tokio::sync::mpsc::UnboundedSender<PreloadEvent> {
    fn on_event(&self, event: PreloadEvent) {
        self.send(event).ok();
    }
}
