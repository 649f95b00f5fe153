//! Shared test helpers: an in-memory range transport and event collection.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use url::Url;

use crate::cache::{CacheManager, LocalCacheStore};
use crate::error::{Error, Result};
use crate::interval::Interval;
use crate::transport::{RangeResponse, RangeTransport, ResponseHead};
use crate::types::{DataSource, DownloadEvent};

pub(crate) const TEST_URL: &str = "https://cdn.example.com/clip.mp4";

/// Deterministic resource bytes: byte `i` is `i % 251`
pub(crate) fn resource_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub(crate) fn test_url() -> Url {
    Url::parse(TEST_URL).unwrap()
}

pub(crate) fn iv(start: u64, end: u64) -> Interval {
    Interval::new(start, end).unwrap()
}

/// Open the store for [`TEST_URL`] in a fresh temp cache dir
pub(crate) fn open_test_store() -> (LocalCacheStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = CacheManager::new(dir.path()).open(&test_url()).unwrap();
    (store, dir)
}

/// How the scripted server answers range requests
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReplyMode {
    /// 206 with `Content-Range`
    Partial,
    /// 206 without `Content-Range` (length only via `Content-Length`)
    PartialWithoutRange,
    /// 200 with the whole resource, range ignored
    Full,
}

/// In-memory [`RangeTransport`] serving a fixed resource
pub(crate) struct ScriptedTransport {
    content: Vec<u8>,
    chunk_size: usize,
    mode: ReplyMode,
    fail_status: Option<u16>,
    truncate_after: Option<usize>,
    stall_first_after: Mutex<Option<usize>>,
    requests: Mutex<Vec<Interval>>,
}

impl ScriptedTransport {
    pub(crate) fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            chunk_size: 16,
            mode: ReplyMode::Partial,
            fail_status: None,
            truncate_after: None,
            stall_first_after: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub(crate) fn mode(mut self, mode: ReplyMode) -> Self {
        self.mode = mode;
        self
    }

    /// Every request fails with this HTTP status
    pub(crate) fn fail_with_status(mut self, status: u16) -> Self {
        self.fail_status = Some(status);
        self
    }

    /// Every body ends after this many bytes
    pub(crate) fn truncate_after(mut self, bytes: usize) -> Self {
        self.truncate_after = Some(bytes);
        self
    }

    /// The first body hangs after this many chunks (until dropped)
    pub(crate) fn stall_first_after(self, chunks: usize) -> Self {
        *self.stall_first_after.lock().unwrap() = Some(chunks);
        self
    }

    /// Intervals requested so far, in order
    pub(crate) fn requests(&self) -> Vec<Interval> {
        self.requests.lock().unwrap().clone()
    }

    fn head(&self, url: &Url, status: u16, headers: &[(&'static str, String)]) -> ResponseHead {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        ResponseHead {
            url: url.clone(),
            status,
            headers: map,
        }
    }
}

#[async_trait]
impl RangeTransport for ScriptedTransport {
    async fn fetch_range(&self, url: &Url, interval: Interval) -> Result<RangeResponse> {
        self.requests.lock().unwrap().push(interval);

        if let Some(status) = self.fail_status {
            return Err(Error::HttpStatus {
                status,
                url: url.to_string(),
            });
        }

        let total = self.content.len() as u64;
        let (head, body) = match self.mode {
            ReplyMode::Full => {
                let head = self.head(
                    url,
                    200,
                    &[
                        ("content-length", total.to_string()),
                        ("content-type", "video/mp4".to_string()),
                    ],
                );
                (head, self.content.clone())
            }
            ReplyMode::Partial | ReplyMode::PartialWithoutRange => {
                let start = interval.start();
                let end = interval.end().min(total);
                if start >= end {
                    return Err(Error::HttpStatus {
                        status: 416,
                        url: url.to_string(),
                    });
                }
                let mut headers = vec![
                    ("content-length", (end - start).to_string()),
                    ("content-type", "video/mp4".to_string()),
                    ("accept-ranges", "bytes".to_string()),
                ];
                if self.mode == ReplyMode::Partial {
                    headers.push((
                        "content-range",
                        format!("bytes {}-{}/{}", start, end - 1, total),
                    ));
                }
                let body = self.content[start as usize..end as usize].to_vec();
                (self.head(url, 206, &headers), body)
            }
        };

        let body = match self.truncate_after {
            Some(limit) => body[..limit.min(body.len())].to_vec(),
            None => body,
        };
        let chunks: Vec<Result<Bytes>> = body
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();

        let stall = self.stall_first_after.lock().unwrap().take();
        let body = match stall {
            Some(after) => futures::stream::iter(chunks.into_iter().take(after))
                .chain(futures::stream::pending())
                .boxed(),
            None => futures::stream::iter(chunks).boxed(),
        };

        Ok(RangeResponse { head, body })
    }
}

/// Observer channel for a test orchestrator
pub(crate) fn event_channel() -> (
    Arc<mpsc::UnboundedSender<DownloadEvent>>,
    mpsc::UnboundedReceiver<DownloadEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}

/// Next event, failing the test after 5 seconds
pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> DownloadEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for download event")
        .expect("event channel closed")
}

/// Everything observed up to and including the terminal event
#[derive(Debug, Default)]
pub(crate) struct Observed {
    pub(crate) responses: Vec<ResponseHead>,
    pub(crate) data: Vec<(u64, Bytes, DataSource)>,
    pub(crate) error: Option<Error>,
}

impl Observed {
    /// Delivered bytes concatenated in order
    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.data
            .iter()
            .flat_map(|(_, bytes, _)| bytes.iter().copied())
            .collect()
    }

    /// Apply one event; returns `true` on the terminal event
    pub(crate) fn record(&mut self, event: DownloadEvent) -> bool {
        match event {
            DownloadEvent::Response(head) => self.responses.push(head),
            DownloadEvent::Data {
                offset,
                bytes,
                source,
            } => self.data.push((offset, bytes, source)),
            DownloadEvent::Finished { error } => {
                self.error = error;
                return true;
            }
        }
        false
    }
}

/// Collect events until the terminal one
pub(crate) async fn collect_until_finished(
    rx: &mut mpsc::UnboundedReceiver<DownloadEvent>,
) -> Observed {
    let mut observed = Observed::default();
    while !observed.record(next_event(rx).await) {}
    observed
}

/// Assert nothing else arrives within a short grace period
pub(crate) async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    if let Ok(event) = rx.try_recv() {
        panic!("unexpected event after terminal state: {event:?}");
    }
}
