//! Shared helpers for integration tests: a range-aware mock origin and event collection

#![allow(dead_code)]

use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use media_cache_dl::{DataSource, DownloadEvent, Error};

/// Deterministic resource bytes: byte `i` is `i % 251`
pub fn resource_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Serves byte ranges of a fixed body the way a CDN would
pub struct RangeOrigin {
    content: Vec<u8>,
}

impl Respond for RangeOrigin {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.content.len() as u64;
        let range = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_range);

        let Some((start, end)) = range else {
            return ResponseTemplate::new(200)
                .insert_header("content-type", "video/mp4")
                .insert_header("accept-ranges", "bytes")
                .set_body_bytes(self.content.clone());
        };

        let end = end.map_or(total, |last| (last + 1).min(total));
        if start >= end {
            return ResponseTemplate::new(416)
                .insert_header("content-range", format!("bytes */{}", total).as_str());
        }

        ResponseTemplate::new(206)
            .insert_header("content-type", "video/mp4")
            .insert_header("accept-ranges", "bytes")
            .insert_header(
                "content-range",
                format!("bytes {}-{}/{}", start, end - 1, total).as_str(),
            )
            .set_body_bytes(self.content[start as usize..end as usize].to_vec())
    }
}

/// "bytes=a-b" / "bytes=a-" -> (a, Some(b)) / (a, None)
pub fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start, end))
}

/// Mount `content` at `resource_path` and return its URL
pub async fn mount_resource(server: &MockServer, resource_path: &str, content: Vec<u8>) -> Url {
    Mock::given(method("GET"))
        .and(path(resource_path))
        .respond_with(RangeOrigin { content })
        .mount(server)
        .await;
    Url::parse(&format!("{}{}", server.uri(), resource_path)).expect("valid mock url")
}

/// Range headers the server has seen for `resource_path`, in order
pub async fn requested_ranges(server: &MockServer, resource_path: &str) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == resource_path)
        .filter_map(|request| {
            request
                .headers
                .get("range")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        })
        .collect()
}

/// Outcome of one download as seen by its observer
#[derive(Debug, Default)]
pub struct Outcome {
    /// Delivered chunks: offset, length, source
    pub chunks: Vec<(u64, usize, DataSource)>,
    /// Delivered bytes in order
    pub bytes: Vec<u8>,
    /// Number of response heads observed
    pub responses: usize,
    /// Terminal error
    pub error: Option<Error>,
}

/// Collect events until the terminal one (fails the test after 10 seconds)
pub async fn wait_for_finish(rx: &mut mpsc::UnboundedReceiver<DownloadEvent>) -> Outcome {
    let mut outcome = Outcome::default();
    let collect = async {
        while let Some(event) = rx.recv().await {
            match event {
                DownloadEvent::Response(_) => outcome.responses += 1,
                DownloadEvent::Data {
                    offset,
                    bytes,
                    source,
                } => {
                    outcome.chunks.push((offset, bytes.len(), source));
                    outcome.bytes.extend_from_slice(&bytes);
                }
                DownloadEvent::Finished { error } => {
                    outcome.error = error;
                    return true;
                }
            }
        }
        false
    };
    let finished = tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .expect("timed out waiting for download to finish");
    assert!(finished, "event channel closed before the download finished");
    outcome
}
