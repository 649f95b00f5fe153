//! Resource metadata inference from a range response head.

use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};

use crate::transport::ResponseHead;
use crate::types::ResourceMetadata;

/// Derive [`ResourceMetadata`] from the first response for a resource
///
/// The total length comes from `Content-Range` (`bytes a-b/total`). When that
/// total is missing or zero the response's `Content-Length` is used instead.
/// On a 200 that is the full length. On a 206 it only covers the body sent
/// from `requested_start`, so the resource is taken to end where that body
/// ends. An unknown length is 0.
pub(crate) fn infer_metadata(head: &ResponseHead, requested_start: u64) -> ResourceMetadata {
    let total = head
        .header(CONTENT_RANGE.as_str())
        .and_then(total_from_content_range)
        .filter(|total| *total > 0);

    let content_length = match total {
        Some(total) => total,
        None => {
            let body_length = head
                .header(CONTENT_LENGTH.as_str())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .unwrap_or(0);
            let fallback = if head.is_partial() && body_length > 0 {
                requested_start.saturating_add(body_length)
            } else {
                body_length
            };
            tracing::warn!(
                url = %head.url,
                status = head.status,
                content_length = fallback,
                "No usable Content-Range total, falling back to Content-Length"
            );
            fallback
        }
    };

    let content_type = head
        .header(CONTENT_TYPE.as_str())
        .unwrap_or_default()
        .to_string();

    let supports_range_requests = head
        .header(ACCEPT_RANGES.as_str())
        .is_some_and(|value| value.to_ascii_lowercase().contains("bytes"));

    ResourceMetadata {
        content_length,
        content_type,
        supports_range_requests,
    }
}

// "bytes 0-99/1234" -> 1234; "*" totals are unknown
fn total_from_content_range(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}
