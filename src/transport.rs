//! Network transport contract and its reqwest implementation.
//!
//! The executor only needs three things from the network: the response head,
//! an ordered stream of body chunks, and a terminal error if one occurs (a
//! stream item that is `Err`). [`RangeTransport`] captures exactly that so
//! tests can substitute a scripted transport.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, RANGE};
use std::pin::Pin;
use url::Url;

use crate::config::HttpConfig;
use crate::error::{Error, Result};
use crate::interval::Interval;

/// Ordered body chunks of a range response
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Status line and headers of a range response
#[derive(Clone, Debug)]
pub struct ResponseHead {
    /// Resource the response belongs to
    pub url: Url,
    /// HTTP status code (206 on the expected path)
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Case-insensitive header lookup as a string
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Whether the server honoured the range (206 Partial Content)
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }
}

/// A started range request: head already received, body still streaming
pub struct RangeResponse {
    /// Response metadata
    pub head: ResponseHead,
    /// Body chunks in order
    pub body: ByteStream,
}

/// Issues streamed range requests
#[async_trait]
pub trait RangeTransport: Send + Sync {
    /// Request `interval` of `url` and return once the response head arrives
    async fn fetch_range(&self, url: &Url, interval: Interval) -> Result<RangeResponse>;
}

/// `Range` header value for an interval (`bytes=a-b` or open-ended `bytes=a-`)
pub fn range_header_value(interval: Interval) -> String {
    if interval.is_open_ended() {
        format!("bytes={}-", interval.start())
    } else {
        format!("bytes={}-{}", interval.start(), interval.end() - 1)
    }
}

/// [`RangeTransport`] backed by a shared reqwest client
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client from the HTTP settings
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| concat!("media-cache-dl/", env!("CARGO_PKG_VERSION")).to_string());

        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(user_agent);
        // reqwest's timeout spans the whole body, so zero means "no limit"
        if !config.read_timeout.is_zero() {
            builder = builder.timeout(config.read_timeout);
        }
        let client = builder.build()?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RangeTransport for HttpTransport {
    async fn fetch_range(&self, url: &Url, interval: Interval) -> Result<RangeResponse> {
        tracing::debug!(url = %url, range = %interval, "Issuing range request");

        let response = self
            .client
            .get(url.clone())
            .header(RANGE, range_header_value(interval))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let head = ResponseHead {
            url: url.clone(),
            status: status.as_u16(),
            headers: response.headers().clone(),
        };
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::from))
            .boxed();

        Ok(RangeResponse { head, body })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn range_header_is_inclusive() {
        let bounded = Interval::new(100, 200).unwrap();
        let open = Interval::open_ended(100).unwrap();

        assert_eq!(range_header_value(bounded), "bytes=100-199");
        assert_eq!(range_header_value(open), "bytes=100-");
    }

    #[tokio::test]
    async fn fetch_range_sends_range_header_and_streams_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/video.mp4"))
            .and(header("range", "bytes=10-19"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "bytes 10-19/100")
                    .set_body_bytes(vec![7u8; 10]),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/video.mp4", server.uri())).unwrap();
        let response = transport
            .fetch_range(&url, Interval::new(10, 20).unwrap())
            .await
            .unwrap();

        assert!(response.head.is_partial());
        assert_eq!(response.head.header("Content-Range"), Some("bytes 10-19/100"));

        let chunks: Vec<Bytes> = response
            .body
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        let body: Vec<u8> = chunks.concat();
        assert_eq!(body, vec![7u8; 10]);
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(416))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/missing.mp4", server.uri())).unwrap();
        let result = transport
            .fetch_range(&url, Interval::new(0, 10).unwrap())
            .await;

        match result {
            Err(Error::HttpStatus { status, .. }) => assert_eq!(status, 416),
            Err(e) => panic!("expected HttpStatus, got {e:?}"),
            Ok(_) => panic!("expected HttpStatus, got a response"),
        }
    }
}
