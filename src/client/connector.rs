//! Stream opening for the reconnection engine.
//!
//! A [`Connector`] turns an endpoint and an optional watermark into a stream of
//! decoded frames. [`HttpConnector`] does it over HTTP with `reqwest`; tests
//! plug in scripted connectors.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tracing::debug;

use crate::transport::parse::{EventStream, Frame};
use crate::utils::error::ClientError;

const LAST_EVENT_ID: &str = "Last-Event-ID";
const EVENT_STREAM: &str = "text/event-stream";

/// Decoded frames of one open stream. Ends or errors when the stream is lost.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ClientError>> + Send>>;

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a stream on `endpoint`, asking the server to replay everything
    /// after `watermark` when one is given.
    async fn connect(
        &self,
        endpoint: &str,
        watermark: Option<u64>,
    ) -> Result<FrameStream, ClientError>;
}

#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new(connect_timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(
        &self,
        endpoint: &str,
        watermark: Option<u64>,
    ) -> Result<FrameStream, ClientError> {
        let mut request = self
            .client
            .get(endpoint)
            .header(ACCEPT, EVENT_STREAM)
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = watermark {
            request = request.header(LAST_EVENT_ID, id.to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with(EVENT_STREAM) {
            return Err(ClientError::ContentType(content_type));
        }

        debug!(endpoint, ?watermark, "event stream opened");
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ClientError::from));
        Ok(Box::pin(EventStream::new(Box::pin(body))))
    }
}
