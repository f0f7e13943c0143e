//! Streaming body sources for the staging downloader

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use tracing::debug;

use crate::config::BundleConfig;
use crate::core::{BundleError, Result};

/// Chunked response body
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Opens a URL as a stream of byte chunks
///
/// Any error from `open`, or from the stream itself, ends the staging run.
#[async_trait]
pub trait BodySource: Send + Sync {
    async fn open(&self, url: &str) -> Result<ByteStream>;
}

/// Body source backed by reqwest
pub struct HttpBodySource {
    client: Client,
}

impl HttpBodySource {
    /// Create a body source from configuration
    ///
    /// Only the connect timeout is applied; a whole-request timeout would cut
    /// off large media files mid-stream.
    pub fn from_config(config: &BundleConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| BundleError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                field: None,
                suggestion: None,
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BodySource for HttpBodySource {
    async fn open(&self, url: &str) -> Result<ByteStream> {
        debug!("Opening body stream: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| BundleError::HttpRequest {
            url: url.to_string(),
            source: e,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BundleError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let url = url.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|e| BundleError::HttpRequest {
                    url: url.clone(),
                    source: e,
                })
            })
            .boxed())
    }
}
