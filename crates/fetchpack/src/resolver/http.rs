//! HTTP implementation of the remote lookup

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::UrlLookup;
use crate::config::BundleConfig;
use crate::core::{BundleError, Result};

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    url: Option<String>,
}

/// Resolves ids through `GET {api_base}/generations/{id}/raw`
///
/// The endpoint answers with a JSON object whose `url` field is the download
/// URL. Requests carry the configured bearer token.
pub struct HttpUrlLookup {
    client: Client,
    api_base: Url,
    bearer_token: Option<String>,
}

impl HttpUrlLookup {
    pub fn from_config(config: &BundleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| BundleError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                field: None,
                suggestion: None,
            })?;

        Self::with_client(client, &config.api_base, config.bearer_token.clone())
    }

    pub fn with_client(client: Client, api_base: &str, bearer_token: Option<String>) -> Result<Self> {
        let api_base = Url::parse(api_base).map_err(|source| BundleError::InvalidUrl {
            url: api_base.to_string(),
            suggestion: "API base must be an absolute http(s) URL".to_string(),
            source,
        })?;

        if api_base.cannot_be_a_base() {
            return Err(BundleError::Configuration {
                message: format!("'{}' cannot be used as an API base", api_base),
                field: Some("api_base".to_string()),
                suggestion: None,
            });
        }

        Ok(Self { client, api_base, bearer_token })
    }

    /// Endpoint URL for one id, with the id percent-encoded as a path segment
    pub fn raw_url(&self, id: &str) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["generations", id, "raw"]);
        }
        url
    }
}

#[async_trait]
impl UrlLookup for HttpUrlLookup {
    async fn lookup(&self, id: &str) -> Result<String> {
        let url = self.raw_url(id);
        debug!("Looking up download URL: {}", url);

        let mut request = self.client.get(url.clone());
        if let Some(ref token) = self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| BundleError::HttpRequest {
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

        let body: RawResponse = response.json().await.map_err(|e| BundleError::MalformedResponse {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        body.url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| BundleError::MissingUrl { id: id.to_string() })
    }
}
