pub mod backoff;
pub mod http_fetcher;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;

use crate::app::Result;
use crate::config::FetchConfig;
use crate::domain::Validators;

pub use backoff::BackoffPolicy;
pub use http_fetcher::HttpFetcher;
pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    /// Retries after the first attempt for transient failures.
    pub max_retries: usize,
    pub backoff: BackoffPolicy,
    /// Minimum wait after a rate-limit response.
    pub rate_limit_delay: Duration,
    /// Sent as `If-None-Match`/`If-Modified-Since`.
    pub conditional: Validators,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl FetchOptions {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            backoff: config.backoff(),
            rate_limit_delay: config.rate_limit_delay(),
            conditional: Validators::default(),
        }
    }

    pub fn with_validators(mut self, etag: Option<&str>, last_modified: Option<&str>) -> Self {
        self.conditional = Validators {
            etag: etag.map(String::from),
            last_modified: last_modified.map(String::from),
        };
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug)]
pub enum FetchResult {
    /// New content fetched successfully
    Content { body: Vec<u8>, meta: ResponseMeta },
    /// Content not modified (HTTP 304)
    NotModified,
}

#[async_trait]
pub trait Fetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResult>;
}
