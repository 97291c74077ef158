use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::app::{Result, TransportFailure};
use crate::fetcher::transport::{
    ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};
use crate::fetcher::{FetchOptions, FetchResult, Fetcher, ResponseMeta};

pub const DEFAULT_USER_AGENT: &str = "folio/0.1.0";

/// Upper bound on how long a server-provided Retry-After can hold us back.
const MAX_RATE_LIMIT_DELAY: Duration = Duration::from_secs(600);

pub struct HttpFetcher {
    transport: Arc<dyn Transport>,
}

impl HttpFetcher {
    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let transport = ReqwestTransport::new(user_agent)?;
        Ok(Self::with_transport(Arc::new(transport)))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn attempt(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> std::result::Result<FetchResult, TransportFailure> {
        let mut headers = Vec::new();
        if let Some(etag) = &options.conditional.etag {
            headers.push(("if-none-match".to_string(), etag.clone()));
        }
        if let Some(last_modified) = &options.conditional.last_modified {
            headers.push(("if-modified-since".to_string(), last_modified.clone()));
        }

        let request = TransportRequest {
            url: url.to_string(),
            headers,
            timeout: options.timeout,
        };

        let response = self
            .transport
            .request(request)
            .await
            .map_err(|e| match e {
                TransportError::Timeout => TransportFailure::Timeout,
                TransportError::Unreachable(reason) => TransportFailure::Unreachable(reason),
            })?;

        classify_response(response)
    }
}

fn classify_response(
    response: TransportResponse,
) -> std::result::Result<FetchResult, TransportFailure> {
    match response.status {
        304 => Ok(FetchResult::NotModified),
        200..=299 => {
            let meta = ResponseMeta {
                status: response.status,
                etag: response.header("etag").map(String::from),
                last_modified: response.header("last-modified").map(String::from),
                content_type: response.header("content-type").map(String::from),
            };
            Ok(FetchResult::Content {
                body: response.body,
                meta,
            })
        }
        429 => Err(TransportFailure::RateLimited {
            retry_after: response
                .header("retry-after")
                .and_then(|v| parse_retry_after(v, Utc::now())),
        }),
        status => Err(TransportFailure::HttpError(status)),
    }
}

/// Retry-After is either delta-seconds or an HTTP date.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    at.signed_duration_since(now).to_std().ok()
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResult> {
        let mut retries = 0usize;

        loop {
            debug!("Fetching {} (attempt {})", url, retries + 1);

            let failure = match self.attempt(url, options).await {
                Ok(result) => {
                    if retries > 0 {
                        info!("Fetch of {} succeeded after {} retries", url, retries);
                    }
                    return Ok(result);
                }
                Err(failure) => failure,
            };

            if retries >= options.max_retries {
                warn!("Giving up on {} after {} attempts: {}", url, retries + 1, failure);
                return Err(failure.into());
            }

            let delay = match &failure {
                TransportFailure::RateLimited { retry_after } => {
                    let backoff = options.backoff.delay(retries as u32);
                    let hinted = retry_after.unwrap_or(Duration::ZERO);
                    Some(
                        options
                            .rate_limit_delay
                            .max(hinted)
                            .max(backoff)
                            .min(MAX_RATE_LIMIT_DELAY),
                    )
                }
                f if f.is_transient() => Some(options.backoff.delay(retries as u32)),
                _ => None,
            };
            let Some(delay) = delay else {
                return Err(failure.into());
            };

            warn!(
                "Fetch of {} failed (attempt {}/{}): {}. Retrying in {:?}...",
                url,
                retries + 1,
                options.max_retries + 1,
                failure,
                delay
            );

            sleep(delay).await;
            retries += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::FolioError;
    use crate::fetcher::testing::ScriptedTransport;
    use crate::fetcher::BackoffPolicy;

    const URL: &str = "https://example.com/book/1/";

    fn options(max_retries: usize) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(1),
            max_retries,
            backoff: BackoffPolicy::immediate(),
            rate_limit_delay: Duration::from_millis(1),
            ..FetchOptions::default()
        }
    }

    fn fetcher(transport: &Arc<ScriptedTransport>) -> HttpFetcher {
        HttpFetcher::with_transport(transport.clone())
    }

    #[tokio::test]
    async fn test_content_with_metadata() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(
            URL,
            Ok(TransportResponse::ok("<html></html>")
                .with_header("ETag", "\"v1\"")
                .with_header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT")
                .with_header("Content-Type", "text/html")),
        );

        let result = fetcher(&transport).fetch(URL, &options(0)).await.unwrap();
        match result {
            FetchResult::Content { body, meta } => {
                assert_eq!(body, b"<html></html>");
                assert_eq!(meta.status, 200);
                assert_eq!(meta.etag.as_deref(), Some("\"v1\""));
                assert_eq!(
                    meta.last_modified.as_deref(),
                    Some("Mon, 01 Jan 2024 00:00:00 GMT")
                );
                assert_eq!(meta.content_type.as_deref(), Some("text/html"));
            }
            FetchResult::NotModified => panic!("expected content"),
        }
    }

    #[tokio::test]
    async fn test_conditional_headers_sent_and_not_modified() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(URL, Ok(TransportResponse::status(304)));

        let opts = options(0).with_validators(Some("\"v1\""), Some("yesterday"));
        let result = fetcher(&transport).fetch(URL, &opts).await.unwrap();
        assert!(matches!(result, FetchResult::NotModified));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0]
            .headers
            .contains(&("if-none-match".to_string(), "\"v1\"".to_string())));
        assert!(requests[0]
            .headers
            .contains(&("if-modified-since".to_string(), "yesterday".to_string())));
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(URL, Err(TransportError::Timeout));
        transport.push(URL, Ok(TransportResponse::status(502)));
        transport.push(URL, Err(TransportError::Unreachable("reset".into())));
        transport.push(URL, Ok(TransportResponse::ok("done")));

        let result = fetcher(&transport).fetch(URL, &options(3)).await.unwrap();
        assert!(matches!(result, FetchResult::Content { .. }));
        assert_eq!(transport.request_count(URL), 4);
    }

    #[tokio::test]
    async fn test_retries_exhausted_surfaces_last_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(URL, Err(TransportError::Timeout));

        let err = fetcher(&transport).fetch(URL, &options(2)).await.unwrap_err();
        assert!(matches!(err, FolioError::Transport(TransportFailure::Timeout)));
        assert_eq!(transport.request_count(URL), 3);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(URL, Ok(TransportResponse::status(404)));

        let err = fetcher(&transport).fetch(URL, &options(5)).await.unwrap_err();
        assert!(matches!(
            err,
            FolioError::Transport(TransportFailure::HttpError(404))
        ));
        assert_eq!(transport.request_count(URL), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_then_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(URL, Ok(TransportResponse::status(429).with_header("Retry-After", "0")));
        transport.push(URL, Ok(TransportResponse::status(429)));
        transport.push(URL, Ok(TransportResponse::ok("third time")));

        let result = fetcher(&transport).fetch(URL, &options(3)).await.unwrap();
        match result {
            FetchResult::Content { body, .. } => assert_eq!(body, b"third time"),
            FetchResult::NotModified => panic!("expected content"),
        }
        assert_eq!(transport.request_count(URL), 3);
    }

    #[tokio::test]
    async fn test_rate_limited_exhausted() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push(URL, Ok(TransportResponse::status(429)));

        let err = fetcher(&transport).fetch(URL, &options(1)).await.unwrap_err();
        assert!(matches!(
            err,
            FolioError::Transport(TransportFailure::RateLimited { .. })
        ));
        assert_eq!(transport.request_count(URL), 2);
    }

    #[test]
    fn test_parse_retry_after() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));

        let at = DateTime::parse_from_rfc2822("Mon, 01 Jan 2024 00:01:00 +0000")
            .unwrap()
            .with_timezone(&Utc);
        let base = at - chrono::Duration::seconds(60);
        assert_eq!(
            parse_retry_after("Mon, 01 Jan 2024 00:01:00 +0000", base),
            Some(Duration::from_secs(60))
        );
        assert_eq!(parse_retry_after("garbage", now), None);
    }
}
