//! HTTP client wrapper for the listing pages and archive downloads.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;

use crate::config::{HarvesterConfig, RetryPolicy};
use crate::error::{HarvesterError, Result};

/// User agent string identifying this harvester.
const USER_AGENT: &str = concat!("fsa-harvester/", env!("CARGO_PKG_VERSION"));

/// Blocking fetcher with a bounded retry policy.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    retry: RetryPolicy,
    page_timeout: Duration,
    archive_timeout: Option<Duration>,
}

impl Fetcher {
    /// Create a fetcher from the run configuration.
    ///
    /// The client itself has no total timeout; each request sets its own.
    pub fn new(config: &HarvesterConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .timeout(None::<Duration>)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            retry: config.retry,
            page_timeout: config.timeout,
            archive_timeout: config.archive_timeout,
        })
    }

    /// Fetch an HTML listing page as text.
    ///
    /// Bounded by the configured page timeout and retried on transient failures.
    ///
    /// # Arguments
    /// * `url` - Listing page URL
    ///
    /// # Returns
    /// The page body, decoded lossily as UTF-8
    pub fn fetch_page(&self, url: &str) -> Result<String> {
        let bytes = self.download_bytes(url, Some(self.page_timeout))?;
        Ok(bytes_to_string(&bytes, url))
    }

    /// Fetch a full archive payload into memory.
    ///
    /// # Arguments
    /// * `url` - Absolute archive URL
    ///
    /// # Returns
    /// Raw bytes of the response body
    pub fn fetch_archive(&self, url: &str) -> Result<Vec<u8>> {
        self.download_bytes(url, self.archive_timeout)
    }

    /// Download content from a URL with retry logic.
    ///
    /// Connection errors, timeouts and 5xx responses are retried with
    /// exponential backoff. 4xx responses and other errors fail immediately.
    fn download_bytes(&self, url: &str, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let attempts = self.retry.attempts();
        let mut last_error: Option<String> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt);
                tracing::debug!(url, attempt, delay_ms = delay.as_millis() as u64, "Retrying after delay");
                thread::sleep(delay);
            }

            let mut request = self.client.get(url);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();

                    if status.is_server_error() {
                        tracing::warn!(
                            url,
                            status = %status,
                            attempt = attempt + 1,
                            max_attempts = attempts,
                            "Server error, will retry"
                        );
                        last_error = Some(format!("Server error: {status}"));
                        continue;
                    }

                    if !status.is_success() {
                        return Err(HarvesterError::HttpStatus {
                            url: url.to_string(),
                            status: status.as_u16(),
                        });
                    }

                    match response.bytes() {
                        Ok(bytes) => return Ok(bytes.to_vec()),
                        Err(e) if e.is_timeout() => {
                            tracing::warn!(url, error = %e, attempt = attempt + 1, "Body read timed out, will retry");
                            last_error = Some(e.to_string());
                            continue;
                        }
                        Err(e) => {
                            return Err(HarvesterError::Fetch {
                                url: url.to_string(),
                                source: e,
                            })
                        }
                    }
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        tracing::warn!(
                            url,
                            error = %e,
                            attempt = attempt + 1,
                            max_attempts = attempts,
                            "Connection error, will retry"
                        );
                        last_error = Some(e.to_string());
                        continue;
                    }
                    return Err(HarvesterError::Fetch {
                        url: url.to_string(),
                        source: e,
                    });
                }
            }
        }

        Err(HarvesterError::RetriesExhausted {
            url: url.to_string(),
            attempts,
            message: last_error.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Decode a response body as UTF-8, replacing invalid sequences.
pub fn bytes_to_string(bytes: &[u8], what: &str) -> String {
    match String::from_utf8_lossy(bytes) {
        std::borrow::Cow::Borrowed(text) => text.to_string(),
        std::borrow::Cow::Owned(text) => {
            tracing::warn!(source = what, "Response contained invalid UTF-8, replaced");
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_config() -> HarvesterConfig {
        HarvesterConfig::default().with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        })
    }

    #[test]
    fn test_create_fetcher() {
        assert!(Fetcher::new(&HarvesterConfig::default()).is_ok());
    }

    #[test]
    fn test_bytes_to_string_lossy() {
        assert_eq!(bytes_to_string(b"plain", "test"), "plain");
        assert_eq!(bytes_to_string(&[0x61, 0xff, 0x62], "test"), "a\u{fffd}b");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_page_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/opendata/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/opendata/", server.uri());
        let body = tokio::task::spawn_blocking(move || {
            Fetcher::new(&fast_config())?.fetch_page(&url)
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(body, "<html>ok</html>");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/missing.7z", server.uri());
        let err = tokio::task::spawn_blocking(move || {
            Fetcher::new(&fast_config())?.fetch_archive(&url)
        })
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(err, HarvesterError::HttpStatus { status: 404, .. }));
        assert!(err.is_fetch_error());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_error_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.7z"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data.7z"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"7z-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/data.7z", server.uri());
        let bytes = tokio::task::spawn_blocking(move || {
            Fetcher::new(&fast_config())?.fetch_archive(&url)
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(bytes, b"7z-bytes");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_error_exhausts_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let url = format!("{}/data.7z", server.uri());
        let err = tokio::task::spawn_blocking(move || {
            Fetcher::new(&fast_config())?.fetch_archive(&url)
        })
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(
            err,
            HarvesterError::RetriesExhausted { attempts: 3, .. }
        ));
    }
}
