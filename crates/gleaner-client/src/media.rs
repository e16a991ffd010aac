use std::time::Duration;

use gleaner_core::error::AppError;
use gleaner_core::traits::MediaFetcher;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};

/// Media hosts reject requests that do not look like they come from a browser
/// on the source site, so every request carries this user agent and a referer.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// HTTP media fetcher using reqwest.
#[derive(Clone)]
pub struct ReqwestMediaFetcher {
    client: Client,
    timeout_secs: u64,
}

impl ReqwestMediaFetcher {
    pub fn new(referer: &str) -> Result<Self, AppError> {
        Self::with_timeout(referer, Duration::from_secs(10))
    }

    pub fn with_timeout(referer: &str, timeout: Duration) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            REFERER,
            HeaderValue::from_str(referer)
                .map_err(|e| AppError::ConfigError(format!("Invalid referer {referer:?}: {e}")))?,
        );

        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl MediaFetcher for ReqwestMediaFetcher {
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else {
                AppError::HttpError(format!("Failed to read response body: {e}"))
            }
        })?;
        Ok(bytes.to_vec())
    }
}
