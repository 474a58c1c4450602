use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use reqwest::{Client, RequestBuilder};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::NewsConfig;
use crate::types::{Result, WorkflowError};

/// HTTP settings for feed and article downloads.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_redirects: usize,
    /// Minimum spacing between two requests to the same host.
    pub min_host_interval: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Newsroom/1.0".to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 2,
            max_redirects: 10,
            min_host_interval: Duration::from_secs(1),
        }
    }
}

impl From<&NewsConfig> for FetchConfig {
    fn from(news: &NewsConfig) -> Self {
        Self {
            user_agent: news.user_agent.clone(),
            timeout_seconds: news.timeout_seconds,
            max_retries: news.max_retries,
            retry_delay_seconds: news.retry_delay_seconds,
            ..Self::default()
        }
    }
}

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    rate_limiter: Arc<RwLock<HashMap<String, Instant>>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self {
            client,
            config,
            rate_limiter: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// GET a URL as text, retrying transient failures with exponential backoff.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        self.send_text(url, || self.client.get(url)).await
    }

    /// POST a urlencoded form and return the response body as text.
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<String> {
        self.send_text(url, || self.client.post(url).form(form)).await
    }

    async fn send_text<F>(&self, url: &str, request: F) -> Result<String>
    where
        F: Fn() -> RequestBuilder,
    {
        let start_time = Instant::now();
        debug!("Fetching: {}", url);

        self.apply_rate_limit(url).await?;

        let delay = self.config.retry_delay_seconds.max(1);
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: Duration::from_secs(delay),
            initial_interval: Duration::from_secs(delay),
            max_interval: Duration::from_secs(delay * 32),
            multiplier: 2.0,
            max_elapsed_time: Some(Duration::from_secs(delay * 60)),
            ..Default::default()
        };

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            let retryable = match request().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let content = response.text().await?;
                        info!(
                            "Fetched {} ({} bytes in {} ms)",
                            url,
                            content.len(),
                            start_time.elapsed().as_millis()
                        );
                        return Ok(content);
                    }

                    last_error = Some(WorkflowError::Service(format!(
                        "HTTP {}: {}",
                        status,
                        status.canonical_reason().unwrap_or("Unknown")
                    )));
                    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                }
                Err(e) => {
                    last_error = Some(WorkflowError::from(e));
                    true
                }
            };

            if !retryable || attempt == self.config.max_retries {
                break;
            }
            match backoff.next_backoff() {
                Some(delay) => {
                    warn!("Attempt {} failed for {}, retrying in {:?}", attempt + 1, url, delay);
                    tokio::time::sleep(delay).await;
                }
                None => break,
            }
        }

        error!("Failed to fetch {} after {} ms", url, start_time.elapsed().as_millis());
        Err(last_error.unwrap_or_else(|| WorkflowError::Service(format!("Failed to fetch {}", url))))
    }

    /// Wait until the host's next request slot. The slot is reserved before
    /// sleeping so the limiter lock is never held across the wait.
    async fn apply_rate_limit(&self, url: &str) -> Result<()> {
        let parsed_url = Url::parse(url)?;
        let host = parsed_url.host_str().unwrap_or("").to_string();
        let min_interval = self.config.min_host_interval;

        let now = Instant::now();
        let slot = {
            let mut rate_limiter = self.rate_limiter.write().await;
            let slot = match rate_limiter.get(&host) {
                Some(last_request) => (*last_request + min_interval).max(now),
                None => now,
            };
            rate_limiter.insert(host.clone(), slot);
            slot
        };

        if slot > now {
            let wait_time = slot - now;
            debug!("Rate limiting {}: waiting {:?}", host, wait_time);
            tokio::time::sleep(wait_time).await;
        }

        Ok(())
    }
}
