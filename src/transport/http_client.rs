use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::info;

use super::retry::{retry, RetryPolicy};
use super::{apply_proxies, build_request, execute, fetch_all, HttpResponse, Method, RequestSpec, SessionState, Transport};
use crate::config::HttpConfig;
use crate::error::{ScrapeKitError, ScrapeKitResult};
use crate::logging::{LogContext, PerformanceLogger, RequestIdGenerator};

/// Async HTTP client with one lazily built session, a cap on in-flight
/// requests and per-request retries
pub struct HttpClient {
    config: HttpConfig,
    session: SessionState,
    gate: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Self {
        info!(
            "HTTP client initialized with max_concurrent_requests={}, retries={}",
            config.max_concurrent_requests, config.retries
        );

        Self {
            config: config.clone(),
            session: SessionState::new(config.headers.clone(), config.proxies.clone()),
            gate: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            policy: RetryPolicy::from_http_config(config),
        }
    }

    /// Override the retry policy taken from the configuration
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn client(&self) -> ScrapeKitResult<Client> {
        let timeout = Duration::from_secs(self.config.request_timeout_seconds);
        self.session
            .client(|proxies| {
                let builder = Client::builder()
                    .timeout(timeout)
                    .connect_timeout(Duration::from_secs(10))
                    .cookie_store(true)
                    .redirect(reqwest::redirect::Policy::limited(10))
                    .pool_max_idle_per_host(0);
                let client = apply_proxies(builder, proxies)?.build()?;
                info!("HTTP session created");
                Ok(client)
            })
            .await
    }

    /// Send one request, retrying recoverable failures
    pub async fn send_request(&self, request: &RequestSpec) -> ScrapeKitResult<HttpResponse> {
        let request_id = RequestIdGenerator::generate();
        let timer = PerformanceLogger::new(
            LogContext::new("http", "send_request")
                .with_request_id(&request_id)
                .with_url(&request.url),
        );

        let result = retry(&self.policy, &format!("{} {}", request.method, request.url), || {
            self.send_once(request)
        })
        .await;

        match &result {
            Ok(response) => timer.finish_with_status(
                &format!("Request to {} returned status code: {}", request.url, response.status),
                response.status.to_string(),
            ),
            Err(e) => timer.finish_with_error(&format!("Error sending request to {}", request.url), e),
        }
        result
    }

    async fn send_once(&self, request: &RequestSpec) -> ScrapeKitResult<HttpResponse> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| ScrapeKitError::internal("request gate closed"))?;

        info!("Sending async {} request to {}", request.method, request.url);
        let client = self.client().await?;
        let headers = self.session.headers().await;
        let prepared = build_request(&client, &headers, request)?;
        execute(&client, prepared).await
    }

    /// GET a URL
    pub async fn get(&self, url: &str) -> ScrapeKitResult<HttpResponse> {
        self.send_request(&RequestSpec::get(url)).await
    }

    /// Request every URL concurrently; results are aligned with `urls`
    pub async fn send_multi_request(&self, urls: &[String], method: Method) -> Vec<ScrapeKitResult<HttpResponse>> {
        fetch_all(self, urls, method).await
    }

    /// Merge headers into the session defaults
    pub async fn set_headers(&self, headers: HashMap<String, String>) {
        info!("Headers set: {:?}", headers.keys().collect::<Vec<_>>());
        self.session.merge_headers(headers).await;
    }

    /// Replace the session proxies (`http`, `https` or `all` keys)
    pub async fn set_proxies(&self, proxies: HashMap<String, String>) -> ScrapeKitResult<()> {
        self.session.replace_proxies(proxies).await?;
        info!("Proxies set");
        Ok(())
    }

    /// Drop the session; the next request opens a new one
    pub async fn close(&self) {
        if self.session.close().await {
            info!("HTTP session closed");
        }
    }

    /// Free slots in the concurrency gate
    pub fn available_permits(&self) -> usize {
        self.gate.available_permits()
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: &RequestSpec) -> ScrapeKitResult<HttpResponse> {
        self.send_request(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jokes::Joke;
    use crate::transport::test_server;

    fn fast_config() -> HttpConfig {
        HttpConfig {
            max_concurrent_requests: 2,
            retries: 3,
            backoff_multiplier_ms: 1,
            backoff_min_ms: 1,
            backoff_max_ms: 5,
            request_timeout_seconds: 5,
            ..HttpConfig::default()
        }
    }

    #[tokio::test]
    async fn test_get_and_decode() {
        let server = test_server::spawn().await;
        let client = HttpClient::new(&fast_config());

        let response = client.get(&server.url("/joke")).await.unwrap();
        assert!(response.is_success());
        assert_eq!(response.header("content-type"), Some("application/json"));

        let joke: Joke = response.json().unwrap();
        assert_eq!(joke.category, "Programming");
        assert_eq!(joke.joke_type, "single");
        assert!(joke.safe);
    }

    #[tokio::test]
    async fn test_multi_request_with_one_transport_failure() {
        let server = test_server::spawn().await;
        let client = HttpClient::new(&fast_config());
        let urls = vec![server.url("/a"), test_server::closed_url().await, server.url("/c")];

        let results = client.send_multi_request(&urls, Method::Get).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().text().unwrap(), "ok /a");
        assert!(results[1].is_err());
        assert!(results[1].as_ref().unwrap_err().is_recoverable());
        assert_eq!(results[2].as_ref().unwrap().text().unwrap(), "ok /c");
        assert_eq!(client.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = test_server::spawn().await;
        let client = HttpClient::new(&fast_config());

        let response = client.get(&server.url("/flaky")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(server.hits(), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = test_server::spawn().await;
        let client = HttpClient::new(&fast_config());

        let err = client.get(&server.url("/missing")).await.unwrap_err();
        assert!(matches!(err, ScrapeKitError::HttpStatus { status: 404, .. }));
        assert_eq!(server.hits(), 1);

        let err = client.get(&server.url("/error")).await.unwrap_err();
        assert!(matches!(err, ScrapeKitError::HttpStatus { status: 500, .. }));
        assert_eq!(server.hits(), 4);
    }

    #[tokio::test]
    async fn test_session_headers_are_sent() {
        let server = test_server::spawn().await;
        let client = HttpClient::new(&fast_config());
        client
            .set_headers([("X-Scraper".to_string(), "scrapekit".to_string())].into())
            .await;

        let echoed = client
            .send_request(&RequestSpec::get(server.url("/headers")).with_header("X-Trace", "abc"))
            .await
            .unwrap()
            .text()
            .unwrap();

        assert!(echoed.contains("x-scraper: scrapekit"));
        assert!(echoed.contains("x-trace: abc"));
    }

    #[tokio::test]
    async fn test_close_and_reopen() {
        let server = test_server::spawn().await;
        let client = HttpClient::new(&fast_config());

        client.get(&server.url("/one")).await.unwrap();
        client.close().await;
        client.close().await;
        assert!(client.get(&server.url("/two")).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_proxy_is_rejected() {
        let client = HttpClient::new(&fast_config());
        let err = client
            .set_proxies([("ftp".to_string(), "http://proxy.test".to_string())].into())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "configuration");
    }
}
