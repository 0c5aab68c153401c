//! Thin network wrappers: a retrying HTTP client, a client bound to a named
//! browser fingerprint preset, and a browser driver.

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder, Proxy};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub mod browser;
pub mod http_client;
pub mod locator;
pub mod retry;
pub mod tls_client;

pub use browser::DriverManager;
pub use http_client::HttpClient;
pub use locator::Locator;
pub use retry::{retry, Backoff, RetryPolicy};
pub use tls_client::{FingerprintProfile, TlsClient};

use crate::error::{ScrapeKitError, ScrapeKitResult};

/// HTTP request method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl Method {
    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_reqwest())
    }
}

impl std::str::FromStr for Method {
    type Err = ScrapeKitError;

    fn from_str(s: &str) -> ScrapeKitResult<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            _ => Err(ScrapeKitError::config(format!("Unsupported HTTP method: {}", s))),
        }
    }
}

/// Request payload
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(serde_json::Value),
    Form(HashMap<String, String>),
    Text(String),
}

/// One outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn with_form(mut self, fields: HashMap<String, String>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }

    pub fn with_text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }
}

/// Fully read response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Body as UTF-8 text
    pub fn text(&self) -> ScrapeKitResult<String> {
        String::from_utf8(self.body.clone())
            .map_err(|e| ScrapeKitError::decode(format!("{}: body is not UTF-8: {}", self.url, e)))
    }

    /// Body parsed as JSON
    pub fn json<T: DeserializeOwned>(&self) -> ScrapeKitResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ScrapeKitError::decode(format!("{}: {}", self.url, e)))
    }
}

/// Something that can carry a request and return the read response
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestSpec) -> ScrapeKitResult<HttpResponse>;
}

/// Issue one request per URL concurrently.
///
/// Results line up with `urls` by index; a failed request leaves its error in
/// its own slot and never cancels the others.
pub async fn fetch_all<T>(transport: &T, urls: &[String], method: Method) -> Vec<ScrapeKitResult<HttpResponse>>
where
    T: Transport + ?Sized,
{
    info!("Loading {} URLs for concurrent {} requests", urls.len(), method);

    let requests: Vec<RequestSpec> = urls.iter().map(|url| RequestSpec::new(method, url.as_str())).collect();
    let results = join_all(requests.iter().map(|request| transport.send(request))).await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    info!("Loaded responses for {} URLs ({} failed)", urls.len(), failed);
    results
}

/// Header map from plain string pairs; invalid entries are skipped with a warning
pub(crate) fn header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("Skipping invalid header: {}", name),
        }
    }
    map
}

/// Add proxies keyed by `http`, `https` or `all` to a client builder.
/// Only these proxies are used; proxy environment variables are ignored.
pub(crate) fn apply_proxies(
    builder: ClientBuilder,
    proxies: &HashMap<String, String>,
) -> ScrapeKitResult<ClientBuilder> {
    let mut builder = builder.no_proxy();
    for (scheme, url) in proxies {
        let proxy = match scheme.to_lowercase().as_str() {
            "http" => Proxy::http(url),
            "https" => Proxy::https(url),
            "all" => Proxy::all(url),
            other => {
                return Err(ScrapeKitError::config(format!(
                    "Unknown proxy scheme '{}', expected http, https or all",
                    other
                )))
            }
        }
        .map_err(|e| ScrapeKitError::config(format!("Invalid proxy {}: {}", url, e)))?;
        builder = builder.proxy(proxy);
    }
    Ok(builder)
}

/// Build the reqwest request for a spec; session headers come first and the
/// request's own headers override them
pub(crate) fn build_request(
    client: &Client,
    session_headers: &HashMap<String, String>,
    spec: &RequestSpec,
) -> ScrapeKitResult<reqwest::Request> {
    // Header names are case-insensitive
    let mut headers: HashMap<String, String> = session_headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect();
    headers.extend(spec.headers.iter().map(|(k, v)| (k.to_lowercase(), v.clone())));

    let mut builder = client
        .request(spec.method.to_reqwest(), spec.url.as_str())
        .headers(header_map(&headers));

    if !spec.query.is_empty() {
        builder = builder.query(&spec.query);
    }

    builder = match &spec.body {
        Some(RequestBody::Json(value)) => builder.json(value),
        Some(RequestBody::Form(fields)) => builder.form(fields),
        Some(RequestBody::Text(text)) => builder.body(text.clone()),
        None => builder,
    };

    builder.build().map_err(|e| ScrapeKitError::config(format!("Invalid request for {}: {}", spec.url, e)))
}

/// Send one request and read the whole body; non-2xx is an error
pub(crate) async fn execute(client: &Client, request: reqwest::Request) -> ScrapeKitResult<HttpResponse> {
    let response = client.execute(request).await?;

    let status = response.status();
    let url = response.url().to_string();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();

    if !status.is_success() {
        return Err(ScrapeKitError::HttpStatus {
            url,
            status: status.as_u16(),
        });
    }

    let body = response.bytes().await?.to_vec();
    debug!("Read {} bytes from {}", body.len(), url);

    Ok(HttpResponse {
        url,
        status: status.as_u16(),
        headers,
        body,
    })
}

/// The one session a client owns, plus the headers and proxies applied to it.
///
/// The reqwest client is built on first use and dropped whenever the proxy
/// set changes or the session is closed.
pub(crate) struct SessionState {
    headers: RwLock<HashMap<String, String>>,
    proxies: RwLock<HashMap<String, String>>,
    client: RwLock<Option<Client>>,
}

impl SessionState {
    pub(crate) fn new(headers: HashMap<String, String>, proxies: HashMap<String, String>) -> Self {
        Self {
            headers: RwLock::new(headers),
            proxies: RwLock::new(proxies),
            client: RwLock::new(None),
        }
    }

    /// Current session, building it with `build` if there is none
    pub(crate) async fn client(
        &self,
        build: impl FnOnce(&HashMap<String, String>) -> ScrapeKitResult<Client>,
    ) -> ScrapeKitResult<Client> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(client.clone());
        }

        let mut slot = self.client.write().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let proxies = self.proxies.read().await;
        let client = build(&proxies)?;
        *slot = Some(client.clone());
        Ok(client)
    }

    pub(crate) async fn headers(&self) -> HashMap<String, String> {
        self.headers.read().await.clone()
    }

    pub(crate) async fn merge_headers(&self, headers: HashMap<String, String>) {
        self.headers.write().await.extend(headers);
    }

    /// Replace the proxy set after checking it builds; the session is rebuilt on next use
    pub(crate) async fn replace_proxies(&self, proxies: HashMap<String, String>) -> ScrapeKitResult<()> {
        apply_proxies(Client::builder(), &proxies)?;
        *self.proxies.write().await = proxies;
        self.client.write().await.take();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn proxies(&self) -> HashMap<String, String> {
        self.proxies.read().await.clone()
    }

    /// Drop the session; returns whether one was open
    pub(crate) async fn close(&self) -> bool {
        self.client.write().await.take().is_some()
    }

    #[cfg(test)]
    pub(crate) async fn is_open(&self) -> bool {
        self.client.read().await.is_some()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn send(&self, request: &RequestSpec) -> ScrapeKitResult<HttpResponse> {
            if request.url.contains("fail") {
                return Err(ScrapeKitError::network("connection refused"));
            }
            Ok(HttpResponse {
                url: request.url.clone(),
                status: 200,
                headers: HashMap::new(),
                body: request.url.as_bytes().to_vec(),
            })
        }
    }

    #[tokio::test]
    async fn test_fetch_all_keeps_order_and_isolates_failures() {
        let urls = vec![
            "http://a.test/1".to_string(),
            "http://fail.test/2".to_string(),
            "http://c.test/3".to_string(),
        ];

        let results = fetch_all(&EchoTransport, &urls, Method::Get).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().text().unwrap(), "http://a.test/1");
        assert!(matches!(results[1], Err(ScrapeKitError::Network { .. })));
        assert_eq!(results[2].as_ref().unwrap().text().unwrap(), "http://c.test/3");
    }

    #[test]
    fn test_response_decoding() {
        let response = HttpResponse {
            url: "http://a.test".into(),
            status: 200,
            headers: [("content-type".to_string(), "application/json".to_string())].into(),
            body: br#"{"n": 1}"#.to_vec(),
        };
        assert_eq!(response.json::<serde_json::Value>().unwrap(), json!({"n": 1}));
        assert_eq!(response.header("Content-Type"), Some("application/json"));

        let broken = HttpResponse {
            body: vec![0xff, 0xfe],
            ..response
        };
        assert!(matches!(broken.text(), Err(ScrapeKitError::Decode { .. })));
        assert!(matches!(broken.json::<serde_json::Value>(), Err(ScrapeKitError::Decode { .. })));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("post".parse::<Method>().unwrap(), Method::Post);
        assert_eq!(Method::default().to_string(), "GET");
        assert!("BREW".parse::<Method>().is_err());
    }

    #[test]
    fn test_build_request_merges_headers_and_body() {
        let client = Client::new();
        let session: HashMap<String, String> = [
            ("x-session".to_string(), "1".to_string()),
            ("x-shared".to_string(), "session".to_string()),
        ]
        .into();
        let spec = RequestSpec::new(Method::Post, "http://a.test/items")
            .with_header("x-shared", "request")
            .with_query("page", "2")
            .with_json(json!({"name": "John"}));

        let request = build_request(&client, &session, &spec).unwrap();

        assert_eq!(request.method(), &reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "http://a.test/items?page=2");
        assert_eq!(request.headers()["x-session"], "1");
        assert_eq!(request.headers()["x-shared"], "request");
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, br#"{"name":"John"}"#);
    }

    #[test]
    fn test_proxy_keys() {
        let good: HashMap<String, String> = [
            ("http".to_string(), "http://proxy.test:8080".to_string()),
            ("https".to_string(), "http://proxy.test:8443".to_string()),
        ]
        .into();
        assert!(apply_proxies(Client::builder(), &good).is_ok());

        let bad: HashMap<String, String> = [("socks".to_string(), "http://proxy.test".to_string())].into();
        assert!(matches!(
            apply_proxies(Client::builder(), &bad),
            Err(ScrapeKitError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_session_state_lifecycle() {
        let state = SessionState::new(HashMap::new(), HashMap::new());
        assert!(!state.is_open().await);

        state.client(|_| Ok(Client::new())).await.unwrap();
        assert!(state.is_open().await);

        state
            .replace_proxies([("all".to_string(), "http://proxy.test:3128".to_string())].into())
            .await
            .unwrap();
        assert!(!state.is_open().await);
        assert_eq!(state.proxies().await.len(), 1);

        state.client(|_| Ok(Client::new())).await.unwrap();
        assert!(state.close().await);
        assert!(!state.close().await);
    }
}
