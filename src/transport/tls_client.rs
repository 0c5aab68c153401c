use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::tls::Version;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use super::{apply_proxies, build_request, execute, fetch_all, HttpResponse, Method, RequestSpec, SessionState, Transport};
use crate::config::TlsConfig;
use crate::error::{ScrapeKitError, ScrapeKitResult};
use crate::logging::{LogContext, PerformanceLogger, RequestIdGenerator};

/// Named client preset: the identity a session presents to servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintProfile {
    pub identifier: &'static str,
    pub user_agent: &'static str,
    /// Default headers sent with every request, in browser order
    pub headers: &'static [(&'static str, &'static str)],
    pub min_tls_version: Version,
    /// Offer HTTP/2 through ALPN
    pub http2: bool,
}

const CHROME_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9";

static PROFILES: &[FingerprintProfile] = &[
    FingerprintProfile {
        identifier: "chrome_108",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36",
        headers: &[
            ("sec-ch-ua", "\"Not?A_Brand\";v=\"8\", \"Chromium\";v=\"108\", \"Google Chrome\";v=\"108\""),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", "\"Windows\""),
            ("upgrade-insecure-requests", "1"),
            ("accept", CHROME_ACCEPT),
            ("accept-language", "en-US,en;q=0.9"),
        ],
        min_tls_version: Version::TLS_1_2,
        http2: true,
    },
    FingerprintProfile {
        identifier: "chrome_120",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        headers: &[
            ("sec-ch-ua", "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\""),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", "\"Windows\""),
            ("upgrade-insecure-requests", "1"),
            ("accept", CHROME_ACCEPT),
            ("accept-language", "en-US,en;q=0.9"),
        ],
        min_tls_version: Version::TLS_1_2,
        http2: true,
    },
    FingerprintProfile {
        identifier: "firefox_120",
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
        headers: &[
            ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"),
            ("accept-language", "en-US,en;q=0.5"),
            ("upgrade-insecure-requests", "1"),
            ("sec-fetch-dest", "document"),
            ("sec-fetch-mode", "navigate"),
        ],
        min_tls_version: Version::TLS_1_2,
        http2: true,
    },
    FingerprintProfile {
        identifier: "safari_16_0",
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.0 Safari/605.1.15",
        headers: &[
            ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
            ("accept-language", "en-US,en;q=0.9"),
        ],
        min_tls_version: Version::TLS_1_2,
        http2: true,
    },
    FingerprintProfile {
        identifier: "okhttp4_android_13",
        user_agent: "okhttp/4.9.3",
        headers: &[("accept", "*/*")],
        min_tls_version: Version::TLS_1_2,
        http2: false,
    },
];

impl FingerprintProfile {
    /// Look up a preset by identifier, ignoring case
    pub fn from_identifier(identifier: &str) -> Option<&'static FingerprintProfile> {
        PROFILES.iter().find(|p| p.identifier.eq_ignore_ascii_case(identifier))
    }

    pub fn all() -> &'static [FingerprintProfile] {
        PROFILES
    }

    /// Preset headers as a header map, keeping the preset's order
    pub fn default_headers(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    map.append(name, value);
                }
                _ => warn!("Skipping invalid preset header {} in {}", name, self.identifier),
            }
        }
        map
    }
}

/// HTTP client whose session presents a fixed browser preset
pub struct TlsClient {
    profile: &'static FingerprintProfile,
    timeout: Duration,
    session: SessionState,
}

impl TlsClient {
    pub fn new(config: &TlsConfig) -> ScrapeKitResult<Self> {
        let profile = FingerprintProfile::from_identifier(&config.client_identifier).ok_or_else(|| {
            ScrapeKitError::config(format!("Unknown TLS client identifier: {}", config.client_identifier))
        })?;

        info!("TLS client initialized with profile {}", profile.identifier);

        Ok(Self {
            profile,
            timeout: Duration::from_secs(config.request_timeout_seconds),
            session: SessionState::new(config.headers.clone(), config.proxies.clone()),
        })
    }

    /// Client for a preset with otherwise default settings
    pub fn with_identifier(identifier: &str) -> ScrapeKitResult<Self> {
        Self::new(&TlsConfig {
            client_identifier: identifier.to_string(),
            ..TlsConfig::default()
        })
    }

    pub fn profile(&self) -> &FingerprintProfile {
        self.profile
    }

    async fn client(&self) -> ScrapeKitResult<Client> {
        let profile = self.profile;
        let timeout = self.timeout;
        self.session
            .client(|proxies| {
                let mut builder = Client::builder()
                    .user_agent(profile.user_agent)
                    .default_headers(profile.default_headers())
                    .min_tls_version(profile.min_tls_version)
                    .timeout(timeout)
                    .cookie_store(true);
                if !profile.http2 {
                    builder = builder.http1_only();
                }
                let client = apply_proxies(builder, proxies)?.build()?;
                info!("TLS session created for {}", profile.identifier);
                Ok(client)
            })
            .await
    }

    /// Send one request through the preset session
    pub async fn send_request(&self, request: &RequestSpec) -> ScrapeKitResult<HttpResponse> {
        let request_id = RequestIdGenerator::generate();
        let timer = PerformanceLogger::new(
            LogContext::new("tls", "send_request")
                .with_request_id(&request_id)
                .with_url(&request.url)
                .with_string_field("profile", self.profile.identifier),
        );
        info!("Sending {} request to {} ({})", request.method, request.url, request_id);

        let result = async {
            let client = self.client().await?;
            let headers = self.session.headers().await;
            let prepared = build_request(&client, &headers, request)?;
            execute(&client, prepared).await
        }
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

    pub async fn get(&self, url: &str) -> ScrapeKitResult<HttpResponse> {
        self.send_request(&RequestSpec::get(url)).await
    }

    /// Request every URL concurrently; results are aligned with `urls`
    pub async fn send_multi_request(&self, urls: &[String], method: Method) -> Vec<ScrapeKitResult<HttpResponse>> {
        fetch_all(self, urls, method).await
    }

    pub async fn set_headers(&self, headers: HashMap<String, String>) {
        info!("Headers set: {:?}", headers.keys().collect::<Vec<_>>());
        self.session.merge_headers(headers).await;
    }

    pub async fn set_proxies(&self, proxies: HashMap<String, String>) -> ScrapeKitResult<()> {
        self.session.replace_proxies(proxies).await?;
        info!("Proxies set");
        Ok(())
    }

    pub async fn close(&self) {
        if self.session.close().await {
            info!("TLS session closed");
        }
    }
}

#[async_trait]
impl Transport for TlsClient {
    async fn send(&self, request: &RequestSpec) -> ScrapeKitResult<HttpResponse> {
        self.send_request(request).await
    }
}
