use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub max_files: usize,
    pub log_directory: PathBuf,
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: true,
            console_enabled: true,
            max_files: 5,
            log_directory: PathBuf::from("logs"),
            include_targets: true,
        }
    }
}

/// Install the global subscriber: console and/or a daily rolling file.
///
/// `RUST_LOG` takes precedence over `config.level`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = config.console_enabled.then(|| {
        fmt::layer()
            .with_target(config.include_targets)
            .with_writer(std::io::stdout)
            .boxed()
    });

    let file_layer = if config.file_enabled {
        std::fs::create_dir_all(&config.log_directory)?;

        // Rotates at midnight, keeps the last `max_files` days
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("scrapekit")
            .filename_suffix("log")
            .max_log_files(config.max_files)
            .build(&config.log_directory)?;

        Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(config.include_targets)
                .with_writer(appender)
                .boxed(),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    info!(level = %config.level, file = config.file_enabled, "Logging initialized");
    if config.file_enabled {
        info!("Writing logs to {}", config.log_directory.display());
    }

    Ok(())
}

/// Structured fields attached to one log event.
///
/// Only the fields that were set are rendered, as `key=value` pairs after the
/// `component.operation` prefix.
#[derive(Debug, Clone, Serialize)]
pub struct LogContext {
    pub component: String,
    pub operation: String,
    pub request_id: Option<String>,
    pub url: Option<String>,
    pub table: Option<String>,
    pub duration: Option<Duration>,
    pub status: Option<String>,
    pub error_category: Option<&'static str>,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogContext {
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            request_id: None,
            url: None,
            table: None,
            duration: None,
            status: None,
            error_category: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_request_id(self, request_id: impl Into<String>) -> Self {
        Self { request_id: Some(request_id.into()), ..self }
    }

    pub fn with_url(self, url: impl Into<String>) -> Self {
        Self { url: Some(url.into()), ..self }
    }

    pub fn with_table(self, table: impl Into<String>) -> Self {
        Self { table: Some(table.into()), ..self }
    }

    pub fn with_duration(self, duration: Duration) -> Self {
        Self { duration: Some(duration), ..self }
    }

    pub fn with_status(self, status: impl Into<String>) -> Self {
        Self { status: Some(status.into()), ..self }
    }

    pub fn with_error_category(self, category: &'static str) -> Self {
        Self { error_category: Some(category), ..self }
    }

    pub fn with_string_field(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_field(key, serde_json::Value::String(value.into()))
    }

    pub fn with_number_field(self, key: impl Into<String>, value: impl Into<i64>) -> Self {
        self.with_field(key, serde_json::Value::from(value.into()))
    }

    fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

impl std::fmt::Display for LogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.component, self.operation)?;

        let tagged = [
            ("request_id", self.request_id.as_deref()),
            ("url", self.url.as_deref()),
            ("table", self.table.as_deref()),
            ("status", self.status.as_deref()),
            ("error_category", self.error_category),
        ];
        for (key, value) in tagged {
            if let Some(value) = value {
                write!(f, " {}={}", key, value)?;
            }
        }
        if let Some(duration) = self.duration {
            write!(f, " duration_ms={}", duration.as_millis())?;
        }
        for (key, value) in &self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Emit an info event carrying a [`LogContext`]
#[macro_export]
macro_rules! log_info {
    ($context:expr, $($arg:tt)+) => {
        tracing::info!(context = %$context, $($arg)+)
    };
}

/// Emit a warn event carrying a [`LogContext`]
#[macro_export]
macro_rules! log_warn {
    ($context:expr, $($arg:tt)+) => {
        tracing::warn!(context = %$context, $($arg)+)
    };
}

/// Emit an error event carrying a [`LogContext`] and the error itself
#[macro_export]
macro_rules! log_error {
    ($context:expr, $error:expr, $($arg:tt)+) => {
        tracing::error!(context = %$context, error = %$error, $($arg)+)
    };
}

/// Times one operation and logs its outcome
pub struct PerformanceLogger {
    context: LogContext,
    started: Instant,
}

impl PerformanceLogger {
    pub fn new(context: LogContext) -> Self {
        Self {
            context,
            started: Instant::now(),
        }
    }

    fn elapsed(self) -> LogContext {
        let elapsed = self.started.elapsed();
        self.context.with_duration(elapsed)
    }

    /// Routine completion, logged at debug
    pub fn finish(self, message: &str) {
        let context = self.elapsed();
        tracing::debug!(context = %context, "{}", message);
    }

    pub fn finish_with_status(self, message: &str, status: impl Into<String>) {
        let context = self.elapsed().with_status(status);
        log_info!(context, "{}", message);
    }

    pub fn finish_with_error(self, message: &str, error: &crate::error::ScrapeKitError) {
        let context = self.elapsed().with_status("error").with_error_category(error.category());
        log_error!(context, error, "{}", message);
    }
}

/// Ids of the form `req-<unix millis>-<counter>`
pub struct RequestIdGenerator;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

impl RequestIdGenerator {
    pub fn generate() -> String {
        let millis = chrono::Utc::now().timestamp_millis();
        let sequence = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed) % 10_000;
        format!("req-{}-{:04}", millis, sequence)
    }
}
