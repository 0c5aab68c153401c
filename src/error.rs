use std::time::Duration;
use thiserror::Error;

/// Error types shared by the storage layer and the transport wrappers
#[derive(Error, Debug)]
pub enum ScrapeKitError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid configuration file: {path}")]
    InvalidConfig { path: String },

    #[error("Unsupported database dialect: {dialect}")]
    UnsupportedDialect { dialect: String },

    // Storage errors
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("Schema mismatch in {schema}.{field}: {message}")]
    SchemaMismatch {
        schema: String,
        field: String,
        message: String,
    },

    #[error("Cyclic schema reference: {path}")]
    CyclicSchema { path: String },

    #[error("Object storage error: {message}")]
    ObjectStore { message: String },

    // Transport errors
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("HTTP request failed: {url} - {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Connection timeout: {url}")]
    Timeout { url: String },

    #[error("Failed to decode response: {message}")]
    Decode { message: String },

    // Browser errors
    #[error("Browser error: {message}")]
    Browser { message: String },

    #[error("Element not found: {locator}")]
    ElementNotFound { locator: String },

    // System errors
    #[error("File system error: {path}: {message}")]
    FileSystem { path: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ScrapeKitError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Create an object storage error
    pub fn object_store(message: impl Into<String>) -> Self {
        Self::ObjectStore { message: message.into() }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }

    /// Create a browser error
    pub fn browser(message: impl Into<String>) -> Self {
        Self::Browser { message: message.into() }
    }

    /// Create a schema mismatch error for one field
    pub fn schema_mismatch(
        schema: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::SchemaMismatch {
            schema: schema.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if a retry may succeed where the last attempt failed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::Browser { .. } => true,

            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,

            Self::Configuration { .. }
            | Self::InvalidConfig { .. }
            | Self::UnsupportedDialect { .. }
            | Self::ConstraintViolation { .. }
            | Self::SchemaMismatch { .. }
            | Self::CyclicSchema { .. }
            | Self::ObjectStore { .. }
            | Self::Decode { .. } => false,

            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } | Self::InvalidConfig { .. } | Self::UnsupportedDialect { .. } => {
                "configuration"
            }
            Self::Database { .. } | Self::ConstraintViolation { .. } | Self::ObjectStore { .. } => "storage",
            Self::SchemaMismatch { .. } | Self::CyclicSchema { .. } => "schema",
            Self::Network { .. } | Self::HttpStatus { .. } | Self::Timeout { .. } => "network",
            Self::Decode { .. } => "decode",
            Self::Browser { .. } | Self::ElementNotFound { .. } => "browser",
            Self::FileSystem { .. } => "system",
            Self::Internal { .. } => "internal",
        }
    }

    /// Get suggested retry delay for recoverable errors
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Network { .. } => Some(Duration::from_secs(2)),
            Self::Timeout { .. } => Some(Duration::from_secs(5)),
            Self::HttpStatus { status: 429, .. } => Some(Duration::from_secs(10)),
            Self::HttpStatus { .. } if self.is_recoverable() => Some(Duration::from_secs(2)),
            Self::Browser { .. } => Some(Duration::from_secs(5)),
            _ => None,
        }
    }
}

/// Result type alias for scrapekit
pub type ScrapeKitResult<T> = std::result::Result<T, ScrapeKitError>;

impl From<rusqlite::Error> for ScrapeKitError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::ConstraintViolation { message: err.to_string() }
            }
            _ => Self::Database { message: err.to_string() },
        }
    }
}

impl From<reqwest::Error> for ScrapeKitError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        if err.is_timeout() {
            Self::Timeout { url }
        } else if err.is_decode() {
            Self::Decode { message: err.to_string() }
        } else if let Some(status) = err.status() {
            Self::HttpStatus { url, status: status.as_u16() }
        } else {
            Self::Network { message: err.to_string() }
        }
    }
}

impl From<serde_json::Error> for ScrapeKitError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = ScrapeKitError::config("Invalid setting");
        assert_eq!(error.category(), "configuration");
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_recoverable_errors() {
        let network_error = ScrapeKitError::network("Connection refused");
        assert!(network_error.is_recoverable());
        assert!(network_error.retry_delay().is_some());

        let server_error = ScrapeKitError::HttpStatus { url: "http://x".into(), status: 503 };
        assert!(server_error.is_recoverable());

        let client_error = ScrapeKitError::HttpStatus { url: "http://x".into(), status: 404 };
        assert!(!client_error.is_recoverable());
        assert!(client_error.retry_delay().is_none());

        let decode_error = ScrapeKitError::decode("expected value at line 1");
        assert!(!decode_error.is_recoverable());
        assert_eq!(decode_error.category(), "decode");

        let store_error = ScrapeKitError::object_store("upload failed: dispatch failure");
        assert!(!store_error.is_recoverable());
        assert_eq!(store_error.category(), "storage");
    }

    #[test]
    fn test_constraint_violation_mapping() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (v TEXT UNIQUE)", []).unwrap();
        conn.execute("INSERT INTO t (v) VALUES ('a')", []).unwrap();
        let err: ScrapeKitError = conn
            .execute("INSERT INTO t (v) VALUES ('a')", [])
            .unwrap_err()
            .into();

        assert!(matches!(err, ScrapeKitError::ConstraintViolation { .. }));
        assert_eq!(err.category(), "storage");
    }
}
