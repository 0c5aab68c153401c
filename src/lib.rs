//! scrapekit - scraping scaffolds built in Rust
//!
//! This library provides:
//! - Schema-driven table synthesis with a generic CRUD façade over SQLite
//! - An async HTTP client with retries and an admission gate
//! - An HTTP client presenting a named browser fingerprint preset
//! - A browser driver (feature `browser`)
//! - JSON export and the JokeAPI demo records

pub mod config;
pub mod error;
pub mod export;
pub mod jokes;
pub mod logging;
pub mod schema;
pub mod storage;
pub mod transport;

// Re-export main types for convenience
pub use crate::config::AppConfig;
pub use crate::error::{ScrapeKitError, ScrapeKitResult};
pub use crate::schema::{FieldDef, Schema, SchemaDefinition, ShapeRegistry};
pub use crate::storage::Database;
pub use crate::transport::{DriverManager, HttpClient, Locator, TlsClient};
