//! SQLite-backed persistence for schema-described records.
//!
//! Every operation opens its own connection and transaction, so a
//! [`Database`] handle is cheap to clone and safe to share between tasks.
//! Tables are created on first use from the shapes held in the shared
//! [`ShapeRegistry`].

use rusqlite::{Connection, Transaction};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub mod codec;
pub mod crud;
pub mod migrations;
#[cfg(feature = "s3")]
pub mod s3;
mod session;

pub use session::Completion;

use crate::config::{DatabaseConfig, Dialect};
use crate::error::{ScrapeKitError, ScrapeKitResult};
use crate::logging::LogContext;
use crate::schema::{SchemaDefinition, ShapeRegistry, TableShape};

/// Handle to one configured database
#[derive(Clone)]
pub struct Database {
    config: DatabaseConfig,
    path: PathBuf,
    registry: Arc<ShapeRegistry>,
    materialized: Arc<Mutex<HashSet<String>>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("url", &self.config.redacted_url())
            .field("shapes", &self.registry.len())
            .finish()
    }
}

impl Database {
    /// Open the configured database, creating the file and its directory if needed
    pub async fn open(config: &DatabaseConfig, registry: Arc<ShapeRegistry>) -> ScrapeKitResult<Self> {
        info!("Opening database: {}", config.redacted_url());

        if config.dialect != Dialect::Sqlite {
            return Err(ScrapeKitError::UnsupportedDialect {
                dialect: config.dialect.to_string(),
            });
        }

        let path = PathBuf::from(&config.name);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ScrapeKitError::FileSystem {
                    path: parent.display().to_string(),
                    message: e.to_string(),
                })?;
        }

        let database = Self {
            config: config.clone(),
            path,
            registry,
            materialized: Arc::new(Mutex::new(HashSet::new())),
        };

        database.blocking(|db| db.acquire().map(drop)).await?;

        info!("Database ready: {}", database.path.display());
        Ok(database)
    }

    pub fn registry(&self) -> &Arc<ShapeRegistry> {
        &self.registry
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the configured database
    pub fn current_database(&self) -> &str {
        &self.config.name
    }

    /// Open a fresh connection with foreign keys enforced
    fn acquire(&self) -> ScrapeKitResult<Connection> {
        let connection = Connection::open(&self.path)?;
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(connection)
    }

    /// Synthesize the shape for a schema and make sure its tables exist.
    ///
    /// Runs outside the operation's transaction so a rolled back write never
    /// takes a freshly created table with it.
    fn ensure_table(&self, conn: &Connection, definition: &SchemaDefinition) -> ScrapeKitResult<Arc<TableShape>> {
        let shape = self.registry.synthesize(definition)?;
        self.materialize(conn, &shape)?;
        Ok(shape)
    }

    fn materialize(&self, conn: &Connection, shape: &TableShape) -> ScrapeKitResult<()> {
        {
            let done = self
                .materialized
                .lock()
                .map_err(|_| ScrapeKitError::internal("materialized table set poisoned"))?;
            if done.contains(&shape.name) {
                return Ok(());
            }
        }

        for association in &shape.associations {
            let target = self.registry.require(&association.target)?;
            self.materialize(conn, &target)?;
        }

        migrations::materialize_table(conn, shape)?;

        self.materialized
            .lock()
            .map_err(|_| ScrapeKitError::internal("materialized table set poisoned"))?
            .insert(shape.name.clone());
        Ok(())
    }

    /// Run one unit of work against the table for `definition`.
    ///
    /// The transaction commits or rolls back as the closure decides; an error
    /// always rolls back. The connection is closed on every path.
    fn with_session<T>(
        &self,
        definition: &SchemaDefinition,
        work: impl FnOnce(&Transaction<'_>, &TableShape) -> ScrapeKitResult<Completion<T>>,
    ) -> ScrapeKitResult<T> {
        let mut conn = self.acquire()?;
        let shape = self.ensure_table(&conn, definition)?;
        let tx = conn.transaction()?;

        match work(&tx, &shape) {
            Ok(Completion::Commit(value)) => {
                tx.commit()?;
                Ok(value)
            }
            Ok(Completion::Rollback(value)) => {
                tx.rollback()?;
                debug!("Rolled back session on {}", shape.name);
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback() {
                    let context = LogContext::new("storage", "rollback")
                        .with_table(shape.name.as_str())
                        .with_error_category(e.category());
                    crate::log_warn!(context, "Rollback failed: {}", rollback_error);
                }
                Err(e)
            }
        }
    }

    /// Run blocking storage work off the async executor
    async fn blocking<T, F>(&self, work: F) -> ScrapeKitResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> ScrapeKitResult<T> + Send + 'static,
    {
        let database = self.clone();
        tokio::task::spawn_blocking(move || work(&database))
            .await
            .map_err(|e| ScrapeKitError::internal(format!("storage task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;
    use tempfile::TempDir;

    fn flags() -> SchemaDefinition {
        SchemaDefinition::new("Flags").field(FieldDef::boolean("nsfw"))
    }

    fn joke() -> SchemaDefinition {
        SchemaDefinition::new("Joke")
            .field(FieldDef::text("category"))
            .field(FieldDef::reference("flags", flags))
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("data.db");
        let db = Database::open(&DatabaseConfig::sqlite(&path), Arc::new(ShapeRegistry::new()))
            .await
            .unwrap();

        assert!(path.exists());
        assert_eq!(db.current_database(), path.to_string_lossy());
    }

    #[tokio::test]
    async fn test_open_rejects_networked_dialects() {
        let config = DatabaseConfig {
            dialect: Dialect::Postgres,
            password: "secret".into(),
            ..DatabaseConfig::default()
        };
        let err = Database::open(&config, Arc::new(ShapeRegistry::new())).await.unwrap_err();
        assert!(matches!(err, ScrapeKitError::UnsupportedDialect { ref dialect } if dialect == "postgres"));
    }

    #[tokio::test]
    async fn test_rolled_back_session_keeps_created_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(
            &DatabaseConfig::sqlite(temp_dir.path().join("t.db")),
            Arc::new(ShapeRegistry::new()),
        )
        .await
        .unwrap();

        let result: ScrapeKitResult<()> = db.with_session(&joke(), |tx, _| {
            tx.execute("INSERT INTO flags (nsfw) VALUES (0)", [])?;
            Err(ScrapeKitError::internal("abort"))
        });
        assert!(result.is_err());

        let conn = db.acquire().unwrap();
        assert!(migrations::table_exists(&conn, "joke").unwrap());
        assert!(migrations::table_exists(&conn, "flags").unwrap());
        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM flags", [], |r| r.get(0)).unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn test_explicit_rollback_discards_writes() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(
            &DatabaseConfig::sqlite(temp_dir.path().join("t.db")),
            Arc::new(ShapeRegistry::new()),
        )
        .await
        .unwrap();

        let value = db
            .with_session(&flags(), |tx, _| {
                tx.execute("INSERT INTO flags (nsfw) VALUES (1)", [])?;
                Ok(Completion::Rollback(7))
            })
            .unwrap();
        assert_eq!(value, 7);

        let rows: i64 = db
            .acquire()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM flags", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }
}
