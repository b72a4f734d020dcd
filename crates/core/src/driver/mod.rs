//! Database drivers.
//!
//! Each supported driver is one variant of [`Adapter`]. The variant is chosen
//! once per [`BuildSpec`] and held by the orchestrator for its lifetime; every
//! driver-specific capability (build, snapshot, reuse metadata, transaction,
//! journal, verification, version, find) goes through it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio_rusqlite::Connection;

use crate::Error;
use crate::memo::VersionCache;
use crate::metadata::ReuseMetadataStore;
use crate::spec::BuildSpec;

pub mod sqlite;

pub use sqlite::SqliteAdapter;
pub use sqlite::journal::JournalOutcome;
pub use sqlite::transaction::TransactionEnd;

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Sqlite,
}

impl Driver {
    pub fn as_str(self) -> &'static str {
        match self {
            Driver::Sqlite => "sqlite",
        }
    }

    /// What the engine can do with this driver.
    pub fn capabilities(self) -> DriverCapabilities {
        match self {
            Driver::Sqlite => DriverCapabilities {
                reuse: true,
                snapshots: true,
                scenarios: true,
                transactions: true,
                journaling: true,
                verification: true,
            },
        }
    }
}

/// Per-driver capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCapabilities {
    pub reuse: bool,
    pub snapshots: bool,
    pub scenarios: bool,
    pub transactions: bool,
    pub journaling: bool,
    pub verification: bool,
}

/// A managed database found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub path: PathBuf,
    pub project_name: Option<String>,
    pub build_checksum: Option<String>,
    /// Built from the current build checksum.
    pub is_valid: bool,
    pub last_used: Option<String>,
    pub purgeable: bool,
    pub size: u64,
}

/// The driver-specific side of the engine.
#[derive(Debug, Clone)]
pub enum Adapter {
    Sqlite(SqliteAdapter),
}

impl Adapter {
    pub fn for_spec(spec: &BuildSpec) -> Self {
        match spec.driver {
            Driver::Sqlite => Adapter::Sqlite(SqliteAdapter::new(spec.databases_dir())),
        }
    }

    pub fn driver(&self) -> Driver {
        match self {
            Adapter::Sqlite(_) => Driver::Sqlite,
        }
    }

    /// Extension used for this driver's snapshot files.
    pub fn snapshot_extension(&self) -> &'static str {
        match self {
            Adapter::Sqlite(_) => "sqlite",
        }
    }

    /// Whether restoring a snapshot copies a whole file, which needs the
    /// destination database to be absent first.
    pub fn restores_whole_file(&self) -> bool {
        match self {
            Adapter::Sqlite(_) => true,
        }
    }

    pub fn database_path(&self, name: &str) -> PathBuf {
        match self {
            Adapter::Sqlite(a) => a.database_path(name),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool, Error> {
        match self {
            Adapter::Sqlite(a) => a.exists(name).await,
        }
    }

    pub async fn connect(&self, name: &str) -> Result<Connection, Error> {
        match self {
            Adapter::Sqlite(a) => a.connect(name).await,
        }
    }

    /// Drop the database so it can be rebuilt from scratch.
    pub async fn reset(&self, name: &str) -> Result<(), Error> {
        match self {
            Adapter::Sqlite(a) => a.reset(name).await,
        }
    }

    /// Run initial-import files against a fresh database.
    pub async fn import(&self, conn: &Connection, files: &[PathBuf]) -> Result<(), Error> {
        match self {
            Adapter::Sqlite(_) => sqlite::import(conn, files).await,
        }
    }

    /// Server version, memoized per (connection, driver).
    pub async fn version(&self, cache: &VersionCache, connection: &str, conn: &Connection) -> Result<String, Error> {
        let driver = self.driver();
        if let Some(version) = cache.get(connection, driver).await {
            return Ok(version);
        }
        let version = match self {
            Adapter::Sqlite(_) => sqlite::version(conn).await?,
        };
        cache.insert(connection, driver, version.clone()).await;
        Ok(version)
    }

    pub fn metadata(&self, conn: &Connection) -> ReuseMetadataStore {
        ReuseMetadataStore::new(conn.clone())
    }

    /// Write a consistent copy of the live database to `dest`.
    pub async fn dump(&self, conn: &Connection, dest: &Path) -> Result<(), Error> {
        match self {
            Adapter::Sqlite(_) => sqlite::snapshot::dump(conn, dest).await,
        }
    }

    /// Restore database `name` from `src`. Returns false on any failure.
    pub async fn restore(&self, src: &Path, name: &str) -> bool {
        match self {
            Adapter::Sqlite(a) => sqlite::snapshot::restore(src, &a.database_path(name)).await,
        }
    }

    pub async fn begin_transaction(&self, conn: &Connection) -> Result<(), Error> {
        match self {
            Adapter::Sqlite(_) => sqlite::transaction::begin(conn).await,
        }
    }

    /// Roll back the reuse transaction, reporting if it had been committed.
    pub async fn end_transaction(&self, conn: &Connection) -> Result<TransactionEnd, Error> {
        match self {
            Adapter::Sqlite(_) => sqlite::transaction::end(conn).await,
        }
    }

    pub async fn start_journal(&self, conn: &Connection) -> Result<(), Error> {
        match self {
            Adapter::Sqlite(_) => sqlite::journal::start(conn).await,
        }
    }

    pub async fn reverse_journal(&self, conn: &Connection) -> Result<JournalOutcome, Error> {
        match self {
            Adapter::Sqlite(_) => sqlite::journal::reverse(conn).await,
        }
    }

    /// Record the structure and content baseline used by [`Adapter::verify`].
    pub async fn record_baseline(&self, conn: &Connection) -> Result<(), Error> {
        match self {
            Adapter::Sqlite(_) => sqlite::verify::record_baseline(conn).await,
        }
    }

    pub async fn has_baseline(&self, conn: &Connection) -> Result<bool, Error> {
        match self {
            Adapter::Sqlite(_) => sqlite::verify::has_baseline(conn).await,
        }
    }

    /// Compare the database against its baseline; returns the mismatching tables.
    pub async fn verify(&self, conn: &Connection) -> Result<Vec<String>, Error> {
        match self {
            Adapter::Sqlite(_) => sqlite::verify::compare(conn).await,
        }
    }

    /// Databases managed by this engine, valid or not.
    pub async fn find_databases(
        &self, prefix: &str, project_name: &str, build_checksum: &str, grace_seconds: u64,
    ) -> Vec<DatabaseInfo> {
        match self {
            Adapter::Sqlite(a) => a.find_databases(prefix, project_name, build_checksum, grace_seconds).await,
        }
    }

    /// Remove a database. Already gone counts as success.
    pub async fn remove_database(&self, name: &str) -> Result<(), Error> {
        match self {
            Adapter::Sqlite(a) => a.reset(name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_serde() {
        assert_eq!(serde_json::to_string(&Driver::Sqlite).unwrap(), "\"sqlite\"");
        let driver: Driver = serde_json::from_str("\"sqlite\"").unwrap();
        assert_eq!(driver, Driver::Sqlite);
    }

    #[test]
    fn test_sqlite_capabilities() {
        let caps = Driver::Sqlite.capabilities();
        assert!(caps.reuse && caps.snapshots && caps.transactions && caps.journaling);
    }

    #[tokio::test]
    async fn test_version_is_memoized() {
        let dir = tempfile::TempDir::new().unwrap();
        let adapter = Adapter::Sqlite(SqliteAdapter::new(dir.path().to_path_buf()));
        let conn = adapter.connect("test_app").await.unwrap();
        let cache = VersionCache::default();

        let version = adapter.version(&cache, "main", &conn).await.unwrap();
        assert!(!version.is_empty());
        assert_eq!(cache.get("main", Driver::Sqlite).await, Some(version));
    }
}
