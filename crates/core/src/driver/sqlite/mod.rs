//! SQLite driver.
//!
//! Each managed database is a file under the databases directory. Opening a
//! database applies the pragmas needed for concurrent test workers (WAL mode,
//! busy timeout).

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite;

use super::DatabaseInfo;
use crate::Error;
use crate::metadata::ReuseMetadataStore;

pub mod journal;
pub mod snapshot;
pub mod transaction;
pub mod verify;

/// Prefix shared by every table, trigger and index the engine creates.
pub const ENGINE_PREFIX: &str = "__warmdb_";

/// `GLOB` pattern matching engine-owned objects.
pub(crate) const ENGINE_GLOB: &str = "__warmdb_*";

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;
     PRAGMA busy_timeout=5000;";

/// Filename suffixes SQLite may leave next to a database.
const SIDECARS: &[&str] = &["-wal", "-shm", "-journal"];

/// Database files under one directory.
#[derive(Clone, Debug)]
pub struct SqliteAdapter {
    databases_dir: PathBuf,
}

impl SqliteAdapter {
    pub fn new(databases_dir: PathBuf) -> Self {
        Self { databases_dir }
    }

    pub fn database_path(&self, name: &str) -> PathBuf {
        self.databases_dir.join(format!("{name}.sqlite"))
    }

    pub async fn exists(&self, name: &str) -> Result<bool, Error> {
        Ok(tokio::fs::try_exists(self.database_path(name)).await?)
    }

    /// Open (creating if absent) a database and apply the engine pragmas.
    pub async fn connect(&self, name: &str) -> Result<Connection, Error> {
        tokio::fs::create_dir_all(&self.databases_dir).await?;
        let conn = Connection::open(self.database_path(name))
            .await
            .map_err(|e| Error::Database(e.into()))?;

        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        Ok(conn)
    }

    /// Delete the database file and its sidecars. Already gone counts as success.
    pub async fn reset(&self, name: &str) -> Result<(), Error> {
        let path = self.database_path(name);
        remove_if_present(&path).await?;
        for suffix in SIDECARS {
            remove_if_present(&sidecar(&path, suffix)).await?;
        }
        Ok(())
    }

    /// List managed databases, reading each one's reuse metadata.
    ///
    /// Unreadable databases are logged and skipped.
    pub async fn find_databases(
        &self, prefix: &str, project_name: &str, build_checksum: &str, grace_seconds: u64,
    ) -> Vec<DatabaseInfo> {
        let mut found = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.databases_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return found,
            Err(e) => {
                tracing::warn!(dir = %self.databases_dir.display(), "cannot list databases: {e}");
                return found;
            }
        };

        let name_prefix = format!("{prefix}_");
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("cannot read database directory entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            let Some(name) = database_name(&path, &name_prefix) else {
                continue;
            };
            match inspect(&path, &name, project_name, build_checksum, grace_seconds).await {
                Ok(info) => found.push(info),
                Err(e) => tracing::warn!(database = %name, "skipping unreadable database: {e}"),
            }
        }

        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}

/// The database name for a `<prefix>_*.sqlite` path.
fn database_name(path: &Path, name_prefix: &str) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("sqlite") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.starts_with(name_prefix).then(|| stem.to_string())
}

async fn inspect(
    path: &Path, name: &str, project_name: &str, build_checksum: &str, grace_seconds: u64,
) -> Result<DatabaseInfo, Error> {
    let file_meta = tokio::fs::metadata(path).await?;
    let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
    let record = ReuseMetadataStore::new(conn.clone()).read().await;
    if let Err(e) = conn.close().await {
        tracing::debug!(database = %name, "cannot close inspected database: {}", Error::from(e));
    }
    let record = record?;

    let grace = chrono::Duration::seconds(i64::try_from(grace_seconds).unwrap_or(i64::MAX));
    let last_used = match &record {
        Some(r) => DateTime::parse_from_rfc3339(&r.last_used).ok().map(|t| t.with_timezone(&Utc)),
        None => file_meta.modified().ok().map(DateTime::<Utc>::from),
    };
    let old_enough = last_used.is_some_and(|t| Utc::now() - t > grace);

    let (is_valid, purgeable) = match &record {
        Some(r) => {
            let valid = r.build_checksum == build_checksum;
            (valid, r.project_name == project_name && !valid && old_enough)
        }
        // half-built: a database the engine never finished writing metadata for
        None => (false, old_enough),
    };

    Ok(DatabaseInfo {
        name: name.to_string(),
        path: path.to_path_buf(),
        project_name: record.as_ref().map(|r| r.project_name.clone()),
        build_checksum: record.as_ref().map(|r| r.build_checksum.clone()),
        is_valid,
        last_used: last_used.map(|t| t.to_rfc3339()),
        purgeable,
        size: file_meta.len(),
    })
}

/// Run SQL import files against a fresh database, in order.
pub async fn import(conn: &Connection, files: &[PathBuf]) -> Result<(), Error> {
    for file in files {
        let sql = tokio::fs::read_to_string(file)
            .await
            .map_err(|e| Error::MigrationFailed { path: file.clone(), detail: e.to_string() })?;
        let path = file.clone();
        conn.call(move |conn| -> Result<(), Error> {
            conn.execute_batch(&sql)
                .map_err(|e| Error::MigrationFailed { path, detail: e.to_string() })
        })
        .await
        .map_err(Error::from)?;
        tracing::debug!(file = %file.display(), "imported");
    }
    Ok(())
}

pub async fn version(conn: &Connection) -> Result<String, Error> {
    conn.call(|conn| conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0)))
        .await
        .map_err(Error::from)
}

/// Names of the user tables, excluding SQLite and engine internals.
pub(crate) fn user_tables(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT GLOB 'sqlite_*' AND name NOT GLOB ?1
         ORDER BY name",
    )?;
    let rows = stmt.query_map([ENGINE_GLOB], |row| row.get::<_, String>(0))?;
    rows.collect()
}

/// Fingerprint of the user schema (tables, indexes, views, triggers).
pub(crate) fn schema_fingerprint(conn: &rusqlite::Connection) -> rusqlite::Result<String> {
    use sha2::{Digest, Sha256};

    let mut stmt = conn.prepare(
        "SELECT type, name, COALESCE(sql, '') FROM sqlite_master
         WHERE name NOT GLOB 'sqlite_*' AND name NOT GLOB ?1
         ORDER BY type, name",
    )?;
    let mut rows = stmt.query([ENGINE_GLOB])?;
    let mut hasher = Sha256::new();
    while let Some(row) = rows.next()? {
        for i in 0..3 {
            hasher.update(row.get::<_, String>(i)?.as_bytes());
            hasher.update(b"\0");
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Quote an identifier for interpolation into SQL.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) async fn remove_if_present(path: &Path) -> Result<(), Error> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Seconds since `time`, saturating at zero for clocks that moved backwards.
pub(crate) fn age_secs(time: SystemTime) -> u64 {
    SystemTime::now().duration_since(time).map(|d| d.as_secs()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ReuseRecord;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_creates_database() {
        let dir = TempDir::new().unwrap();
        let adapter = SqliteAdapter::new(dir.path().join("databases"));
        assert!(!adapter.exists("test_app").await.unwrap());

        let conn = adapter.connect("test_app").await.unwrap();
        let version = version(&conn).await.unwrap();
        assert!(!version.is_empty());
        assert!(adapter.exists("test_app").await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_removes_files() {
        let dir = TempDir::new().unwrap();
        let adapter = SqliteAdapter::new(dir.path().to_path_buf());
        let conn = adapter.connect("test_app").await.unwrap();
        conn.call(|c| c.execute_batch("CREATE TABLE t (id INTEGER);")).await.unwrap();
        drop(conn);

        adapter.reset("test_app").await.unwrap();
        assert!(!adapter.exists("test_app").await.unwrap());
        // already gone
        adapter.reset("test_app").await.unwrap();
    }

    #[tokio::test]
    async fn test_import_runs_sql_files() {
        let dir = TempDir::new().unwrap();
        let dump = dir.path().join("legacy.sql");
        std::fs::write(&dump, "CREATE TABLE legacy (id INTEGER); INSERT INTO legacy VALUES (1), (2);").unwrap();
        let adapter = SqliteAdapter::new(dir.path().join("databases"));
        let conn = adapter.connect("test_app").await.unwrap();

        import(&conn, &[dump]).await.unwrap();

        let count: i64 = conn
            .call(|c| c.query_row("SELECT COUNT(*) FROM legacy", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_import_failure_names_file() {
        let dir = TempDir::new().unwrap();
        let dump = dir.path().join("broken.sql");
        std::fs::write(&dump, "CREATE TABLE (;").unwrap();
        let adapter = SqliteAdapter::new(dir.path().join("databases"));
        let conn = adapter.connect("test_app").await.unwrap();

        let result = import(&conn, &[dump.clone()]).await;
        assert!(matches!(result, Err(Error::MigrationFailed { path, .. }) if path == dump));
    }

    #[tokio::test]
    async fn test_user_tables_exclude_engine_tables() {
        let dir = TempDir::new().unwrap();
        let adapter = SqliteAdapter::new(dir.path().to_path_buf());
        let conn = adapter.connect("test_app").await.unwrap();
        let tables = conn
            .call(|c| {
                c.execute_batch("CREATE TABLE users (id INTEGER); CREATE TABLE __warmdb_thing (x INTEGER);")?;
                user_tables(c)
            })
            .await
            .unwrap();
        assert_eq!(tables, vec!["users".to_string()]);
    }

    #[tokio::test]
    async fn test_find_databases_reports_validity() {
        let dir = TempDir::new().unwrap();
        let adapter = SqliteAdapter::new(dir.path().to_path_buf());

        let current = adapter.connect("test_app_current").await.unwrap();
        let mut record = ReuseRecord::new("warmdb", "app", "build-now", "token", "scenario");
        ReuseMetadataStore::new(current.clone()).write(&record).await.unwrap();

        let old = adapter.connect("test_app_old").await.unwrap();
        record.build_checksum = "build-before".into();
        record.last_used = (Utc::now() - chrono::Duration::hours(10)).to_rfc3339();
        ReuseMetadataStore::new(old.clone()).write(&record).await.unwrap();

        let other = adapter.connect("other_app").await.unwrap();
        drop((current, old, other));

        let found = adapter.find_databases("test", "warmdb", "build-now", 3600).await;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "test_app_current");
        assert!(found[0].is_valid);
        assert!(!found[0].purgeable);
        assert_eq!(found[1].name, "test_app_old");
        assert!(!found[1].is_valid);
        assert!(found[1].purgeable);
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("users"), "\"users\"");
        assert_eq!(quote("we\"ird"), "\"we\"\"ird\"");
    }
}
