//! Migration and seed runners.
//!
//! The orchestrator only knows the two traits; the SQL-file runners here are
//! the implementations the server and the tests use. Applied migrations are
//! tracked in an engine-owned table so a rerun only applies pending files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_rusqlite::{Connection, params};

use crate::Error;

const MIGRATIONS_TABLE: &str = "__warmdb_migrations";

/// Applies schema migrations to a database.
#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Apply all pending migrations, from `path` when given.
    ///
    /// # Errors
    ///
    /// Returns `Error::MigrationFailed` naming the offending file.
    async fn migrate(&self, conn: &Connection, path: Option<&Path>) -> Result<(), Error>;
}

/// Runs seeders against a database.
#[async_trait]
pub trait SeedRunner: Send + Sync {
    /// Run each seeder in order.
    ///
    /// # Errors
    ///
    /// Returns `Error::SeederFailed` naming the failing seeder.
    async fn seed(&self, conn: &Connection, seeders: &[String]) -> Result<(), Error>;
}

/// Applies the `*.sql` files of a directory in lexical order.
#[derive(Debug, Clone)]
pub struct SqlMigrator {
    default_dir: PathBuf,
}

impl SqlMigrator {
    pub fn new(default_dir: impl Into<PathBuf>) -> Self {
        Self { default_dir: default_dir.into() }
    }
}

#[async_trait]
impl MigrationRunner for SqlMigrator {
    async fn migrate(&self, conn: &Connection, path: Option<&Path>) -> Result<(), Error> {
        let dir = path.unwrap_or(self.default_dir.as_path());
        let files = match sql_files(dir).await {
            Ok(files) => files,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && path.is_none() => {
                tracing::debug!(dir = %dir.display(), "no migrations directory");
                return Ok(());
            }
            Err(e) => return Err(Error::MigrationFailed { path: dir.to_path_buf(), detail: e.to_string() }),
        };

        let mut applied = 0;
        for file in files {
            let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let sql = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| Error::MigrationFailed { path: file.clone(), detail: e.to_string() })?;

            let path = file.clone();
            let ran = conn
                .call(move |conn| -> Result<bool, Error> {
                    conn.execute(
                        &format!(
                            "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
                                name TEXT PRIMARY KEY,
                                applied_at TEXT NOT NULL
                            )"
                        ),
                        [],
                    )?;
                    let done: bool = conn.query_row(
                        &format!("SELECT EXISTS(SELECT 1 FROM {MIGRATIONS_TABLE} WHERE name = ?1)"),
                        params![name],
                        |row| row.get(0),
                    )?;
                    if done {
                        return Ok(false);
                    }

                    let tx = conn.transaction()?;
                    tx.execute_batch(&sql)
                        .map_err(|e| Error::MigrationFailed { path, detail: e.to_string() })?;
                    tx.execute(
                        &format!("INSERT INTO {MIGRATIONS_TABLE} (name, applied_at) VALUES (?1, ?2)"),
                        params![name, chrono::Utc::now().to_rfc3339()],
                    )?;
                    tx.commit()?;
                    Ok(true)
                })
                .await
                .map_err(Error::from)?;
            if ran {
                tracing::debug!(migration = %file.display(), "applied");
                applied += 1;
            }
        }

        tracing::info!(dir = %dir.display(), applied, "migrations complete");
        Ok(())
    }
}

/// Runs `<dir>/<seeder>.sql` for each seeder.
#[derive(Debug, Clone)]
pub struct SqlSeeder {
    dir: PathBuf,
}

impl SqlSeeder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SeedRunner for SqlSeeder {
    async fn seed(&self, conn: &Connection, seeders: &[String]) -> Result<(), Error> {
        for seeder in seeders {
            let file = self.dir.join(format!("{seeder}.sql"));
            let sql = tokio::fs::read_to_string(&file).await.map_err(|e| Error::SeederFailed {
                seeder: seeder.clone(),
                detail: format!("{}: {e}", file.display()),
            })?;

            let name = seeder.clone();
            conn.call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute_batch(&sql)
                    .map_err(|e| Error::SeederFailed { seeder: name, detail: e.to_string() })?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;
            tracing::debug!(seeder = %seeder, "seeded");
        }
        Ok(())
    }
}

async fn sql_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("sql") && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn count(conn: &Connection, table: &'static str) -> i64 {
        conn.call(move |c| c.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_migrations_apply_in_order_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("002_posts.sql"), "CREATE TABLE posts (user_id INTEGER REFERENCES users(id));").unwrap();
        std::fs::write(dir.path().join("001_users.sql"), "CREATE TABLE users (id INTEGER PRIMARY KEY);").unwrap();
        std::fs::write(dir.path().join("README.md"), "not a migration").unwrap();

        let conn = Connection::open_in_memory().await.unwrap();
        let migrator = SqlMigrator::new(dir.path());
        migrator.migrate(&conn, None).await.unwrap();
        migrator.migrate(&conn, None).await.unwrap();

        assert_eq!(count(&conn, "users").await, 0);
        assert_eq!(count(&conn, MIGRATIONS_TABLE).await, 2);
    }

    #[tokio::test]
    async fn test_migration_failure_names_file() {
        let dir = TempDir::new().unwrap();
        let broken = dir.path().join("001_broken.sql");
        std::fs::write(&broken, "CREATE TABLE (").unwrap();

        let conn = Connection::open_in_memory().await.unwrap();
        let result = SqlMigrator::new("unused").migrate(&conn, Some(dir.path())).await;
        assert!(matches!(result, Err(Error::MigrationFailed { path, .. }) if path == broken));
    }

    #[tokio::test]
    async fn test_missing_default_dir_is_empty() {
        let conn = Connection::open_in_memory().await.unwrap();
        SqlMigrator::new("/nonexistent/migrations").migrate(&conn, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_seeders_run_in_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("users.sql"), "INSERT INTO t VALUES ('users');").unwrap();
        std::fs::write(dir.path().join("posts.sql"), "INSERT INTO t VALUES ('posts');").unwrap();
        let conn = Connection::open_in_memory().await.unwrap();
        conn.call(|c| c.execute_batch("CREATE TABLE t (v TEXT)")).await.unwrap();

        SqlSeeder::new(dir.path())
            .seed(&conn, &["posts".to_string(), "users".to_string()])
            .await
            .unwrap();

        let order: Vec<String> = conn
            .call(|c| {
                let mut stmt = c.prepare("SELECT v FROM t ORDER BY rowid")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<tokio_rusqlite::rusqlite::Result<Vec<String>>>()
            })
            .await
            .unwrap();
        assert_eq!(order, vec!["posts".to_string(), "users".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_seeder_is_named() {
        let dir = TempDir::new().unwrap();
        let conn = Connection::open_in_memory().await.unwrap();
        let result = SqlSeeder::new(dir.path()).seed(&conn, &["ghost".to_string()]).await;
        assert!(matches!(result, Err(Error::SeederFailed { seeder, .. }) if seeder == "ghost"));
    }
}
