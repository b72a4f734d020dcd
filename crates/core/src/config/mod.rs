//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (WARMDB_*)
//! 2. TOML config file (if WARMDB_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::driver::Driver;
use crate::spec::{MigrationSource, SnapshotWhen};

mod validation;

pub use validation::ConfigError;

/// How source files contribute to the build checksum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationMethod {
    /// Hash file bytes. Catches every content change.
    #[default]
    Content,
    /// Hash path and modification time. Cheaper, misses rewrites that keep the mtime.
    Modified,
}

/// A named database connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub driver: Driver,
    /// The original (unmodified) database name.
    pub database: String,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (WARMDB_*)
/// 2. TOML config file (if WARMDB_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Project name recorded in each database's reuse metadata.
    ///
    /// Databases built by a different project are never reused.
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Root directory for test databases and snapshot files.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Prefix for the names of databases this engine manages.
    #[serde(default = "default_database_prefix")]
    pub database_prefix: String,

    /// Filename prefix for snapshot files.
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: String,

    /// Whether to scan `invalidation_locations` when computing the build checksum.
    #[serde(default = "default_true")]
    pub check_for_source_changes: bool,

    #[serde(default)]
    pub invalidation_method: InvalidationMethod,

    /// Files and directories whose changes invalidate built databases.
    #[serde(default = "default_invalidation_locations")]
    pub invalidation_locations: Vec<PathBuf>,

    /// Migrations to run: `true`, `false`, or a directory path.
    #[serde(default = "default_migrations")]
    pub migrations: MigrationSource,

    /// Directory holding `<seeder>.sql` files.
    #[serde(default = "default_seeders_dir")]
    pub seeders_dir: PathBuf,

    /// Seeders run when a request does not name its own.
    #[serde(default)]
    pub seeders: Vec<String>,

    /// SQL files imported before migrations run.
    #[serde(default)]
    pub pre_migration_imports: Vec<PathBuf>,

    #[serde(default = "default_true")]
    pub reuse_transactions: bool,

    #[serde(default)]
    pub reuse_journal: bool,

    #[serde(default)]
    pub verify_databases: bool,

    /// Give each seeder combination its own database.
    #[serde(default = "default_true")]
    pub scenario_test_dbs: bool,

    #[serde(default)]
    pub snapshots_when_reusing: SnapshotWhen,

    #[serde(default = "default_snapshots_when_not_reusing")]
    pub snapshots_when_not_reusing: SnapshotWhen,

    /// Seconds an invalid snapshot or database survives before it may be purged.
    #[serde(default = "default_stale_grace_seconds")]
    pub stale_grace_seconds: u64,

    /// Purge stale snapshots and databases on the first build of a process.
    #[serde(default = "default_true")]
    pub purge_stale: bool,

    /// Base URL of a peer that builds databases on this process's behalf.
    #[serde(default)]
    pub remote_build_url: Option<String>,

    /// Timeout for a remote build, in seconds.
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    #[serde(default = "default_connection_name")]
    pub default_connection: String,

    #[serde(default = "default_connections")]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

fn default_project_name() -> String {
    "warmdb".into()
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./.warmdb")
}

fn default_database_prefix() -> String {
    "test".into()
}

fn default_snapshot_prefix() -> String {
    "snapshot.".into()
}

fn default_invalidation_locations() -> Vec<PathBuf> {
    vec![PathBuf::from("database")]
}

fn default_migrations() -> MigrationSource {
    MigrationSource::Path(PathBuf::from("database/migrations"))
}

fn default_seeders_dir() -> PathBuf {
    PathBuf::from("database/seeders")
}

fn default_snapshots_when_not_reusing() -> SnapshotWhen {
    SnapshotWhen::AfterSeeders
}

fn default_stale_grace_seconds() -> u64 {
    14_400 // 4 hours
}

fn default_remote_timeout_secs() -> u64 {
    240
}

fn default_connection_name() -> String {
    "main".into()
}

fn default_connections() -> BTreeMap<String, ConnectionConfig> {
    BTreeMap::from([(default_connection_name(), ConnectionConfig { driver: Driver::Sqlite, database: "app".into() })])
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            storage_dir: default_storage_dir(),
            database_prefix: default_database_prefix(),
            snapshot_prefix: default_snapshot_prefix(),
            check_for_source_changes: true,
            invalidation_method: InvalidationMethod::Content,
            invalidation_locations: default_invalidation_locations(),
            migrations: default_migrations(),
            seeders_dir: default_seeders_dir(),
            seeders: Vec::new(),
            pre_migration_imports: Vec::new(),
            reuse_transactions: true,
            reuse_journal: false,
            verify_databases: false,
            scenario_test_dbs: true,
            snapshots_when_reusing: SnapshotWhen::Never,
            snapshots_when_not_reusing: default_snapshots_when_not_reusing(),
            stale_grace_seconds: default_stale_grace_seconds(),
            purge_stale: true,
            remote_build_url: None,
            remote_timeout_secs: default_remote_timeout_secs(),
            default_connection: default_connection_name(),
            connections: default_connections(),
        }
    }
}

impl AppConfig {
    /// Remote build timeout as Duration for use with reqwest.
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    /// Directory holding the managed databases.
    pub fn databases_dir(&self) -> PathBuf {
        self.storage_dir.join("databases")
    }

    /// Directory holding snapshot files.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.storage_dir.join("snapshots")
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `WARMDB_`
    /// 2. TOML file from `WARMDB_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("WARMDB_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("WARMDB_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Look up a connection by name.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no such connection is configured.
    pub fn require_connection(&self, name: &str) -> Result<&ConnectionConfig, ConfigError> {
        self.connections.get(name).ok_or_else(|| ConfigError::Missing {
            field: format!("connections.{name}"),
            hint: format!("Add a [connections.{name}] table with a driver and database"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.project_name, "warmdb");
        assert_eq!(config.storage_dir, PathBuf::from("./.warmdb"));
        assert_eq!(config.stale_grace_seconds, 14_400);
        assert_eq!(config.remote_timeout_secs, 240);
        assert!(config.reuse_transactions);
        assert!(!config.reuse_journal);
        assert!(config.scenario_test_dbs);
        assert!(config.remote_build_url.is_none());
        assert_eq!(config.snapshots_when_reusing, SnapshotWhen::Never);
        assert_eq!(config.snapshots_when_not_reusing, SnapshotWhen::AfterSeeders);
    }

    #[test]
    fn test_remote_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.remote_timeout(), Duration::from_secs(240));
    }

    #[test]
    fn test_storage_subdirectories() {
        let config = AppConfig { storage_dir: PathBuf::from("/tmp/w"), ..Default::default() };
        assert_eq!(config.databases_dir(), PathBuf::from("/tmp/w/databases"));
        assert_eq!(config.snapshots_dir(), PathBuf::from("/tmp/w/snapshots"));
    }

    #[test]
    fn test_require_connection() {
        let config = AppConfig::default();
        assert_eq!(config.require_connection("main").unwrap().database, "app");
        assert!(matches!(config.require_connection("reporting"), Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_toml_layer() {
        let toml = r#"
            project_name = "shop"
            migrations = false
            snapshots_when_not_reusing = "both"
            invalidation_method = "modified"

            [connections.main]
            driver = "sqlite"
            database = "shop"
        "#;
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string(toml))
            .extract()
            .unwrap();
        assert_eq!(config.project_name, "shop");
        assert_eq!(config.migrations, MigrationSource::Enabled(false));
        assert_eq!(config.snapshots_when_not_reusing, SnapshotWhen::Both);
        assert_eq!(config.invalidation_method, InvalidationMethod::Modified);
        assert_eq!(config.connections["main"].database, "shop");
    }
}
