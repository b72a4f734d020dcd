//! Build specifications.
//!
//! A [`BuildRequest`] is the partial, caller-facing form: every field is
//! optional and falls back to [`AppConfig`]. Resolving it produces a
//! [`BuildSpec`], which downstream components only ever read. Variants of a
//! resolved spec (for a remote peer, with a forced rebuild) are derived
//! copies, never in-place edits.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::checksum;
use crate::config::{AppConfig, InvalidationMethod};
use crate::driver::{Driver, DriverCapabilities};

pub mod strategy;

pub use strategy::{ReuseMechanism, ReuseStrategy, StrategyInputs};

/// Where migrations come from: a switch, or an explicit directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MigrationSource {
    Enabled(bool),
    Path(PathBuf),
}

impl Default for MigrationSource {
    fn default() -> Self {
        MigrationSource::Enabled(true)
    }
}

impl MigrationSource {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, MigrationSource::Enabled(false))
    }

    /// The explicit directory, if one was given.
    pub fn path(&self) -> Option<&Path> {
        match self {
            MigrationSource::Path(path) => Some(path),
            MigrationSource::Enabled(_) => None,
        }
    }

    /// Stable text used as a checksum input.
    pub fn describe(&self) -> String {
        match self {
            MigrationSource::Enabled(enabled) => enabled.to_string(),
            MigrationSource::Path(path) => path.display().to_string(),
        }
    }
}

/// When snapshot files are taken during a build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotWhen {
    #[default]
    Never,
    AfterMigrations,
    AfterSeeders,
    Both,
}

impl SnapshotWhen {
    pub fn is_enabled(self) -> bool {
        self != SnapshotWhen::Never
    }

    pub fn after_migrations(self) -> bool {
        matches!(self, SnapshotWhen::AfterMigrations | SnapshotWhen::Both)
    }

    pub fn after_seeders(self) -> bool {
        matches!(self, SnapshotWhen::AfterSeeders | SnapshotWhen::Both)
    }
}

/// Snapshot policy, separately for reusing and non-reusing builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPolicy {
    pub when_reusing: SnapshotWhen,
    pub when_not_reusing: SnapshotWhen,
}

/// Reuse mechanisms the caller would like to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReuseToggles {
    pub transaction: bool,
    pub journal: bool,
    pub verify: bool,
    pub scenarios: bool,
}

/// Inputs that invalidate built databases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationSettings {
    pub enabled: bool,
    pub method: InvalidationMethod,
    pub locations: Vec<PathBuf>,
}

/// Caller-facing build request; unset fields fall back to configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildRequest {
    pub connection: Option<String>,
    /// Overrides the connection's database name.
    pub database: Option<String>,
    /// Distinguishes parallel test workers sharing one storage root.
    pub database_modifier: Option<String>,
    pub seeders: Option<Vec<String>>,
    pub migrations: Option<MigrationSource>,
    pub pre_migration_imports: Option<Vec<PathBuf>>,
    pub remote_build_url: Option<String>,
    #[serde(default)]
    pub is_browser_test: bool,
    pub reuse_transactions: Option<bool>,
    pub reuse_journal: Option<bool>,
    pub verify: Option<bool>,
    pub scenario_test_dbs: Option<bool>,
    pub snapshots_when_reusing: Option<SnapshotWhen>,
    pub snapshots_when_not_reusing: Option<SnapshotWhen>,
    #[serde(default)]
    pub force_rebuild: bool,
}

impl BuildRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    pub fn seeders<I, S>(mut self, seeders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seeders = Some(seeders.into_iter().map(Into::into).collect());
        self
    }

    pub fn database_modifier(mut self, modifier: impl Into<String>) -> Self {
        self.database_modifier = Some(modifier.into());
        self
    }

    pub fn remote_build_url(mut self, url: impl Into<String>) -> Self {
        self.remote_build_url = Some(url.into());
        self
    }

    pub fn browser_test(mut self) -> Self {
        self.is_browser_test = true;
        self
    }

    pub fn force_rebuild(mut self) -> Self {
        self.force_rebuild = true;
        self
    }

    /// Resolve against configuration into an immutable [`BuildSpec`].
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMigrationsPath` if an explicit migrations
    /// directory does not exist.
    pub fn resolve(self, config: &AppConfig) -> Result<BuildSpec, Error> {
        let connection = self.connection.unwrap_or_else(|| config.default_connection.clone());
        let configured = config.connections.get(&connection);
        let driver = configured.map(|c| c.driver).unwrap_or(Driver::Sqlite);
        let database = self
            .database
            .or_else(|| configured.map(|c| c.database.clone()))
            .unwrap_or_else(|| connection.clone());

        let migrations = self.migrations.unwrap_or_else(|| config.migrations.clone());
        if let Some(path) = migrations.path()
            && !path.is_dir()
        {
            return Err(Error::InvalidMigrationsPath(path.to_path_buf()));
        }

        Ok(BuildSpec {
            project_name: config.project_name.clone(),
            connection_exists: configured.is_some(),
            connection,
            driver,
            database,
            database_prefix: config.database_prefix.clone(),
            database_modifier: self.database_modifier,
            storage_dir: config.storage_dir.clone(),
            snapshot_prefix: config.snapshot_prefix.clone(),
            pre_migration_imports: self.pre_migration_imports.unwrap_or_else(|| config.pre_migration_imports.clone()),
            migrations,
            seeders: self.seeders.unwrap_or_else(|| config.seeders.clone()),
            seeders_dir: config.seeders_dir.clone(),
            remote_build_url: self.remote_build_url.or_else(|| config.remote_build_url.clone()),
            is_browser_test: self.is_browser_test,
            capabilities: driver.capabilities(),
            reuse: ReuseToggles {
                transaction: self.reuse_transactions.unwrap_or(config.reuse_transactions),
                journal: self.reuse_journal.unwrap_or(config.reuse_journal),
                verify: self.verify.unwrap_or(config.verify_databases),
                scenarios: self.scenario_test_dbs.unwrap_or(config.scenario_test_dbs),
            },
            snapshots: SnapshotPolicy {
                when_reusing: self.snapshots_when_reusing.unwrap_or(config.snapshots_when_reusing),
                when_not_reusing: self.snapshots_when_not_reusing.unwrap_or(config.snapshots_when_not_reusing),
            },
            force_rebuild: self.force_rebuild,
            stale_grace_seconds: config.stale_grace_seconds,
            purge_stale: config.purge_stale,
            invalidation: InvalidationSettings {
                enabled: config.check_for_source_changes,
                method: config.invalidation_method,
                locations: config.invalidation_locations.clone(),
            },
            pre_calculated_build_checksum: None,
        })
    }
}

/// Resolved description of one test's database requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub project_name: String,
    pub connection: String,
    pub connection_exists: bool,
    pub driver: Driver,
    /// The original database name, before prefixing.
    pub database: String,
    pub database_prefix: String,
    pub database_modifier: Option<String>,
    pub storage_dir: PathBuf,
    pub snapshot_prefix: String,
    pub pre_migration_imports: Vec<PathBuf>,
    pub migrations: MigrationSource,
    pub seeders: Vec<String>,
    /// Directory holding the seeder files; always part of the build checksum.
    pub seeders_dir: PathBuf,
    pub remote_build_url: Option<String>,
    pub is_browser_test: bool,
    pub capabilities: DriverCapabilities,
    pub reuse: ReuseToggles,
    pub snapshots: SnapshotPolicy,
    pub force_rebuild: bool,
    pub stale_grace_seconds: u64,
    pub purge_stale: bool,
    pub invalidation: InvalidationSettings,
    pub pre_calculated_build_checksum: Option<String>,
}

impl BuildSpec {
    /// The reuse mechanisms this spec will use.
    pub fn strategy(&self) -> ReuseStrategy {
        strategy::select(StrategyInputs {
            connection_exists: self.connection_exists,
            capabilities: self.capabilities,
            toggles: self.reuse,
            is_browser_test: self.is_browser_test,
        })
    }

    pub fn uses_transactions(&self) -> bool {
        self.strategy().transaction
    }

    pub fn uses_journaling(&self) -> bool {
        self.strategy().journal
    }

    /// Whether a previously built database may be reused at all.
    pub fn is_reusing(&self) -> bool {
        self.strategy().is_reusing()
    }

    pub fn uses_verification(&self) -> bool {
        self.strategy().verify
    }

    pub fn uses_scenarios(&self) -> bool {
        self.capabilities.scenarios && self.reuse.scenarios
    }

    /// The snapshot policy that applies to this build.
    pub fn snapshot_when(&self) -> SnapshotWhen {
        if !self.capabilities.snapshots {
            return SnapshotWhen::Never;
        }
        if self.is_reusing() { self.snapshots.when_reusing } else { self.snapshots.when_not_reusing }
    }

    pub fn snapshots_enabled(&self) -> bool {
        self.snapshot_when().is_enabled()
    }

    /// Name of the physical database for a scenario.
    pub fn database_name(&self, scenario_checksum: &str) -> String {
        let mut name = format!("{}_{}", self.database_prefix, self.database);
        if self.uses_scenarios() {
            name.push('_');
            name.push_str(checksum::short(scenario_checksum, 16));
        }
        if let Some(modifier) = &self.database_modifier {
            name.push('_');
            name.push_str(modifier);
        }
        name
    }

    pub fn databases_dir(&self) -> PathBuf {
        self.storage_dir.join("databases")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.storage_dir.join("snapshots")
    }

    /// A copy with the forced-rebuild flag overridden.
    pub fn with_force_rebuild(&self, force_rebuild: bool) -> Self {
        Self { force_rebuild, ..self.clone() }
    }

    /// The copy sent to a remote peer: carries the build checksum so the peer
    /// can skip recomputing it.
    pub fn for_remote(&self, build_checksum: &str) -> Self {
        Self { pre_calculated_build_checksum: Some(build_checksum.to_string()), ..self.clone() }
    }

    /// The copy a peer builds from: never delegates again.
    pub fn without_remote(&self) -> Self {
        Self { remote_build_url: None, ..self.clone() }
    }
}
