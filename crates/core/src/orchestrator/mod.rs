//! Build orchestration.
//!
//! One [`Orchestrator`] handles one resolved [`BuildSpec`]:
//!
//! 1. compute checksums and the physical database name,
//! 2. purge stale snapshots and databases (once per process),
//! 3. reuse a remotely built database from the process cache, or delegate
//!    the build to the remote peer,
//! 4. otherwise reuse the local database when its metadata proves it clean,
//! 5. otherwise rebuild it, from the best snapshot when one matches,
//! 6. write fresh reuse metadata and arm the reuse mechanism.
//!
//! The post-test half lives on [`PreparedDatabase`].

use std::sync::Arc;
use std::time::Instant;

use tokio_rusqlite::Connection;

use crate::Error;
use crate::checksum;
use crate::config::AppConfig;
use crate::driver::Adapter;
use crate::memo::ReuseCaches;
use crate::metadata::{ReuseExpectation, ReuseRecord};
use crate::remote::RemoteBuilder;
use crate::runner::{MigrationRunner, SeedRunner, SqlMigrator, SqlSeeder};
use crate::settings::ResolvedSettings;
use crate::snapshot::SnapshotStore;
use crate::spec::{BuildSpec, ReuseMechanism};

mod session;

pub use session::{PreparedDatabase, TestOutcome};

/// Collaborators shared by every build in a process.
#[derive(Clone)]
pub struct BuildEnvironment {
    pub caches: Arc<ReuseCaches>,
    pub migrator: Arc<dyn MigrationRunner>,
    pub seeder: Arc<dyn SeedRunner>,
    pub remote: Option<Arc<dyn RemoteBuilder>>,
}

impl BuildEnvironment {
    pub fn new(caches: Arc<ReuseCaches>, migrator: Arc<dyn MigrationRunner>, seeder: Arc<dyn SeedRunner>) -> Self {
        Self { caches, migrator, seeder, remote: None }
    }

    /// SQL-file runners from configuration.
    pub fn from_config(config: &AppConfig, caches: Arc<ReuseCaches>) -> Self {
        let migrations = config.migrations.path().map(ToOwned::to_owned).unwrap_or_else(|| "database/migrations".into());
        Self::new(caches, Arc::new(SqlMigrator::new(migrations)), Arc::new(SqlSeeder::new(config.seeders_dir.clone())))
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteBuilder>) -> Self {
        self.remote = Some(remote);
        self
    }
}

impl std::fmt::Debug for BuildEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildEnvironment")
            .field("caches", &self.caches)
            .field("remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

/// Checksums and naming derived once per build.
#[derive(Debug, Clone)]
struct BuildKeys {
    build: String,
    scenario: String,
    token: String,
    database: String,
}

/// Decides between reuse and rebuild for one [`BuildSpec`].
#[derive(Debug)]
pub struct Orchestrator {
    spec: BuildSpec,
    env: BuildEnvironment,
    adapter: Adapter,
    snapshots: SnapshotStore,
}

impl Orchestrator {
    pub fn new(spec: BuildSpec, env: BuildEnvironment) -> Self {
        let adapter = Adapter::for_spec(&spec);
        let snapshots = SnapshotStore::for_spec(&spec, &adapter);
        Self { spec, env, adapter, snapshots }
    }

    pub fn spec(&self) -> &BuildSpec {
        &self.spec
    }

    /// Prepare the database and arm the reuse mechanism for one test.
    ///
    /// # Errors
    ///
    /// Configuration, build and remote-build failures are returned as-is;
    /// backend permission failures become `Error::AccessDenied`.
    pub async fn execute(&self) -> Result<PreparedDatabase, Error> {
        let settings = self.build().await?;
        self.arm(settings).await.map_err(|e| e.or_access_denied(&self.spec.connection, &self.spec.database))
    }

    /// Prepare the database without arming anything. This is what a remote peer runs.
    pub async fn build(&self) -> Result<ResolvedSettings, Error> {
        let started = Instant::now();
        let result = self.resolve(started).await;
        let settings = result.map_err(|e| e.or_access_denied(&self.spec.connection, &self.spec.database))?;
        settings.log_summary();
        Ok(settings)
    }

    async fn resolve(&self, started: Instant) -> Result<ResolvedSettings, Error> {
        let spec = &self.spec;
        if !spec.connection_exists {
            return Err(Error::InvalidConnection(format!("connection `{}` is not configured", spec.connection)));
        }
        if spec.is_browser_test && spec.database == ":memory:" {
            return Err(Error::BrowserTestIncompatible(format!(
                "connection `{}` uses an in-memory database, which the browser's server process cannot see",
                spec.connection
            )));
        }

        let build = checksum::build_checksum(spec)?;
        let scenario = checksum::scenario_checksum(&build, &spec.seeders);
        let keys = BuildKeys {
            token: checksum::snapshot_token(&build, &spec.seeders),
            database: spec.database_name(&scenario),
            build,
            scenario,
        };
        tracing::debug!(database = %keys.database, build = checksum::short(&keys.build, 16), "resolved checksums");

        self.purge_stale_once(&keys.build).await;

        match &spec.remote_build_url {
            Some(url) => self.resolve_remote(url, &keys, started).await,
            None => self.resolve_local(&keys, started).await,
        }
    }

    async fn resolve_remote(&self, url: &str, keys: &BuildKeys, started: Instant) -> Result<ResolvedSettings, Error> {
        let caches = &self.env.caches;
        if !self.spec.force_rebuild
            && let Some(cached) = caches.remote_builds.get(url, &keys.scenario).await
        {
            if self.remote_build_is_clean(&cached).await? {
                tracing::debug!(url, database = %cached.database, "reusing database built remotely earlier");
                return Ok(ResolvedSettings { total_ms: elapsed_ms(started), ..cached.as_remote_reuse(url) });
            }
            caches.remote_builds.remove(url, &keys.scenario).await;
        }

        let remote = self.env.remote.as_ref().ok_or_else(|| Error::RemoteBuildFailed {
            url: url.to_string(),
            status: None,
            body: None,
            detail: "no remote builder is configured".into(),
        })?;
        tracing::info!(url, database = %keys.database, "delegating build");
        let settings = remote.build(url, &self.spec.for_remote(&keys.build)).await?;
        if settings.scenario_checksum != keys.scenario {
            tracing::warn!(url, "remote peer resolved a different scenario checksum");
        }

        let settings = ResolvedSettings {
            built_remotely: true,
            remote_build_url: Some(url.to_string()),
            total_ms: elapsed_ms(started),
            ..settings
        };
        caches.remote_builds.insert(url, settings.clone()).await;
        Ok(settings)
    }

    /// Whether a database built remotely earlier still carries a clean reuse record.
    async fn remote_build_is_clean(&self, cached: &ResolvedSettings) -> Result<bool, Error> {
        let adapter = &self.adapter;
        if !adapter.exists(&cached.database).await? {
            tracing::info!(database = %cached.database, "remotely built database is gone");
            return Ok(false);
        }
        let conn = adapter.connect(&cached.database).await?;
        let verdict = adapter
            .metadata(&conn)
            .is_clean(&ReuseExpectation {
                project_name: &self.spec.project_name,
                build_checksum: &cached.build_checksum,
                scenario_checksum: &cached.scenario_checksum,
                mechanism: self.spec.strategy().mechanism(),
            })
            .await;
        close(conn).await?;
        let verdict = verdict?;
        if let Some(reason) = verdict.reason() {
            tracing::info!(database = %cached.database, reason, "remotely built database is not reusable");
        }
        Ok(verdict.is_clean())
    }

    async fn resolve_local(&self, keys: &BuildKeys, started: Instant) -> Result<ResolvedSettings, Error> {
        let spec = &self.spec;
        let adapter = &self.adapter;
        let strategy = spec.strategy();
        let existed = adapter.exists(&keys.database).await?;

        if strategy.is_reusing() && existed && !spec.force_rebuild {
            let conn = adapter.connect(&keys.database).await?;
            let metadata = adapter.metadata(&conn);
            let verdict = metadata
                .is_clean(&ReuseExpectation {
                    project_name: &spec.project_name,
                    build_checksum: &keys.build,
                    scenario_checksum: &keys.scenario,
                    mechanism: strategy.mechanism(),
                })
                .await?;
            if verdict.is_clean() {
                metadata.touch().await?;
                close(conn).await?;
                return Ok(self.settings(keys, existed, true, None, 0, started));
            }
            tracing::info!(database = %keys.database, reason = verdict.reason().unwrap_or("-"), "database is not reusable");
            close(conn).await?;
        }

        let build_started = Instant::now();
        let restored = self.rebuild(keys).await?;
        let build_ms = elapsed_ms(build_started);
        Ok(self.settings(keys, existed, false, restored, build_ms, started))
    }

    /// Rebuild from scratch or from the best snapshot. Returns the restored snapshot's filename.
    async fn rebuild(&self, keys: &BuildKeys) -> Result<Option<String>, Error> {
        let spec = &self.spec;
        let adapter = &self.adapter;
        let when = spec.snapshot_when();

        if adapter.restores_whole_file() {
            adapter.reset(&keys.database).await?;
        }

        let restored = if when.is_enabled() {
            self.snapshots.restore_best_match(adapter, &keys.database, &keys.build, &spec.seeders).await
        } else {
            None
        };

        let conn = adapter.connect(&keys.database).await?;
        let version = adapter.version(&self.env.caches.versions, &spec.connection, &conn).await?;
        tracing::debug!(driver = adapter.driver().as_str(), version = %version, "building database");

        match &restored {
            Some(found) => {
                tracing::info!(database = %keys.database, snapshot = %found.filename, remaining = found.remaining.len(), "restored snapshot");
                self.env.seeder.seed(&conn, &found.remaining).await?;
                if !found.remaining.is_empty() && when.after_seeders() {
                    self.take_snapshot(&conn, &keys.token).await;
                }
            }
            None => {
                adapter.import(&conn, &spec.pre_migration_imports).await?;
                if spec.migrations.is_enabled() {
                    self.env.migrator.migrate(&conn, spec.migrations.path()).await?;
                }
                if when.after_migrations() {
                    self.take_snapshot(&conn, &checksum::snapshot_token(&keys.build, &[])).await;
                }
                self.env.seeder.seed(&conn, &spec.seeders).await?;
                // with no seeders the after-migrations snapshot is the same file
                if when.after_seeders() && !(spec.seeders.is_empty() && when.after_migrations()) {
                    self.take_snapshot(&conn, &keys.token).await;
                }
            }
        }

        let strategy = spec.strategy();
        let record = ReuseRecord {
            transaction_reusable: strategy.transaction.then_some(true),
            journal_reusable: strategy.journal.then_some(true),
            ..ReuseRecord::new(&spec.project_name, &spec.database, &keys.build, &keys.token, &keys.scenario)
        };
        adapter.metadata(&conn).write(&record).await?;
        if strategy.verify {
            adapter.record_baseline(&conn).await?;
        }
        close(conn).await?;

        Ok(restored.map(|found| found.filename))
    }

    /// Snapshots are a cache tier: failing to take one only costs a later rebuild.
    async fn take_snapshot(&self, conn: &Connection, token: &str) {
        if let Err(e) = self.snapshots.take(&self.adapter, conn, token).await {
            tracing::warn!(token, "cannot take snapshot: {e}");
        }
    }

    async fn purge_stale_once(&self, build_checksum: &str) {
        let spec = &self.spec;
        if !spec.purge_stale || !self.env.caches.claim_stale_purge() {
            return;
        }
        let grace = spec.stale_grace_seconds;
        let snapshots = self.snapshots.purge_stale(build_checksum, grace).await;

        let mut databases = 0;
        let found = self.adapter.find_databases(&spec.database_prefix, &spec.project_name, build_checksum, grace).await;
        for info in found.into_iter().filter(|info| info.purgeable) {
            match self.adapter.remove_database(&info.name).await {
                Ok(()) => databases += 1,
                Err(e) => tracing::warn!(database = %info.name, "cannot remove stale database: {e}"),
            }
        }
        if snapshots + databases > 0 {
            tracing::info!(snapshots, databases, "purged stale files");
        }
    }

    async fn arm(&self, settings: ResolvedSettings) -> Result<PreparedDatabase, Error> {
        let adapter = &self.adapter;
        let strategy = self.spec.strategy();
        let conn = adapter.connect(&settings.database).await?;
        let metadata = adapter.metadata(&conn);

        if strategy.verify && !adapter.has_baseline(&conn).await? {
            adapter.record_baseline(&conn).await?;
        }

        let mechanism = strategy.mechanism();
        match mechanism {
            // armed outside the transaction, cleared inside it: only a rollback brings the armed value back
            Some(ReuseMechanism::Transaction) => {
                metadata.arm(ReuseMechanism::Transaction).await?;
                adapter.begin_transaction(&conn).await?;
                metadata.disarm(ReuseMechanism::Transaction).await?;
            }
            Some(ReuseMechanism::Journal) => {
                metadata.disarm(ReuseMechanism::Journal).await?;
                adapter.start_journal(&conn).await?;
            }
            None => {}
        }

        Ok(PreparedDatabase::new(conn, settings, adapter.clone(), mechanism, strategy.verify))
    }

    fn settings(
        &self, keys: &BuildKeys, existed: bool, reused: bool, restored: Option<String>, build_ms: u64,
        started: Instant,
    ) -> ResolvedSettings {
        let spec = &self.spec;
        let strategy = spec.strategy();
        ResolvedSettings {
            project_name: spec.project_name.clone(),
            connection: spec.connection.clone(),
            driver: spec.driver,
            database: keys.database.clone(),
            database_path: self.adapter.database_path(&keys.database),
            is_scenario_database: spec.uses_scenarios(),
            build_checksum: keys.build.clone(),
            scenario_checksum: keys.scenario.clone(),
            snapshot_token: keys.token.clone(),
            seeders: spec.seeders.clone(),
            database_existed: existed,
            reused,
            restored_snapshot: restored,
            uses_transactions: strategy.transaction,
            uses_journaling: strategy.journal,
            uses_verification: strategy.verify,
            built_remotely: false,
            remote_build_url: None,
            build_ms,
            total_ms: elapsed_ms(started),
            prepared_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

async fn close(conn: Connection) -> Result<(), Error> {
    conn.close().await.map_err(Error::from)
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
