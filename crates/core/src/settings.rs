//! The record of what one build actually decided and used.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::driver::Driver;

/// Output-only summary of a build.
///
/// Logged after every build, cached for the remote-build shortcut and
/// returned by a remote peer as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSettings {
    pub project_name: String,
    pub connection: String,
    pub driver: Driver,
    /// Name of the physical database that was prepared.
    pub database: String,
    pub database_path: PathBuf,
    pub is_scenario_database: bool,
    pub build_checksum: String,
    pub scenario_checksum: String,
    pub snapshot_token: String,
    pub seeders: Vec<String>,
    /// The database already existed before this build.
    pub database_existed: bool,
    /// An existing database was reused instead of rebuilt.
    pub reused: bool,
    /// Name of the snapshot file the database was restored from, if any.
    pub restored_snapshot: Option<String>,
    pub uses_transactions: bool,
    pub uses_journaling: bool,
    pub uses_verification: bool,
    pub built_remotely: bool,
    pub remote_build_url: Option<String>,
    pub build_ms: u64,
    pub total_ms: u64,
    pub prepared_at: String,
}

impl ResolvedSettings {
    /// The settings as seen by a caller that reused a remotely built database.
    pub fn as_remote_reuse(&self, url: &str) -> Self {
        Self { reused: true, built_remotely: true, remote_build_url: Some(url.to_string()), build_ms: 0, ..self.clone() }
    }

    /// Emit one summary line for this build.
    pub fn log_summary(&self) {
        tracing::info!(
            database = %self.database,
            connection = %self.connection,
            reused = self.reused,
            existed = self.database_existed,
            built_remotely = self.built_remotely,
            restored_snapshot = self.restored_snapshot.as_deref().unwrap_or("-"),
            build_ms = self.build_ms,
            total_ms = self.total_ms,
            "database ready"
        );
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn settings(database: &str, scenario: &str) -> ResolvedSettings {
        ResolvedSettings {
            project_name: "warmdb".into(),
            connection: "main".into(),
            driver: Driver::Sqlite,
            database: database.into(),
            database_path: PathBuf::from(format!("/tmp/{database}.sqlite")),
            is_scenario_database: true,
            build_checksum: "b".repeat(64),
            scenario_checksum: scenario.into(),
            snapshot_token: "t".into(),
            seeders: vec![],
            database_existed: false,
            reused: false,
            restored_snapshot: None,
            uses_transactions: true,
            uses_journaling: false,
            uses_verification: false,
            built_remotely: false,
            remote_build_url: None,
            build_ms: 120,
            total_ms: 130,
            prepared_at: "2026-01-01T00:00:00Z".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_remote_reuse() {
        let settings = fixtures::settings("test_app", "abc");
        let shortcut = settings.as_remote_reuse("http://peer");
        assert!(shortcut.reused);
        assert!(shortcut.built_remotely);
        assert_eq!(shortcut.remote_build_url.as_deref(), Some("http://peer"));
        assert_eq!(shortcut.build_ms, 0);
        assert_eq!(shortcut.database, settings.database);
    }

    #[test]
    fn test_json_shape() {
        let settings = fixtures::settings("test_app", "abc");
        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["driver"], "sqlite");
        assert_eq!(value["scenario_checksum"], "abc");
        assert_eq!(value["built_remotely"], false);
    }
}
