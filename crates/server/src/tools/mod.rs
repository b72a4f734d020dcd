//! MCP tool implementations.
//!
//! This module contains all tools exposed by the warmdb server.

pub mod build;
pub mod databases;
pub mod snapshots;

use rmcp::ErrorData as McpError;
use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use warmdb_core::Error;

pub use build::{BuildDatabaseParams, RemoteBuildParams};
pub use databases::{DatabaseListParams, DatabaseRemoveParams};
pub use snapshots::{SnapshotListParams, SnapshotPurgeParams};

/// Wrap a serializable output as pretty JSON text content.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::InvalidInput(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use rmcp::model::CallToolResult;
    use serde::de::DeserializeOwned;
    use warmdb_core::AppConfig;
    use warmdb_core::spec::MigrationSource;

    use crate::state::ServerState;

    /// A server whose storage, migrations and seeders live under `dir`.
    pub fn state(dir: &Path) -> ServerState {
        let migrations = dir.join("migrations");
        let seeders = dir.join("seeders");
        std::fs::create_dir_all(&migrations).unwrap();
        std::fs::create_dir_all(&seeders).unwrap();
        std::fs::write(migrations.join("001_users.sql"), "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);")
            .unwrap();
        std::fs::write(seeders.join("users.sql"), "INSERT INTO users (name) VALUES ('ada');").unwrap();

        let config = AppConfig {
            storage_dir: dir.join("storage"),
            migrations: MigrationSource::Path(migrations),
            seeders_dir: seeders,
            seeders: vec!["users".into()],
            invalidation_locations: vec![],
            ..Default::default()
        };
        ServerState::new(config).unwrap()
    }

    /// Decode the JSON text of a tool result.
    pub fn output<T: DeserializeOwned>(result: &CallToolResult) -> T {
        let content_val = serde_json::to_value(&result.content[0]).unwrap();
        let text = content_val
            .get("text")
            .and_then(|v| v.as_str())
            .expect("Expected text field in content");
        serde_json::from_str(text).unwrap()
    }
}
