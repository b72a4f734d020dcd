//! snapshot_list and snapshot_purge tool implementations.
//!
//! Purging here is an explicit request, so a failed delete is an error
//! rather than a logged warning.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use warmdb_core::{SnapshotInfo, checksum};

use super::json_result;
use crate::error::ToolError;
use crate::state::ServerState;

/// Parameters for the snapshot_list tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotListParams {
    /// Connection whose build checksum decides validity (default: the default connection).
    pub connection: Option<String>,
}

/// Output from the snapshot_list tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotListOutput {
    pub build_checksum: String,
    pub snapshots: Vec<SnapshotInfo>,
}

/// Parameters for the snapshot_purge tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotPurgeParams {
    /// Connection whose build checksum decides validity (default: the default connection).
    pub connection: Option<String>,

    /// Delete these snapshot files by name.
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Delete every snapshot that is stale and past the grace period.
    #[serde(default)]
    pub stale: bool,
}

/// Output from the snapshot_purge tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotPurgeOutput {
    /// Filenames that were deleted.
    pub deleted: Vec<String>,
}

/// Implementation of the snapshot_list tool.
pub async fn list_impl(state: &ServerState, params: SnapshotListParams) -> Result<CallToolResult, McpError> {
    let spec = state.resolve(params.connection)?;
    let build_checksum = checksum::build_checksum(&spec)?;
    let snapshots = state
        .snapshots(&spec)
        .enumerate(&build_checksum, spec.stale_grace_seconds)
        .await;

    json_result(&SnapshotListOutput { build_checksum, snapshots })
}

/// Implementation of the snapshot_purge tool.
pub async fn purge_impl(state: &ServerState, params: SnapshotPurgeParams) -> Result<CallToolResult, McpError> {
    if params.filenames.is_empty() && !params.stale {
        return Err(ToolError::InvalidInput("At least one of filenames or stale must be specified".to_string()).into());
    }

    let spec = state.resolve(params.connection)?;
    let build_checksum = checksum::build_checksum(&spec)?;
    let store = state.snapshots(&spec);
    let found = store.enumerate(&build_checksum, spec.stale_grace_seconds).await;

    let mut targets: Vec<&SnapshotInfo> = Vec::new();
    for filename in &params.filenames {
        let info = found
            .iter()
            .find(|info| &info.filename == filename)
            .ok_or_else(|| ToolError::NotFound(format!("no snapshot named {filename}")))?;
        targets.push(info);
    }
    if params.stale {
        targets.extend(found.iter().filter(|info| info.purgeable));
    }
    targets.sort_by(|a, b| a.filename.cmp(&b.filename));
    targets.dedup_by(|a, b| a.filename == b.filename);

    let mut deleted = Vec::with_capacity(targets.len());
    for info in targets {
        store.purge(info).await?;
        tracing::info!(snapshot = %info.filename, "snapshot deleted");
        deleted.push(info.filename.clone());
    }

    json_result(&SnapshotPurgeOutput { deleted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{output, state};
    use tempfile::TempDir;

    fn write_snapshot(state: &ServerState, token: &str) -> std::path::PathBuf {
        let spec = state.resolve(None).unwrap();
        let path = state.snapshots(&spec).path_for(token);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"x").unwrap();
        path
    }

    fn age(path: &std::path::Path, secs: u64) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(secs)).unwrap();
    }

    #[tokio::test]
    async fn test_list_marks_validity() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        let spec = state.resolve(None).unwrap();
        let build = checksum::build_checksum(&spec).unwrap();
        write_snapshot(&state, &checksum::snapshot_token(&build, &spec.seeders));
        write_snapshot(&state, "0000000000000000-0000000000000000");

        let listed: SnapshotListOutput = output(&list_impl(&state, SnapshotListParams::default()).await.unwrap());
        assert_eq!(listed.build_checksum, build);
        assert_eq!(listed.snapshots.len(), 2);
        assert_eq!(listed.snapshots.iter().filter(|s| s.is_valid).count(), 1);
    }

    #[tokio::test]
    async fn test_purge_by_name() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        let path = write_snapshot(&state, "0000000000000000-0000000000000000");
        let filename = path.file_name().unwrap().to_string_lossy().into_owned();

        let params = SnapshotPurgeParams { filenames: vec![filename.clone()], ..Default::default() };
        let purged: SnapshotPurgeOutput = output(&purge_impl(&state, params).await.unwrap());
        assert_eq!(purged.deleted, vec![filename]);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_purge_stale_respects_grace() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        let grace = state.config.stale_grace_seconds;
        let old = write_snapshot(&state, "1111111111111111-0000000000000000");
        let young = write_snapshot(&state, "2222222222222222-0000000000000000");
        age(&old, grace + 60);

        let params = SnapshotPurgeParams { stale: true, ..Default::default() };
        let purged: SnapshotPurgeOutput = output(&purge_impl(&state, params).await.unwrap());
        assert_eq!(purged.deleted.len(), 1);
        assert!(!old.exists());
        assert!(young.exists());
    }

    #[tokio::test]
    async fn test_purge_unknown_name() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        let params = SnapshotPurgeParams { filenames: vec!["snapshot.nope.sqlite".into()], ..Default::default() };
        let err = purge_impl(&state, params).await.unwrap_err();
        assert!(err.message.starts_with("NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_purge_no_params() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        assert!(purge_impl(&state, SnapshotPurgeParams::default()).await.is_err());
    }
}
