//! build_database and remote_build tool implementations.
//!
//! Both build without arming a reuse mechanism: an MCP call cannot hold a
//! transaction open across a test. `remote_build` is the peer side of remote
//! delegation and takes the same form value an HTTP peer receives.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use warmdb_core::remote::handle_remote_build;
use warmdb_core::{BuildRequest, Orchestrator};

use super::json_result;
use crate::error::ToolError;
use crate::state::ServerState;

/// Parameters for the build_database tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct BuildDatabaseParams {
    /// Connection name (default: the configured default connection).
    pub connection: Option<String>,

    /// Seeders to run, in order (default: the configured seeders).
    pub seeders: Option<Vec<String>>,

    /// Suffix separating parallel workers' databases.
    pub database_modifier: Option<String>,

    /// Rebuild even when the existing database is reusable.
    #[serde(default)]
    pub force_rebuild: bool,

    /// Delegate the build to the peer at this base URL.
    pub remote_build_url: Option<String>,
}

/// Parameters for the remote_build tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RemoteBuildParams {
    /// The serialized build specification sent by the delegating instance.
    pub build_request: String,
}

/// Implementation of the build_database tool.
pub async fn build_impl(state: &ServerState, params: BuildDatabaseParams) -> Result<CallToolResult, McpError> {
    let request = BuildRequest {
        connection: params.connection,
        seeders: params.seeders,
        database_modifier: params.database_modifier,
        remote_build_url: params.remote_build_url,
        force_rebuild: params.force_rebuild,
        ..Default::default()
    };
    let spec = request.resolve(&state.config)?;
    let settings = Orchestrator::new(spec, state.env.clone()).build().await?;
    json_result(&settings)
}

/// Implementation of the remote_build tool.
pub async fn remote_build_impl(state: &ServerState, params: RemoteBuildParams) -> Result<CallToolResult, McpError> {
    if params.build_request.trim().is_empty() {
        return Err(ToolError::InvalidInput("build_request must not be empty".into()).into());
    }
    let json = handle_remote_build(&state.env, &params.build_request).await?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{output, state};
    use tempfile::TempDir;
    use warmdb_core::ResolvedSettings;
    use warmdb_core::remote::encode_request;

    #[tokio::test]
    async fn test_build_then_reuse() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());

        let first: ResolvedSettings = output(&build_impl(&state, BuildDatabaseParams::default()).await.unwrap());
        assert!(!first.reused);
        assert!(first.database_path.exists());

        let second: ResolvedSettings = output(&build_impl(&state, BuildDatabaseParams::default()).await.unwrap());
        assert!(second.reused);
        assert_eq!(second.database, first.database);
    }

    #[tokio::test]
    async fn test_build_unknown_connection() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        let params = BuildDatabaseParams { connection: Some("reporting".into()), ..Default::default() };
        let err = build_impl(&state, params).await.unwrap_err();
        assert!(err.message.starts_with("INVALID_CONNECTION"));
    }

    #[tokio::test]
    async fn test_remote_build_round_trip() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        let spec = state.resolve(None).unwrap();
        let build_request = encode_request(&spec).unwrap();

        let settings: ResolvedSettings =
            output(&remote_build_impl(&state, RemoteBuildParams { build_request }).await.unwrap());
        assert_eq!(settings.seeders, vec!["users".to_string()]);
        assert!(settings.database_path.exists());
    }

    #[tokio::test]
    async fn test_remote_build_rejects_empty_request() {
        let dir = TempDir::new().unwrap();
        let state = state(dir.path());
        let err = remote_build_impl(&state, RemoteBuildParams { build_request: " ".into() }).await.unwrap_err();
        assert!(err.message.starts_with("INVALID_INPUT"));
    }
}
