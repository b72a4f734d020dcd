//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.
use std::sync::Arc;

use crate::state::ServerState;
use crate::tools::{
    BuildDatabaseParams, DatabaseListParams, DatabaseRemoveParams, RemoteBuildParams, SnapshotListParams,
    SnapshotPurgeParams, build, databases, snapshots,
};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

/// The main MCP server handler for warmdb.
#[derive(Clone)]
pub struct WarmdbServer {
    tool_router: ToolRouter<Self>,
    state: Arc<ServerState>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl WarmdbServer {
    /// Create a new server handler.
    pub fn new(state: ServerState) -> Self {
        Self { tool_router: Self::tool_router(), state: Arc::new(state) }
    }

    /// Build or reuse a test database.
    ///
    /// Checks the build and scenario checksums, reuses a clean database when
    /// they match, restores a snapshot when one fits, and otherwise rebuilds.
    #[tool(
        description = "Build or reuse a test database. Returns the resolved settings: database name and path, checksums, whether it was reused or restored from a snapshot, and timings."
    )]
    async fn build_database(&self, params: Parameters<BuildDatabaseParams>) -> Result<CallToolResult, McpError> {
        build::build_impl(&self.state, params.0).await
    }

    /// Build a database on behalf of a remote caller.
    #[tool(
        description = "Peer side of remote builds. Takes the JSON build request a remote caller sends and returns the resolved settings as JSON. Never delegates further."
    )]
    async fn remote_build(&self, params: Parameters<RemoteBuildParams>) -> Result<CallToolResult, McpError> {
        build::remote_build_impl(&self.state, params.0).await
    }

    #[tool(description = "List snapshot files with their validity for the current build checksum and whether they can be purged.")]
    async fn snapshot_list(&self, params: Parameters<SnapshotListParams>) -> Result<CallToolResult, McpError> {
        snapshots::list_impl(&self.state, params.0).await
    }

    #[tool(description = "Delete snapshot files by name, or every stale snapshot past the grace period.")]
    async fn snapshot_purge(&self, params: Parameters<SnapshotPurgeParams>) -> Result<CallToolResult, McpError> {
        snapshots::purge_impl(&self.state, params.0).await
    }

    #[tool(description = "List test databases managed by warmdb with their build checksum, validity and last use.")]
    async fn database_list(&self, params: Parameters<DatabaseListParams>) -> Result<CallToolResult, McpError> {
        databases::list_impl(&self.state, params.0).await
    }

    #[tool(description = "Remove a managed test database by name.")]
    async fn database_remove(&self, params: Parameters<DatabaseRemoveParams>) -> Result<CallToolResult, McpError> {
        databases::remove_impl(&self.state, params.0).await
    }
}

impl ServerHandler for WarmdbServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "warmdb".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::state;
    use tempfile::TempDir;

    #[test]
    fn test_lists_all_tools() {
        let dir = TempDir::new().unwrap();
        let server = WarmdbServer::new(state(dir.path()));
        let mut names: Vec<String> = server.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(
            names,
            ["build_database", "database_list", "database_remove", "remote_build", "snapshot_list", "snapshot_purge"]
        );
    }

    #[test]
    fn test_server_info() {
        let dir = TempDir::new().unwrap();
        let info = WarmdbServer::new(state(dir.path())).get_info();
        assert_eq!(info.server_info.name, "warmdb");
        assert!(info.capabilities.tools.is_some());
    }
}
