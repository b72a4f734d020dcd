//! database_list and database_remove tool implementations.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use warmdb_core::checksum;
use warmdb_core::driver::DatabaseInfo;

use super::json_result;
use crate::error::ToolError;
use crate::state::ServerState;

/// Parameters for the database_list tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseListParams {
    /// Connection to inspect (default: the default connection).
    pub connection: Option<String>,
}

/// Output from the database_list tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseListOutput {
    pub build_checksum: String,
    pub databases: Vec<DatabaseInfo>,
}

/// Parameters for the database_remove tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseRemoveParams {
    /// Connection the database belongs to (default: the default connection).
    pub connection: Option<String>,

    /// Database name as reported by database_list.
    pub name: String,
}

/// Output from the database_remove tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseRemoveOutput {
    pub removed: String,
}

/// Implementation of the database_list tool.
pub async fn list_impl(state: &ServerState, params: DatabaseListParams) -> Result<CallToolResult, McpError> {
    let spec = state.resolve(params.connection)?;
    let build_checksum = checksum::build_checksum(&spec)?;
    let databases = state
        .adapter(&spec)
        .find_databases(&spec.database_prefix, &spec.project_name, &build_checksum, spec.stale_grace_seconds)
        .await;

    json_result(&DatabaseListOutput { build_checksum, databases })
}

/// Implementation of the database_remove tool.
///
/// Only databases carrying the engine's name prefix can be removed.
pub async fn remove_impl(state: &ServerState, params: DatabaseRemoveParams) -> Result<CallToolResult, McpError> {
    let spec = state.resolve(params.connection)?;
    let name = params.name.trim();

    if !name.starts_with(&format!("{}_", spec.database_prefix)) {
        return Err(ToolError::InvalidInput(format!("{name} is not a managed database")).into());
    }
    if name.contains(['/', '\\']) || name.contains("..") {
        return Err(ToolError::InvalidInput(format!("invalid database name: {name}")).into());
    }

    let adapter = state.adapter(&spec);
    if !adapter.exists(name).await? {
        return Err(ToolError::NotFound(format!("no database named {name}")).into());
    }
    adapter.remove_database(name).await?;
    tracing::info!(database = %name, "database removed");

    json_result(&DatabaseRemoveOutput { removed: name.to_string() })
}
