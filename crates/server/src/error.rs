//! Structured errors raised by the server's own tool validation.
//!
//! Engine failures use `warmdb_core::Error`, which converts to MCP errors itself.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Invalid input parameters (e.g., a name outside the managed prefix).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The named database or snapshot does not exist.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let code = match &err {
            ToolError::InvalidInput(_) => -32602,
            ToolError::NotFound(_) => -32010,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
