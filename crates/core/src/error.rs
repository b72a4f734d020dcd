//! Unified error types for warmdb.
//!
//! Display strings carry a stable upper-snake prefix so callers (and the MCP
//! server) can classify failures without matching on message text.

use std::error::Error as StdError;
use std::path::PathBuf;

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;
use tokio_rusqlite::rusqlite::ErrorCode as SqliteCode;

use crate::config::ConfigError;

/// Unified error type for the reuse engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., an undecodable remote request).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The named connection is unknown or unusable.
    #[error("INVALID_CONNECTION: {0}")]
    InvalidConnection(String),

    /// The migrations path does not exist or is not a directory.
    #[error("INVALID_MIGRATIONS: migrations path {} does not exist", .0.display())]
    InvalidMigrationsPath(PathBuf),

    /// The backend refused access (credentials or filesystem permissions).
    #[error("ACCESS_DENIED: connection `{connection}` cannot access database `{database}`: {detail}")]
    AccessDenied { connection: String, database: String, detail: String },

    /// Configuration failed to load or validate.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),

    /// A migration failed to apply.
    #[error("MIGRATION_FAILED: {}: {detail}", .path.display())]
    MigrationFailed { path: PathBuf, detail: String },

    /// A seeder failed to run.
    #[error("SEEDER_FAILED: {seeder}: {detail}")]
    SeederFailed { seeder: String, detail: String },

    /// A browser test asked for something its separate server process cannot see.
    #[error("BROWSER_TEST_INCOMPATIBLE: {0}")]
    BrowserTestIncompatible(String),

    /// A snapshot file could not be taken or deleted.
    #[error("SNAPSHOT_ERROR: {0}")]
    Snapshot(String),

    /// Delegating the build to a remote peer failed.
    #[error("REMOTE_BUILD_FAILED: {url}: {detail}")]
    RemoteBuildFailed { url: String, status: Option<u16>, body: Option<String>, detail: String },

    /// The reuse transaction was committed by the code under test.
    #[error(
        "TRANSACTION_COMMITTED: the reuse transaction on `{database}` was committed during the test; \
         the database can no longer be trusted for reuse"
    )]
    TransactionCommitted { database: String },

    /// The database no longer matches the baseline recorded after its build.
    #[error("VERIFICATION_FAILED: `{database}` differs from its baseline in: {}", .tables.join(", "))]
    VerificationFailed { database: String, tables: Vec<String> },

    /// Database operation failed.
    #[error("DATABASE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Filesystem operation failed.
    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("SERIALIZE_ERROR: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    /// Configuration problems: fatal, never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidConnection(_) | Error::InvalidMigrationsPath(_) | Error::AccessDenied { .. } | Error::Config(_)
        )
    }

    /// Failures raised while building a database.
    pub fn is_build(&self) -> bool {
        matches!(
            self,
            Error::MigrationFailed { .. } | Error::SeederFailed { .. } | Error::BrowserTestIncompatible(_)
        )
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Error::RemoteBuildFailed { .. })
    }

    /// Re-raise a backend permission failure as [`Error::AccessDenied`].
    ///
    /// Any other error is returned unchanged.
    pub fn or_access_denied(self, connection: &str, database: &str) -> Self {
        let detail = match &self {
            Error::Database(tokio_rusqlite::Error::Error(e)) => denial_in_chain(e),
            Error::Io(e) => denial_in_chain(e),
            _ => None,
        };
        match detail {
            Some(detail) => {
                Error::AccessDenied { connection: connection.to_string(), database: database.to_string(), detail }
            }
            None => self,
        }
    }
}

/// Walk an error's source chain looking for a permission failure.
fn denial_in_chain(err: &(dyn StdError + 'static)) -> Option<String> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(rusqlite::Error::SqliteFailure(failure, message)) = e.downcast_ref::<rusqlite::Error>()
            && matches!(
                failure.code,
                SqliteCode::PermissionDenied
                    | SqliteCode::ReadOnly
                    | SqliteCode::CannotOpen
                    | SqliteCode::AuthorizationForStatementDenied
            )
        {
            return Some(message.clone().unwrap_or_else(|| failure.to_string()));
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>()
            && io.kind() == std::io::ErrorKind::PermissionDenied
        {
            return Some(io.to_string());
        }
        current = e.source();
    }
    None
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::InvalidInput(_) => -32602,
            Error::InvalidConnection(_) | Error::InvalidMigrationsPath(_) | Error::Config(_) => -32001,
            Error::AccessDenied { .. } => -32002,
            Error::MigrationFailed { .. } | Error::SeederFailed { .. } => -32003,
            Error::BrowserTestIncompatible(_) => -32004,
            Error::Snapshot(_) => -32005,
            Error::RemoteBuildFailed { .. } => -32006,
            Error::TransactionCommitted { .. } => -32007,
            Error::VerificationFailed { .. } => -32008,
            Error::Database(_) | Error::Io(_) | Error::Serialize(_) => -32000,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
