//! Core of warmdb: decides whether a test database can be reused or must be rebuilt.
//!
//! This crate provides:
//! - Content-derived build and scenario checksums
//! - In-database reuse metadata and the reuse strategy selector
//! - Snapshot files as a secondary cache tier
//! - The build orchestrator and the peer side of remote builds
//! - Unified error types and configuration

pub mod checksum;
pub mod config;
pub mod driver;
pub mod error;
pub mod memo;
pub mod metadata;
pub mod orchestrator;
pub mod remote;
pub mod runner;
pub mod settings;
pub mod snapshot;
pub mod spec;

pub use config::AppConfig;
pub use error::Error;
pub use memo::ReuseCaches;
pub use orchestrator::{BuildEnvironment, Orchestrator, PreparedDatabase, TestOutcome};
pub use remote::RemoteBuilder;
pub use settings::ResolvedSettings;
pub use snapshot::{SnapshotInfo, SnapshotStore};
pub use spec::{BuildRequest, BuildSpec};
