//! Shared server state: configuration plus the process-wide build environment.

use std::sync::Arc;

use warmdb_client::{HttpRemoteBuilder, RemoteConfig, RemoteError};
use warmdb_core::driver::Adapter;
use warmdb_core::{AppConfig, BuildEnvironment, BuildRequest, BuildSpec, Error, ReuseCaches, SnapshotStore};

#[derive(Debug, Clone)]
pub struct ServerState {
    pub config: AppConfig,
    pub env: BuildEnvironment,
}

impl ServerState {
    pub fn new(config: AppConfig) -> Result<Self, RemoteError> {
        let remote = HttpRemoteBuilder::new(RemoteConfig::from_app(&config))?;
        let env = BuildEnvironment::from_config(&config, ReuseCaches::new()).with_remote(Arc::new(remote));
        Ok(Self { config, env })
    }

    /// Resolve the default build for a connection (configured seeders, no overrides).
    pub fn resolve(&self, connection: Option<String>) -> Result<BuildSpec, Error> {
        let request = BuildRequest { connection, ..Default::default() };
        request.resolve(&self.config)
    }

    pub fn adapter(&self, spec: &BuildSpec) -> Adapter {
        Adapter::for_spec(spec)
    }

    pub fn snapshots(&self, spec: &BuildSpec) -> SnapshotStore {
        SnapshotStore::for_spec(spec, &self.adapter(spec))
    }
}
