//! Remote build delegation.
//!
//! The caller serializes its resolved [`BuildSpec`] (with the build checksum
//! attached) into one form field and POSTs it to a peer; the peer builds the
//! database and answers with the [`ResolvedSettings`] as JSON. The HTTP
//! client lives in `warmdb-client`; the peer side is [`handle_remote_build`].

use async_trait::async_trait;

use crate::Error;
use crate::orchestrator::{BuildEnvironment, Orchestrator};
use crate::settings::ResolvedSettings;
use crate::spec::BuildSpec;

/// Path of the build endpoint under the peer's base URL.
pub const REMOTE_BUILD_PATH: &str = "warmdb/remote-build";

/// Form field carrying the serialized build specification.
pub const REMOTE_FORM_FIELD: &str = "build_request";

/// Delegates a build to a peer.
#[async_trait]
pub trait RemoteBuilder: Send + Sync {
    /// Ask the peer at `url` to build `spec`.
    ///
    /// # Errors
    ///
    /// Any failure is `Error::RemoteBuildFailed`; it is never retried.
    async fn build(&self, url: &str, spec: &BuildSpec) -> Result<ResolvedSettings, Error>;
}

/// Serialize a spec into the form value sent to a peer.
pub fn encode_request(spec: &BuildSpec) -> Result<String, Error> {
    Ok(serde_json::to_string(spec)?)
}

/// Decode a peer's response body.
pub fn decode_response(body: &str) -> Result<ResolvedSettings, Error> {
    Ok(serde_json::from_str(body)?)
}

/// Peer side of the protocol: build the requested database and return the
/// settings as JSON. The request's remote URL is dropped, so a peer never
/// delegates again, and nothing is armed.
///
/// # Errors
///
/// `Error::InvalidInput` for an undecodable request; otherwise whatever the
/// build returns.
pub async fn handle_remote_build(env: &BuildEnvironment, form_value: &str) -> Result<String, Error> {
    let spec: BuildSpec = serde_json::from_str(form_value)
        .map_err(|e| Error::InvalidInput(format!("undecodable build request: {e}")))?;
    let spec = spec.without_remote();
    tracing::info!(connection = %spec.connection, database = %spec.database, "building for remote caller");

    let settings = Orchestrator::new(spec, env.clone()).build().await?;
    Ok(serde_json::to_string(&settings)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::memo::ReuseCaches;
    use crate::spec::{BuildRequest, MigrationSource};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_rejects_garbage() {
        let env = BuildEnvironment::from_config(&AppConfig::default(), ReuseCaches::new());
        let result = handle_remote_build(&env, "{not json").await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_builds_without_delegating() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            storage_dir: dir.path().to_path_buf(),
            migrations: MigrationSource::Enabled(false),
            ..Default::default()
        };
        let spec = BuildRequest::new().remote_build_url("http://unused.invalid").resolve(&config).unwrap();
        let build = crate::checksum::build_checksum(&spec).unwrap();
        let form = encode_request(&spec.for_remote(&build)).unwrap();

        let env = BuildEnvironment::from_config(&config, ReuseCaches::new());
        let body = handle_remote_build(&env, &form).await.unwrap();
        let settings = decode_response(&body).unwrap();

        assert_eq!(settings.build_checksum, build);
        assert!(!settings.built_remotely);
        assert!(settings.remote_build_url.is_none());
        assert!(settings.database_path.exists());
    }
}
