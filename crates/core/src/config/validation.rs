//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `project_name` or `database_prefix` is empty
    /// - `snapshot_prefix` is empty or contains a path separator
    /// - `remote_build_url` is not an http(s) URL
    /// - `remote_timeout_secs` is 0 or exceeds one hour
    /// - a connection has an empty database name
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_name.trim().is_empty() {
            return Err(ConfigError::Invalid { field: "project_name".into(), reason: "must not be empty".into() });
        }

        if self.database_prefix.is_empty() {
            return Err(ConfigError::Invalid { field: "database_prefix".into(), reason: "must not be empty".into() });
        }

        if self.snapshot_prefix.is_empty() || self.snapshot_prefix.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "snapshot_prefix".into(),
                reason: "must be a non-empty filename prefix".into(),
            });
        }

        if let Some(remote) = &self.remote_build_url {
            let parsed = url::Url::parse(remote)
                .map_err(|e| ConfigError::Invalid { field: "remote_build_url".into(), reason: e.to_string() })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid {
                    field: "remote_build_url".into(),
                    reason: format!("unsupported scheme `{}`", parsed.scheme()),
                });
            }
        }

        if self.remote_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "remote_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.remote_timeout_secs > 3600 {
            return Err(ConfigError::Invalid {
                field: "remote_timeout_secs".into(),
                reason: "must not exceed 1 hour (3600s)".into(),
            });
        }

        for (name, connection) in &self.connections {
            if connection.database.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: format!("connections.{name}.database"),
                    reason: "must not be empty".into(),
                });
            }
        }

        if !self.connections.contains_key(&self.default_connection) {
            tracing::warn!(
                default_connection = %self.default_connection,
                "default_connection is not configured; requests must name a connection"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::driver::Driver;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_project_name() {
        let config = AppConfig { project_name: "  ".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "project_name"));
    }

    #[test]
    fn test_validate_snapshot_prefix_with_separator() {
        let config = AppConfig { snapshot_prefix: "snap/".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "snapshot_prefix"));
    }

    #[test]
    fn test_validate_remote_url_scheme() {
        let config = AppConfig { remote_build_url: Some("ftp://peer".into()), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "remote_build_url"));

        let config = AppConfig { remote_build_url: Some("not a url".into()), ..Default::default() };
        assert!(config.validate().is_err());

        let config = AppConfig { remote_build_url: Some("http://peer:8000".into()), ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_remote_timeout_bounds() {
        let config = AppConfig { remote_timeout_secs: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "remote_timeout_secs"));

        let config = AppConfig { remote_timeout_secs: 3601, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "remote_timeout_secs"));

        let config = AppConfig { remote_timeout_secs: 3600, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_database_name() {
        let mut config = AppConfig::default();
        config
            .connections
            .insert("reporting".into(), ConnectionConfig { driver: Driver::Sqlite, database: String::new() });
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "connections.reporting.database"));
    }
}
