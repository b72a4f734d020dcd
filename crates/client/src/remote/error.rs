//! Remote build client error types.

use std::sync::Arc;

/// Errors from delegating a build to a peer.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The peer base URL cannot be parsed or joined.
    #[error("invalid remote URL: {0}")]
    InvalidUrl(String),

    /// The build specification could not be encoded.
    #[error("cannot encode build request: {0}")]
    Encode(String),

    /// The peer answered with a non-success status.
    #[error("HTTP error: {status}")]
    HttpError { status: u16, body: String },

    /// Request timeout.
    #[error("request timeout")]
    Timeout,

    /// Network error.
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// Response parse error.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { RemoteError::Timeout } else { RemoteError::Network(Arc::new(err)) }
    }
}

impl RemoteError {
    /// Wrap into the single remote-build failure the engine reports.
    pub fn into_build_error(self, url: &str) -> warmdb_core::Error {
        let (status, body) = match &self {
            RemoteError::HttpError { status, body } => (Some(*status), Some(body.clone())),
            _ => (None, None),
        };
        warmdb_core::Error::RemoteBuildFailed { url: url.to_string(), status, body, detail: self.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RemoteError::HttpError { status: 500, body: "boom".into() };
        assert_eq!(err.to_string(), "HTTP error: 500");

        let err = RemoteError::InvalidUrl("nope".to_string());
        assert!(err.to_string().contains("invalid remote URL"));
    }

    #[test]
    fn test_into_build_error_keeps_body() {
        let err = RemoteError::HttpError { status: 502, body: "bad gateway".into() }.into_build_error("http://peer");
        match err {
            warmdb_core::Error::RemoteBuildFailed { url, status, body, .. } => {
                assert_eq!(url, "http://peer");
                assert_eq!(status, Some(502));
                assert_eq!(body.as_deref(), Some("bad gateway"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_timeout_has_no_status() {
        let err = RemoteError::Timeout.into_build_error("http://peer");
        assert!(matches!(err, warmdb_core::Error::RemoteBuildFailed { status: None, body: None, .. }));
        assert!(err.to_string().starts_with("REMOTE_BUILD_FAILED"));
    }
}
