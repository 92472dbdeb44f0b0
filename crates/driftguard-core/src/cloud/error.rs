//! Error types for provider API calls.

use thiserror::Error;

/// A single provider API call failed.
///
/// These are always recovered inside a scan: the affected resource is logged
/// and skipped. Only an enumeration that keeps failing after retries surfaces
/// from [`CloudAdapter::scan_and_clean`](super::adapter::CloudAdapter::scan_and_clean).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The resource does not exist (or no longer exists).
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("throttled by provider: {0}")]
    Throttled(String),

    #[error("transient provider fault: {0}")]
    Transient(String),

    #[error("unexpected HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    Parse(String),

    /// Adapter could not be initialised (missing or unusable credentials).
    #[error("credentials unavailable: {0}")]
    Credentials(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    /// Whether waiting and trying again can help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled(_) | ProviderError::Transient(_) | ProviderError::Request(_)
        )
    }

    /// Map an HTTP status (plus provider error code/message) to the taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 | 410 => ProviderError::NotFound(message),
            401 | 403 => ProviderError::PermissionDenied(message),
            429 => ProviderError::Throttled(message),
            503 if message.contains("SlowDown") => ProviderError::Throttled(message),
            500..=599 => ProviderError::Transient(message),
            _ => ProviderError::Http { status, message },
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Request(err.to_string())
        }
    }
}

impl From<quick_xml::de::DeError> for ProviderError {
    fn from(err: quick_xml::de::DeError) -> Self {
        ProviderError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Parse(err.to_string())
    }
}

/// Convenience result alias.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(ProviderError::from_status(404, "NoSuchBucket").is_not_found());
        assert!(matches!(
            ProviderError::from_status(403, "AccessDenied"),
            ProviderError::PermissionDenied(_)
        ));
        assert!(ProviderError::from_status(429, "slow").is_retryable());
        assert!(matches!(
            ProviderError::from_status(503, "SlowDown: reduce rate"),
            ProviderError::Throttled(_)
        ));
        assert!(ProviderError::from_status(500, "InternalError").is_retryable());
        assert!(matches!(
            ProviderError::from_status(409, "BucketNotEmpty"),
            ProviderError::Http { status: 409, .. }
        ));
    }

    #[test]
    fn test_permission_denied_not_retryable() {
        assert!(!ProviderError::PermissionDenied("x".into()).is_retryable());
        assert!(!ProviderError::NotFound("x".into()).is_retryable());
    }
}
