// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplicatorError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("API call timed out after {0} seconds")]
    ApiTimeout(u64),

    #[error("Secret event without namespace or name")]
    MissingObjectMeta,

    #[error("Invalid object reference: {0}")]
    InvalidReference(String),
}

impl ReplicatorError {
    /// Whether a retry with backoff may succeed. Version conflicts, throttling,
    /// server errors and network-level failures are retried; everything else is
    /// reported and dropped.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(kube::Error::Api(resp)) => {
                matches!(resp.code, 408 | 409 | 429) || resp.code >= 500
            }
            Self::Kube(_) => true,
            Self::ApiTimeout(_) => true,
            Self::MissingObjectMeta | Self::InvalidReference(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplicatorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> ReplicatorError {
        ReplicatorError::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_conflict_is_transient() {
        assert!(api_error(409).is_transient());
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(api_error(500).is_transient());
        assert!(api_error(503).is_transient());
        assert!(api_error(429).is_transient());
    }

    #[test]
    fn test_client_errors_are_not_transient() {
        assert!(!api_error(404).is_transient());
        assert!(!api_error(403).is_transient());
        assert!(!api_error(422).is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        assert!(ReplicatorError::ApiTimeout(15).is_transient());
    }

    #[test]
    fn test_malformed_reference_is_not_transient() {
        assert!(!ReplicatorError::InvalidReference("no-slash".to_string()).is_transient());
    }
}
