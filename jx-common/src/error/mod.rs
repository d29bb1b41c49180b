use std::fmt::Debug;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid or cyclic workflow, missing environment, missing version.
    /// Never retried.
    #[error("Configuration Error: {0}")]
    Configuration(String),

    /// Pull request closed without merge, or a failing commit status.
    #[error("Promotion Failed: {0}")]
    PromotionFailed(String),

    #[error("Timeout Error: {0}")]
    Timeout(String),

    /// Kubernetes or Git provider API failures worth retrying.
    #[error("Transient API Error: {0}")]
    TransientApi(String),

    #[error("Resource Not Found: {resource_type} with name {resource_name}")]
    NotFound {
        resource_type: String,
        resource_name: String,
    },

    /// Stale resource version on write.
    #[error("Conflict Error: {0}")]
    Conflict(String),

    #[error("State Transition Error: {0}")]
    StateTransition(String),

    #[error("Git Error: {0}")]
    Git(String),

    #[error("Helm Error: {0}")]
    Helm(String),

    #[error("Serialization Error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML Error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(resource_type: impl Into<String>, resource_name: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
        }
    }

    /// Errors that `retry_with_backoff` will try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientApi(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("Environment", "staging");
        assert_eq!(
            err.to_string(),
            "Resource Not Found: Environment with name staging"
        );
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(Error::TransientApi("503".to_string()).is_retryable());
        assert!(!Error::Conflict("stale".to_string()).is_retryable());
        assert!(!Error::Configuration("bad".to_string()).is_retryable());
    }
}
