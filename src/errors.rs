use serde::Serialize;
use thiserror::Error;

use crate::remote::RemoteError;

#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schema mismatch: {0}")]
    Schema(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Already in progress: {0}")]
    InProgress(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Network(_) | AppError::Database(_))
    }
}

// Implement From traits for common error types to simplify conversion

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::FileSystem(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {}", e))
    }
}

impl From<RemoteError> for AppError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Network(msg) => AppError::Network(msg),
            RemoteError::Auth(msg) => AppError::Auth(msg),
            RemoteError::NotFound(msg) => AppError::NotFound(msg),
            RemoteError::Schema(msg) => AppError::Schema(msg),
            RemoteError::InvalidResponse(msg) => {
                AppError::Network(format!("Invalid response: {}", msg))
            }
            RemoteError::Upload(msg) => AppError::Network(format!("Upload failed: {}", msg)),
        }
    }
}

/// A single failed item inside a batch operation.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure<K> {
    pub id: K,
    pub error: String,
}

/// Aggregate outcome of a batch operation. Both sets are always reported.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<S, K = S> {
    pub succeeded: Vec<S>,
    pub failed: Vec<ItemFailure<K>>,
}

impl<S, K> Default for BatchResult<S, K> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<S, K> BatchResult<S, K> {
    pub fn record_success(&mut self, item: S) {
        self.succeeded.push(item);
    }

    pub fn record_failure(&mut self, id: K, error: impl ToString) {
        self.failed.push(ItemFailure {
            id,
            error: error.to_string(),
        });
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_errors_keep_their_class() {
        let auth: AppError = RemoteError::Auth("bad key".to_string()).into();
        assert!(matches!(auth, AppError::Auth(_)));
        assert!(!auth.is_transient());

        let net: AppError = RemoteError::Network("timeout".to_string()).into();
        assert!(net.is_transient());
    }

    #[test]
    fn test_error_serializes_with_tag() {
        let json = serde_json::to_value(AppError::NotFound("v1".to_string())).unwrap();
        assert_eq!(json["type"], "NotFound");
        assert_eq!(json["message"], "v1");
    }

    #[test]
    fn test_batch_result_reports_both_sets() {
        let mut result: BatchResult<u32> = BatchResult::default();
        result.record_success(1);
        result.record_failure(2, "upload failed");
        result.record_success(3);

        assert_eq!(result.succeeded, vec![1, 3]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].id, 2);
        assert!(!result.is_complete_success());
    }
}
