use serde::Serialize;
use thiserror::Error;

/// Failures talking to the tracking server.
///
/// `Clone` so one failed coalesced request can be handed to every waiter.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "message")]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schema mismatch: {0}")]
    Schema(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Upload failed: {0}")]
    Upload(String),
}

impl RemoteError {
    /// Retryable; local data should stay as it is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Network(_) | RemoteError::InvalidResponse(_) | RemoteError::Upload(_)
        )
    }

    /// Nothing will work until the settings are fixed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RemoteError::Auth(_))
    }

    /// The query should be answered with an empty result instead.
    pub fn is_degradable(&self) -> bool {
        matches!(self, RemoteError::NotFound(_) | RemoteError::Schema(_))
    }

    /// Map a server-side exception payload onto the error taxonomy.
    pub fn from_exception(exception: &str, content: &str) -> Self {
        let lowered = content.to_lowercase();
        match exception {
            "AuthenticationError" | "PermissionError" | "PermissionDeniedError" => {
                RemoteError::Auth(content.to_string())
            }
            "NotFoundError" | "NoResultFoundError" => RemoteError::NotFound(content.to_string()),
            "SchemaError" | "InvalidSchemaError" => RemoteError::Schema(content.to_string()),
            _ if lowered.contains("not found") || lowered.contains("does not exist") => {
                RemoteError::NotFound(content.to_string())
            }
            _ if lowered.contains("schema") || lowered.contains("no attribute") => {
                RemoteError::Schema(content.to_string())
            }
            _ => RemoteError::InvalidResponse(format!("{}: {}", exception, content)),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        match err.status().map(|s| s.as_u16()) {
            Some(401) | Some(403) => RemoteError::Auth(err.to_string()),
            Some(404) => RemoteError::NotFound(err.to_string()),
            _ => RemoteError::Network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::InvalidResponse(err.to_string())
    }
}
