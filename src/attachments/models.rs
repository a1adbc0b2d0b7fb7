use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Revocable handle to a transient preview resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PreviewHandle(pub String);

impl fmt::Display for PreviewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentPayload {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

impl AttachmentPayload {
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        match self {
            AttachmentPayload::Bytes(bytes) => Ok(bytes.clone()),
            AttachmentPayload::Path(path) => tokio::fs::read(path).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    pub id: String,
    pub version_id: String,
    pub playlist_local_id: String,
    pub name: String,
    pub media_type: String,
    pub preview: Option<PreviewHandle>,
    #[serde(skip_serializing)]
    pub payload: AttachmentPayload,
    pub created_at: i64,
}
