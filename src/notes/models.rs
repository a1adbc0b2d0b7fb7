use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::attachments::models::Attachment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    #[default]
    Empty,
    Draft,
    Published,
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteStatus::Empty => "empty",
            NoteStatus::Draft => "draft",
            NoteStatus::Published => "published",
        }
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "empty" => Ok(NoteStatus::Empty),
            "draft" => Ok(NoteStatus::Draft),
            "published" => Ok(NoteStatus::Published),
            _ => Err(format!("Invalid note status: '{}'", s)),
        }
    }
}

/// A draft is addressed by the playlist it lives in and the version it annotates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DraftKey {
    pub playlist_local_id: String,
    pub version_id: String,
}

impl DraftKey {
    pub fn new(playlist_local_id: impl Into<String>, version_id: impl Into<String>) -> Self {
        Self {
            playlist_local_id: playlist_local_id.into(),
            version_id: version_id.into(),
        }
    }
}

impl fmt::Display for DraftKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.playlist_local_id, self.version_id)
    }
}

/// In-memory draft for one version.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Draft {
    pub content: String,
    pub label_id: Option<String>,
    pub status: NoteStatus,
    pub attachments: Vec<Attachment>,
    /// Server note created by the last successful publish.
    pub published_note_id: Option<String>,
}

impl Draft {
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    pub fn is_publishable(&self) -> bool {
        self.status != NoteStatus::Published && (self.has_content() || !self.attachments.is_empty())
    }
}

/// What gets written to `version_memberships` for a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftRecord {
    pub content: String,
    pub label_id: Option<String>,
    pub status: NoteStatus,
}

impl From<&Draft> for DraftRecord {
    fn from(draft: &Draft) -> Self {
        Self {
            content: draft.content.clone(),
            label_id: draft.label_id.clone(),
            status: draft.status,
        }
    }
}

/// Outcome of publishing one draft.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedNote {
    pub key: DraftKey,
    pub note_id: String,
    /// Attachments that failed to upload or link, with the reason.
    pub failed_attachments: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_status_str_round_trip() {
        for status in [NoteStatus::Empty, NoteStatus::Draft, NoteStatus::Published] {
            assert_eq!(status.as_str().parse::<NoteStatus>(), Ok(status));
        }
        assert!("archived".parse::<NoteStatus>().is_err());
    }

    #[test]
    fn test_publishable_requires_content_or_attachment() {
        let mut draft = Draft::default();
        assert!(!draft.is_publishable());

        draft.content = "   ".to_string();
        assert!(!draft.is_publishable());

        draft.content = "fix the edge".to_string();
        draft.status = NoteStatus::Draft;
        assert!(draft.is_publishable());

        draft.status = NoteStatus::Published;
        assert!(!draft.is_publishable());
    }
}
