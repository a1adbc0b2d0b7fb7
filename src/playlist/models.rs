use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::notes::models::NoteStatus;
use crate::remote::PlaylistKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalStatus {
    Draft,
    Synced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NotSynced,
    Synced,
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalStatus::Draft => write!(f, "draft"),
            LocalStatus::Synced => write!(f, "synced"),
        }
    }
}

impl FromStr for LocalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(LocalStatus::Draft),
            "synced" => Ok(LocalStatus::Synced),
            _ => Err(format!("Invalid local status: '{}'", s)),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::NotSynced => write!(f, "not_synced"),
            SyncStatus::Synced => write!(f, "synced"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_synced" => Ok(SyncStatus::NotSynced),
            "synced" => Ok(SyncStatus::Synced),
            _ => Err(format!("Invalid sync status: '{}'", s)),
        }
    }
}

/// Raw `playlists` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlaylistRow {
    pub local_id: String,
    pub remote_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub category: Option<String>,
    pub project_id: Option<String>,
    pub local_status: String,
    pub sync_status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub local_id: String,
    pub remote_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub kind: PlaylistKind,
    pub category: Option<String>,
    pub project_id: Option<String>,
    pub local_status: LocalStatus,
    pub sync_status: SyncStatus,
    /// Milliseconds since epoch.
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<PlaylistRow> for Playlist {
    type Error = String;

    fn try_from(row: PlaylistRow) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: row.kind.parse()?,
            local_status: row.local_status.parse()?,
            sync_status: row.sync_status.parse()?,
            local_id: row.local_id,
            remote_id: row.remote_id,
            name: row.name,
            description: row.description,
            category: row.category,
            project_id: row.project_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// One version's place in a playlist, plus its draft bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionMembership {
    pub playlist_local_id: String,
    pub version_id: String,
    pub display_name: String,
    pub version_number: i64,
    pub thumbnail_url: Option<String>,
    pub status_name: Option<String>,
    pub position: i64,
    pub manually_added: bool,
    pub is_removed: bool,
    pub draft_content: String,
    pub note_status: NoteStatus,
    pub label_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistDetails {
    pub playlist: Playlist,
    pub versions: Vec<VersionMembership>,
}
