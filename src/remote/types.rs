use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistKind {
    /// A scheduled review session.
    Session,
    /// A plain version list.
    List,
}

impl fmt::Display for PlaylistKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaylistKind::Session => write!(f, "session"),
            PlaylistKind::List => write!(f, "list"),
        }
    }
}

impl FromStr for PlaylistKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "session" => Ok(PlaylistKind::Session),
            "list" => Ok(PlaylistKind::List),
            _ => Err(format!("Invalid playlist kind: '{}'. Valid: session, list", s)),
        }
    }
}

/// Server-side entity types this client reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    AssetVersion,
    ReviewSession,
    AssetVersionList,
    ReviewSessionObject,
    Note,
    NoteLabel,
    NoteComponent,
    NoteLabelLink,
    ListObject,
    FileComponent,
    ComponentLocation,
    Status,
    Project,
    Task,
    Shot,
    User,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::AssetVersion => "AssetVersion",
            EntityType::ReviewSession => "ReviewSession",
            EntityType::AssetVersionList => "AssetVersionList",
            EntityType::ReviewSessionObject => "ReviewSessionObject",
            EntityType::Note => "Note",
            EntityType::NoteLabel => "NoteLabel",
            EntityType::NoteComponent => "NoteComponent",
            EntityType::NoteLabelLink => "NoteLabelLink",
            EntityType::ListObject => "ListObject",
            EntityType::FileComponent => "FileComponent",
            EntityType::ComponentLocation => "ComponentLocation",
            EntityType::Status => "Status",
            EntityType::Project => "Project",
            EntityType::Task => "Task",
            EntityType::Shot => "Shot",
            EntityType::User => "User",
        }
    }

    pub fn for_playlist(kind: PlaylistKind) -> Self {
        match kind {
            PlaylistKind::Session => EntityType::ReviewSession,
            PlaylistKind::List => EntityType::AssetVersionList,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed pointer at a single server entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }

    pub fn version(id: impl Into<String>) -> Self {
        Self::new(EntityType::AssetVersion, id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePlaylist {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: PlaylistKind,
    pub category: Option<String>,
    pub project_id: Option<String>,
    /// Seconds since epoch, when the server reports it.
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteVersion {
    pub id: String,
    pub name: String,
    pub version_number: i64,
    pub thumbnail_url: Option<String>,
    pub status_id: Option<String>,
    pub status_name: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteNote {
    pub id: String,
    pub version_id: String,
    pub content: String,
    pub label_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRequest {
    pub version_id: String,
    pub content: String,
    pub label_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOption {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteLabel {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
}

/// Criteria for a version search. Rendered through the typed query builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionSearch {
    pub project_id: Option<String>,
    pub name_contains: Option<String>,
    pub status_names: Vec<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
