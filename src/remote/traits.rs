use async_trait::async_trait;

use super::error::RemoteError;
use super::query::Query;
use super::types::{
    EntityRef, EntityType, NoteLabel, NoteRequest, PlaylistKind, RemoteNote, RemotePlaylist,
    RemoteVersion, StatusOption,
};

pub type RemoteResult<T> = Result<T, RemoteError>;

/// The production tracking server, the system of record for playlists,
/// versions and notes.
#[async_trait]
pub trait TrackingService: Send + Sync {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    /// Review sessions and lists, optionally scoped to a project.
    async fn fetch_playlists(&self, project_id: Option<&str>) -> RemoteResult<Vec<RemotePlaylist>>;

    async fn fetch_playlist_versions(
        &self,
        playlist: &RemotePlaylist,
    ) -> RemoteResult<Vec<RemoteVersion>>;

    /// Versions matching a typed query (see [`super::query`]).
    async fn search_versions(&self, query: &Query) -> RemoteResult<Vec<RemoteVersion>>;

    async fn get_version(&self, version_id: &str) -> RemoteResult<Option<RemoteVersion>>;

    async fn create_note(&self, request: &NoteRequest) -> RemoteResult<RemoteNote>;

    async fn create_playlist(
        &self,
        name: &str,
        project_id: Option<&str>,
        kind: PlaylistKind,
    ) -> RemoteResult<RemotePlaylist>;

    async fn add_version_to_playlist(
        &self,
        playlist: &RemotePlaylist,
        version_id: &str,
    ) -> RemoteResult<()>;

    async fn update_status(&self, entity: &EntityRef, status_id: &str) -> RemoteResult<()>;

    /// Store a binary payload remotely. Returns the component id.
    async fn upload_component(
        &self,
        name: &str,
        media_type: &str,
        bytes: Vec<u8>,
    ) -> RemoteResult<String>;

    /// Attach an uploaded component to a note as a reviewable.
    async fn link_component(&self, note_id: &str, component_id: &str) -> RemoteResult<()>;

    /// Statuses valid for `entity_type` under the project's workflow schema.
    async fn resolve_statuses(
        &self,
        entity_type: EntityType,
        project_id: &str,
    ) -> RemoteResult<Vec<StatusOption>>;

    async fn fetch_note_labels(&self) -> RemoteResult<Vec<NoteLabel>>;
}
