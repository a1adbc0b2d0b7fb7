//! Scripted tracking server for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::remote::*;

pub fn remote_playlist(id: &str, name: &str, kind: PlaylistKind) -> RemotePlaylist {
    RemotePlaylist {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
        kind,
        category: None,
        project_id: Some("proj-1".to_string()),
        created_at: None,
    }
}

pub fn remote_version(id: &str, name: &str, number: i64) -> RemoteVersion {
    RemoteVersion {
        id: id.to_string(),
        name: name.to_string(),
        version_number: number,
        thumbnail_url: None,
        status_id: Some("st-pending".to_string()),
        status_name: Some("Pending Review".to_string()),
        project_id: Some("proj-1".to_string()),
    }
}

#[derive(Default)]
struct State {
    playlists: Vec<RemotePlaylist>,
    playlist_versions: HashMap<String, Vec<RemoteVersion>>,
    versions: HashMap<String, RemoteVersion>,
    statuses: Vec<StatusOption>,
    labels: Vec<NoteLabel>,
    notes: Vec<RemoteNote>,
    linked: Vec<(String, String)>,
    status_updates: Vec<(EntityRef, String)>,
    added_memberships: Vec<(String, String)>,
    failing_uploads: HashSet<String>,
    failing_notes: HashSet<String>,
    fetch_error: Option<RemoteError>,
    status_error: Option<RemoteError>,
    fetch_delay: Option<Duration>,
    scripted_versions: VecDeque<(Duration, Vec<RemoteVersion>)>,
    calls: HashMap<&'static str, usize>,
    next_id: usize,
}

#[derive(Default)]
pub struct MockTracker {
    state: Mutex<State>,
}

impl MockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_playlist(&self, playlist: RemotePlaylist, versions: Vec<RemoteVersion>) {
        let mut state = self.state.lock();
        for version in &versions {
            state.versions.insert(version.id.clone(), version.clone());
        }
        state.playlist_versions.insert(playlist.id.clone(), versions);
        state.playlists.push(playlist);
    }

    pub fn set_playlists(&self, playlists: Vec<RemotePlaylist>) {
        self.state.lock().playlists = playlists;
    }

    pub fn add_version(&self, version: RemoteVersion) {
        self.state.lock().versions.insert(version.id.clone(), version);
    }

    pub fn set_statuses(&self, statuses: Vec<StatusOption>) {
        self.state.lock().statuses = statuses;
    }

    pub fn set_status_error(&self, error: Option<RemoteError>) {
        self.state.lock().status_error = error;
    }

    pub fn set_labels(&self, labels: Vec<NoteLabel>) {
        self.state.lock().labels = labels;
    }

    pub fn set_fetch_error(&self, error: Option<RemoteError>) {
        self.state.lock().fetch_error = error;
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state.lock().fetch_delay = Some(delay);
    }

    /// Queue one answer for the next `fetch_playlist_versions` call,
    /// delivered after `delay`.
    pub fn script_versions(&self, delay: Duration, versions: Vec<RemoteVersion>) {
        self.state.lock().scripted_versions.push_back((delay, versions));
    }

    pub fn fail_upload_named(&self, name: &str) {
        self.state.lock().failing_uploads.insert(name.to_string());
    }

    pub fn fail_note_for(&self, version_id: &str) {
        self.state.lock().failing_notes.insert(version_id.to_string());
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    pub fn notes(&self) -> Vec<RemoteNote> {
        self.state.lock().notes.clone()
    }

    pub fn linked_components(&self, note_id: &str) -> Vec<String> {
        self.state
            .lock()
            .linked
            .iter()
            .filter(|(n, _)| n == note_id)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn status_updates(&self) -> Vec<(EntityRef, String)> {
        self.state.lock().status_updates.clone()
    }

    pub fn added_memberships(&self) -> Vec<(String, String)> {
        self.state.lock().added_memberships.clone()
    }

    fn record(&self, method: &'static str) {
        *self.state.lock().calls.entry(method).or_insert(0) += 1;
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }
}

#[async_trait]
impl TrackingService for MockTracker {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_playlists(&self, project_id: Option<&str>) -> RemoteResult<Vec<RemotePlaylist>> {
        self.record("fetch_playlists");
        let delay = self.state.lock().fetch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        if let Some(err) = &state.fetch_error {
            return Err(err.clone());
        }
        Ok(state
            .playlists
            .iter()
            .filter(|p| project_id.is_none() || p.project_id.as_deref() == project_id)
            .cloned()
            .collect())
    }

    async fn fetch_playlist_versions(
        &self,
        playlist: &RemotePlaylist,
    ) -> RemoteResult<Vec<RemoteVersion>> {
        self.record("fetch_playlist_versions");
        let scripted = self.state.lock().scripted_versions.pop_front();
        if let Some((delay, versions)) = scripted {
            tokio::time::sleep(delay).await;
            return Ok(versions);
        }

        let state = self.state.lock();
        if let Some(err) = &state.fetch_error {
            return Err(err.clone());
        }
        Ok(state
            .playlist_versions
            .get(&playlist.id)
            .cloned()
            .unwrap_or_default())
    }

    async fn search_versions(&self, _query: &Query) -> RemoteResult<Vec<RemoteVersion>> {
        self.record("search_versions");
        let state = self.state.lock();
        let mut versions: Vec<RemoteVersion> = state.versions.values().cloned().collect();
        versions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(versions)
    }

    async fn get_version(&self, version_id: &str) -> RemoteResult<Option<RemoteVersion>> {
        self.record("get_version");
        Ok(self.state.lock().versions.get(version_id).cloned())
    }

    async fn create_note(&self, request: &NoteRequest) -> RemoteResult<RemoteNote> {
        self.record("create_note");
        if self.state.lock().failing_notes.contains(&request.version_id) {
            return Err(RemoteError::Network("note rejected".to_string()));
        }
        tokio::task::yield_now().await;
        let note = RemoteNote {
            id: self.next_id("note"),
            version_id: request.version_id.clone(),
            content: request.content.clone(),
            label_id: request.label_id.clone(),
        };
        self.state.lock().notes.push(note.clone());
        Ok(note)
    }

    async fn create_playlist(
        &self,
        name: &str,
        project_id: Option<&str>,
        kind: PlaylistKind,
    ) -> RemoteResult<RemotePlaylist> {
        self.record("create_playlist");
        let mut playlist = remote_playlist(&self.next_id("remote-pl"), name, kind);
        playlist.project_id = project_id.map(str::to_string);
        self.state.lock().playlists.push(playlist.clone());
        Ok(playlist)
    }

    async fn add_version_to_playlist(
        &self,
        playlist: &RemotePlaylist,
        version_id: &str,
    ) -> RemoteResult<()> {
        self.record("add_version_to_playlist");
        self.state
            .lock()
            .added_memberships
            .push((playlist.id.clone(), version_id.to_string()));
        Ok(())
    }

    async fn update_status(&self, entity: &EntityRef, status_id: &str) -> RemoteResult<()> {
        self.record("update_status");
        let mut state = self.state.lock();
        let name = state
            .statuses
            .iter()
            .find(|s| s.id == status_id)
            .map(|s| s.name.clone());
        if let Some(version) = state.versions.get_mut(&entity.id) {
            version.status_id = Some(status_id.to_string());
            version.status_name = name;
        }
        state
            .status_updates
            .push((entity.clone(), status_id.to_string()));
        Ok(())
    }

    async fn upload_component(
        &self,
        name: &str,
        _media_type: &str,
        _bytes: Vec<u8>,
    ) -> RemoteResult<String> {
        self.record("upload_component");
        if self.state.lock().failing_uploads.contains(name) {
            return Err(RemoteError::Upload(format!("{} rejected", name)));
        }
        Ok(self.next_id("component"))
    }

    async fn link_component(&self, note_id: &str, component_id: &str) -> RemoteResult<()> {
        self.record("link_component");
        self.state
            .lock()
            .linked
            .push((note_id.to_string(), component_id.to_string()));
        Ok(())
    }

    async fn resolve_statuses(
        &self,
        _entity_type: EntityType,
        _project_id: &str,
    ) -> RemoteResult<Vec<StatusOption>> {
        self.record("resolve_statuses");
        tokio::task::yield_now().await;
        let state = self.state.lock();
        match &state.status_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.statuses.clone()),
        }
    }

    async fn fetch_note_labels(&self) -> RemoteResult<Vec<NoteLabel>> {
        self.record("fetch_note_labels");
        Ok(self.state.lock().labels.clone())
    }
}
