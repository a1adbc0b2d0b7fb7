//! One signed-in session: the local store, the tracking server connection
//! and every cache and manager built on top of them.
//!
//! All session state is owned here and handed to components by reference.
//! [`Session::reset`] is the single teardown path for settings changes and
//! logout.

use parking_lot::RwLock;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::attachments::AttachmentManager;
use crate::cache::{spawn_cache_invalidator, RemoteCaches};
use crate::config::{Settings, DRAFT_DEBOUNCE, EVENT_BUS_CAPACITY};
use crate::database::DatabaseManager;
use crate::errors::{AppError, BatchResult, ItemFailure};
use crate::events::{ChangeReason, EntityKind, EventBus, InvalidationEvent};
use crate::identity::IdentityResolver;
use crate::notes::{DraftKey, DraftManager, PublishedNote};
use crate::playlist::{Playlist, PlaylistDetails, PlaylistManager, Reconciler, VersionMembership};
use crate::remote::{
    EntityType, HttpTracker, NoteLabel, PlaylistKind, RemotePlaylist, RemoteVersion, StatusOption,
    TrackingService, VersionSearch,
};
use crate::versions::VersionService;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub playlists: usize,
    pub playlists_inserted: usize,
    pub playlists_refreshed: usize,
    pub duplicates_removed: usize,
    pub versions_inserted: usize,
    pub versions_updated: usize,
    /// Playlists whose versions could not be fetched, by remote id.
    pub failed: Vec<ItemFailure<String>>,
    /// A newer refresh landed first; nothing from this one was applied.
    pub discarded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedPlaylist {
    pub playlist: Playlist,
    /// Version ids pushed to the server playlist.
    pub memberships: BatchResult<String>,
}

pub struct Session {
    settings: RwLock<Settings>,
    remote: RwLock<Arc<dyn TrackingService>>,
    pool: Pool<Sqlite>,
    bus: EventBus,
    caches: Arc<RemoteCaches>,
    identity: Arc<IdentityResolver>,
    playlists: Arc<PlaylistManager>,
    attachments: Arc<AttachmentManager>,
    drafts: DraftManager,
    versions: VersionService,
    reconciler: Reconciler,
    refresh_ticket: AtomicU64,
    applied_ticket: AtomicU64,
    /// Held while a refresh writes, so applies never interleave.
    apply_lock: tokio::sync::Mutex<()>,
    invalidator: JoinHandle<()>,
}

impl Session {
    /// Open a session against the real tracking server.
    pub async fn connect(db: DatabaseManager, settings: Settings) -> Result<Self, AppError> {
        settings.validate()?;
        let remote: Arc<dyn TrackingService> = Arc::new(HttpTracker::new(&settings)?);
        Self::open(db, settings, remote).await
    }

    /// Wire every component over `db` and `remote`, then load stored drafts.
    pub async fn open(
        db: DatabaseManager,
        settings: Settings,
        remote: Arc<dyn TrackingService>,
    ) -> Result<Self, AppError> {
        let pool = db.pool;
        let bus = EventBus::new(EVENT_BUS_CAPACITY);
        let caches = Arc::new(RemoteCaches::new());
        let invalidator = spawn_cache_invalidator(&bus, caches.clone());

        let identity = Arc::new(IdentityResolver::new(pool.clone()));
        let playlists = Arc::new(PlaylistManager::new(pool.clone()));
        let attachments = Arc::new(AttachmentManager::new(pool.clone()));
        let drafts = DraftManager::new(playlists.clone(), attachments.clone(), bus.clone(), DRAFT_DEBOUNCE);
        let versions = VersionService::new(caches.clone(), bus.clone());
        let reconciler = Reconciler::new(playlists.clone(), identity.clone());

        let session = Self {
            settings: RwLock::new(settings),
            remote: RwLock::new(remote),
            pool,
            bus,
            caches,
            identity,
            playlists,
            attachments,
            drafts,
            versions,
            reconciler,
            refresh_ticket: AtomicU64::new(0),
            applied_ticket: AtomicU64::new(0),
            apply_lock: tokio::sync::Mutex::new(()),
            invalidator,
        };
        session.drafts.hydrate().await?;
        log::info!("Session opened against {}", session.remote().name());
        Ok(session)
    }

    pub fn remote(&self) -> Arc<dyn TrackingService> {
        self.remote.read().clone()
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn drafts(&self) -> &DraftManager {
        &self.drafts
    }

    pub fn attachments(&self) -> &AttachmentManager {
        &self.attachments
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Pull playlists and their versions from the server and merge them into
    /// the local mirror. A failed fetch leaves stored data untouched.
    pub async fn refresh(&self, project_id: Option<&str>) -> Result<RefreshReport, AppError> {
        let ticket = self.refresh_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let remote = self.remote();
        log::info!("Refreshing playlists from {} (#{})", remote.name(), ticket);

        let fetched = match remote.fetch_playlists(project_id).await {
            Ok(playlists) => playlists,
            Err(e) => {
                log::warn!("Refresh #{} failed, keeping stored playlists: {}", ticket, e);
                return Err(e.into());
            }
        };

        let mut report = RefreshReport {
            playlists: fetched.len(),
            ..RefreshReport::default()
        };
        let mut contents: Vec<(&RemotePlaylist, Vec<RemoteVersion>)> = Vec::with_capacity(fetched.len());
        for playlist in &fetched {
            match remote.fetch_playlist_versions(playlist).await {
                Ok(versions) => contents.push((playlist, versions)),
                Err(e) if e.is_degradable() => {
                    log::warn!("Versions of playlist {} unavailable: {}", playlist.id, e);
                    contents.push((playlist, Vec::new()));
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    log::warn!("Could not fetch versions of playlist {}: {}", playlist.id, e);
                    report.failed.push(ItemFailure {
                        id: playlist.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        // Results from an older refresh must not land after a newer one
        let _applying = self.apply_lock.lock().await;
        let previous = self.applied_ticket.fetch_max(ticket, Ordering::SeqCst);
        if previous > ticket {
            log::info!("Refresh #{} superseded by #{}, discarding", ticket, previous);
            report.discarded = true;
            return Ok(report);
        }

        let outcome = self.reconciler.reconcile(&fetched).await?;
        report.playlists_inserted = outcome.inserted.len();
        report.playlists_refreshed = outcome.refreshed.len();
        report.duplicates_removed = outcome.duplicates_removed;

        for local_id in outcome.inserted.iter().chain(&outcome.refreshed) {
            self.bus.emit(InvalidationEvent::new(
                EntityKind::Playlist,
                local_id.as_str(),
                ChangeReason::Synced,
            ));
        }

        // Workflow schemas are re-read for every project the server listed
        let projects: BTreeSet<&str> = fetched.iter().filter_map(|p| p.project_id.as_deref()).collect();
        for project_id in projects {
            self.bus
                .emit(InvalidationEvent::new(EntityKind::Status, project_id, ChangeReason::Synced));
        }

        for (playlist, versions) in contents {
            let Some(local) = outcome
                .playlists
                .iter()
                .find(|p| p.remote_id.as_deref() == Some(playlist.id.as_str()))
            else {
                continue;
            };
            if self.is_superseded(ticket) {
                log::info!("Refresh #{} superseded while applying, stopping", ticket);
                report.discarded = true;
                return Ok(report);
            }
            let merged = self.reconciler.reconcile_versions(&local.local_id, &versions).await?;
            report.versions_inserted += merged.inserted.len();
            report.versions_updated += merged.updated.len();
            for version_id in &merged.updated {
                self.bus.emit(InvalidationEvent::new(
                    EntityKind::Version,
                    version_id.as_str(),
                    ChangeReason::Synced,
                ));
            }
        }

        log::info!(
            "Refresh #{} done: {} playlists ({} new, {} updated, {} duplicates removed), {} new versions, {} failed",
            ticket,
            report.playlists,
            report.playlists_inserted,
            report.playlists_refreshed,
            report.duplicates_removed,
            report.versions_inserted,
            report.failed.len()
        );
        Ok(report)
    }

    pub async fn list_playlists(&self) -> Result<Vec<Playlist>, AppError> {
        self.playlists.get_playlists().await
    }

    pub async fn playlist_details(&self, local_id: &str) -> Result<PlaylistDetails, AppError> {
        self.playlists.get_playlist_details(local_id).await
    }

    pub async fn list_versions(
        &self,
        local_id: &str,
        include_removed: bool,
    ) -> Result<Vec<VersionMembership>, AppError> {
        self.playlists.list_versions(local_id, include_removed).await
    }

    pub async fn create_local_playlist(
        &self,
        name: &str,
        kind: PlaylistKind,
        category: Option<String>,
        project_id: Option<String>,
    ) -> Result<Playlist, AppError> {
        let playlist = self.playlists.create_playlist(name, kind, category, project_id).await?;
        self.emit_playlist(&playlist.local_id, ChangeReason::Changed);
        log::info!("Created local playlist '{}' ({})", playlist.name, playlist.local_id);
        Ok(playlist)
    }

    pub async fn rename_playlist(&self, local_id: &str, name: &str) -> Result<(), AppError> {
        self.playlists.rename_playlist(local_id, name).await?;
        self.emit_playlist(local_id, ChangeReason::Changed);
        Ok(())
    }

    /// Remove a playlist with its memberships, drafts and attachments.
    pub async fn delete_playlist(&self, local_id: &str) -> Result<bool, AppError> {
        self.drafts.forget_playlist(local_id);
        let deleted = self.playlists.delete_playlist(local_id).await?;
        if deleted {
            self.emit_playlist(local_id, ChangeReason::Deleted);
        }
        Ok(deleted)
    }

    /// Create a local-only playlist on the server and push its versions.
    /// Already published playlists are returned unchanged.
    pub async fn publish_local_playlist(&self, local_id: &str) -> Result<PublishedPlaylist, AppError> {
        let playlist = self
            .playlists
            .get_playlist(local_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Playlist {}", local_id)))?;
        if playlist.remote_id.is_some() {
            return Ok(PublishedPlaylist {
                playlist,
                memberships: BatchResult::default(),
            });
        }

        let remote = self.remote();
        let created = remote
            .create_playlist(&playlist.name, playlist.project_id.as_deref(), playlist.kind)
            .await?;
        let bound = self
            .identity
            .link(EntityKind::Playlist, &created.id, local_id)
            .await?;
        if bound != local_id {
            return Err(AppError::Internal(format!(
                "Remote playlist {} is already bound to {}",
                created.id, bound
            )));
        }
        self.playlists.attach_remote_id(local_id, &created.id).await?;

        let mut memberships = BatchResult::default();
        for membership in self.playlists.list_versions(local_id, false).await? {
            match remote.add_version_to_playlist(&created, &membership.version_id).await {
                Ok(()) => memberships.record_success(membership.version_id),
                Err(e) => {
                    log::warn!(
                        "Could not add version {} to remote playlist {}: {}",
                        membership.version_id,
                        created.id,
                        e
                    );
                    memberships.record_failure(membership.version_id, e);
                }
            }
        }

        self.emit_playlist(local_id, ChangeReason::Published);
        log::info!(
            "Published playlist {} as {} ({} versions, {} failed)",
            local_id,
            created.id,
            memberships.succeeded.len(),
            memberships.failed.len()
        );

        let playlist = self
            .playlists
            .get_playlist(local_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Playlist {}", local_id)))?;
        Ok(PublishedPlaylist { playlist, memberships })
    }

    pub async fn add_version_manually(
        &self,
        playlist_local_id: &str,
        version_id: &str,
    ) -> Result<VersionMembership, AppError> {
        let version = self
            .versions
            .version_details(self.remote(), version_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Version {}", version_id)))?;
        let membership = self.playlists.add_version_manually(playlist_local_id, &version).await?;
        self.emit_playlist(playlist_local_id, ChangeReason::Changed);
        Ok(membership)
    }

    pub async fn remove_version(&self, key: &DraftKey) -> Result<bool, AppError> {
        let removed = self.playlists.remove_version(key).await?;
        if removed {
            self.emit_playlist(&key.playlist_local_id, ChangeReason::Changed);
        }
        Ok(removed)
    }

    pub async fn restore_version(&self, key: &DraftKey) -> Result<bool, AppError> {
        let restored = self.playlists.restore_version(key).await?;
        if restored {
            self.emit_playlist(&key.playlist_local_id, ChangeReason::Changed);
        }
        Ok(restored)
    }

    pub async fn search_versions(&self, search: &VersionSearch) -> Result<Vec<RemoteVersion>, AppError> {
        self.versions.search(self.remote(), search).await
    }

    pub async fn version_details(&self, version_id: &str) -> Result<Option<RemoteVersion>, AppError> {
        self.versions.version_details(self.remote(), version_id).await
    }

    pub async fn statuses_for(
        &self,
        entity_type: EntityType,
        project_id: &str,
    ) -> Result<Vec<StatusOption>, AppError> {
        self.versions.statuses_for(self.remote(), entity_type, project_id).await
    }

    pub async fn note_labels(&self) -> Result<Vec<NoteLabel>, AppError> {
        self.versions.note_labels(self.remote()).await
    }

    /// Set a version's status on the server and mirror the new status name
    /// on every stored membership of that version.
    pub async fn update_status(
        &self,
        version_id: &str,
        status_id: &str,
        project_id: Option<&str>,
    ) -> Result<(), AppError> {
        let remote = self.remote();
        self.versions.update_status(remote.as_ref(), version_id, status_id).await?;

        let status_name = match project_id {
            Some(project) => self
                .versions
                .statuses_for(remote, EntityType::AssetVersion, project)
                .await?
                .into_iter()
                .find(|s| s.id == status_id)
                .map(|s| s.name),
            None => None,
        };
        if let Some(name) = status_name {
            self.playlists.set_version_status_name(version_id, Some(&name)).await?;
        }
        Ok(())
    }

    pub async fn publish(&self, key: &DraftKey) -> Result<PublishedNote, AppError> {
        self.drafts.publish(self.remote().as_ref(), key).await
    }

    pub async fn publish_selected(&self) -> BatchResult<PublishedNote, DraftKey> {
        self.drafts.publish_selected(self.remote().as_ref()).await
    }

    /// Switch to new connection settings. Queued draft edits are written
    /// first, then every cache and in-memory state is rebuilt.
    pub async fn apply_settings(&self, settings: Settings) -> Result<(), AppError> {
        settings.validate()?;
        let remote: Arc<dyn TrackingService> = Arc::new(HttpTracker::new(&settings)?);
        self.replace_remote(settings, remote).await
    }

    /// Swap the tracking server connection and reset all session state.
    pub async fn replace_remote(&self, settings: Settings, remote: Arc<dyn TrackingService>) -> Result<(), AppError> {
        self.drafts.flush_pending().await;
        *self.settings.write() = settings;
        *self.remote.write() = remote;
        self.reset();
        self.bus.emit(InvalidationEvent::new(
            EntityKind::Settings,
            "settings",
            ChangeReason::Changed,
        ));
        self.drafts.hydrate().await?;
        Ok(())
    }

    /// Drop caches, queued writes and in-memory drafts. Refreshes still in
    /// flight will be discarded when they finish.
    pub fn reset(&self) {
        let ticket = self.refresh_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        self.applied_ticket.fetch_max(ticket, Ordering::SeqCst);
        self.caches.reset();
        self.drafts.reset();
        log::info!("Session state reset");
    }

    /// Write out anything still queued. Call before exit.
    pub async fn shutdown(&self) -> BatchResult<DraftKey> {
        let flushed = self.drafts.flush_pending().await;
        if !flushed.is_complete_success() {
            log::error!("{} drafts could not be saved on shutdown", flushed.failed.len());
        }
        flushed
    }

    fn is_superseded(&self, ticket: u64) -> bool {
        self.applied_ticket.load(Ordering::SeqCst) > ticket
    }

    fn emit_playlist(&self, local_id: &str, reason: ChangeReason) {
        self.bus
            .emit(InvalidationEvent::new(EntityKind::Playlist, local_id, reason));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.invalidator.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::NoteStatus;
    use crate::remote::RemoteError;
    use crate::test_support::{remote_playlist, remote_version, MockTracker};
    use std::time::Duration;

    async fn session_with(tracker: Arc<MockTracker>) -> Session {
        let db = DatabaseManager::in_memory().await.unwrap();
        Session::open(db, Settings::new("https://example.test", "reviewer", "key"), tracker)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_refresh_mirrors_remote_playlists() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_playlist(
            remote_playlist("rs-1", "Comp dailies", PlaylistKind::Session),
            vec![remote_version("v-1", "sh010", 1), remote_version("v-2", "sh020", 3)],
        );
        let session = session_with(tracker.clone()).await;

        let report = session.refresh(None).await.unwrap();
        assert_eq!(report.playlists_inserted, 1);
        assert_eq!(report.versions_inserted, 2);

        let playlists = session.list_playlists().await.unwrap();
        assert_eq!(playlists.len(), 1);
        let details = session.playlist_details(&playlists[0].local_id).await.unwrap();
        assert_eq!(details.versions.len(), 2);

        let again = session.refresh(None).await.unwrap();
        assert_eq!(again.playlists_inserted, 0);
        assert_eq!(again.versions_inserted, 0);
        assert_eq!(session.list_playlists().await.unwrap(), playlists);
    }

    #[tokio::test]
    async fn test_playlist_dropped_by_server_stays_local() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_playlist(remote_playlist("rs-1", "Comp", PlaylistKind::List), vec![]);
        let session = session_with(tracker.clone()).await;
        session.refresh(None).await.unwrap();

        tracker.set_playlists(vec![]);
        let report = session.refresh(None).await.unwrap();
        assert_eq!(report.playlists, 0);
        assert_eq!(session.list_playlists().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_keep_one_row() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_playlist(remote_playlist("rs-1", "Anim", PlaylistKind::List), vec![]);
        let session = session_with(tracker).await;

        let (a, b, c) = tokio::join!(session.refresh(None), session.refresh(None), session.refresh(None));
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(session.list_playlists().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stored_data() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_playlist(remote_playlist("rs-1", "Comp", PlaylistKind::List), vec![]);
        let session = session_with(tracker.clone()).await;
        session.refresh(None).await.unwrap();

        tracker.set_fetch_error(Some(RemoteError::Network("offline".to_string())));
        let result = session.refresh(None).await;
        assert!(matches!(result, Err(AppError::Network(_))));
        assert_eq!(session.list_playlists().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_refresh_is_discarded() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_playlist(remote_playlist("rs-1", "Comp", PlaylistKind::List), vec![]);
        tracker.set_fetch_delay(Duration::from_millis(50));
        let session = session_with(tracker.clone()).await;

        let slow = session.refresh(None);
        let reset = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.reset();
        };
        let (report, ()) = tokio::join!(slow, reset);

        assert!(report.unwrap().discarded);
        assert!(session.list_playlists().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_older_refresh_finishing_last_is_discarded() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_playlist(remote_playlist("rs-1", "Comp", PlaylistKind::List), vec![]);
        let stale = remote_version("v-1", "sh010", 1);
        let mut fresh = remote_version("v-1", "sh010", 1);
        fresh.status_name = Some("Approved".to_string());
        tracker.script_versions(Duration::from_millis(80), vec![stale]);
        tracker.script_versions(Duration::ZERO, vec![fresh]);
        let session = session_with(tracker.clone()).await;

        let older = session.refresh(None);
        let newer = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            session.refresh(None).await
        };
        let (older, newer) = tokio::join!(older, newer);

        assert!(!newer.unwrap().discarded);
        assert!(older.unwrap().discarded);
        let local_id = session.list_playlists().await.unwrap()[0].local_id.clone();
        let versions = session.list_versions(&local_id, false).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].status_name.as_deref(), Some("Approved"));
    }

    #[tokio::test]
    async fn test_refresh_invalidates_workflow_statuses() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_playlist(remote_playlist("rs-1", "Comp", PlaylistKind::List), vec![]);
        let session = session_with(tracker.clone()).await;
        let mut events = session.events().subscribe();

        session.statuses_for(EntityType::AssetVersion, "proj-1").await.unwrap();
        session.statuses_for(EntityType::AssetVersion, "proj-1").await.unwrap();
        assert_eq!(tracker.calls("resolve_statuses"), 1);

        session.refresh(None).await.unwrap();
        loop {
            let event = events.recv().await.unwrap();
            if event.entity_kind == EntityKind::Status {
                assert_eq!(event.entity_id, "proj-1");
                break;
            }
        }
        // Let the invalidator task drain the bus
        tokio::time::sleep(Duration::from_millis(20)).await;

        session.statuses_for(EntityType::AssetVersion, "proj-1").await.unwrap();
        assert_eq!(tracker.calls("resolve_statuses"), 2);
    }

    #[tokio::test]
    async fn test_publish_local_playlist_binds_identity() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_version(remote_version("v-1", "sh010", 1));
        let session = session_with(tracker.clone()).await;

        let local = session
            .create_local_playlist("Client picks", PlaylistKind::List, None, Some("proj-1".to_string()))
            .await
            .unwrap();
        session.add_version_manually(&local.local_id, "v-1").await.unwrap();

        let published = session.publish_local_playlist(&local.local_id).await.unwrap();
        let remote_id = published.playlist.remote_id.clone().unwrap();
        assert_eq!(published.memberships.succeeded, vec!["v-1".to_string()]);
        assert_eq!(tracker.added_memberships(), vec![(remote_id.clone(), "v-1".to_string())]);

        // The server now lists it; refreshing must not create a second row
        session.refresh(None).await.unwrap();
        let rows = session.list_playlists().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].local_id, local.local_id);
        assert_eq!(rows[0].remote_id.as_deref(), Some(remote_id.as_str()));
    }

    #[tokio::test]
    async fn test_refresh_preserves_manual_versions_and_drafts() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_playlist(
            remote_playlist("rs-1", "Lighting", PlaylistKind::Session),
            vec![remote_version("v-1", "sh010", 1)],
        );
        tracker.add_version(remote_version("v-9", "extra", 2));
        let session = session_with(tracker).await;
        session.refresh(None).await.unwrap();
        let local_id = session.list_playlists().await.unwrap()[0].local_id.clone();

        session.add_version_manually(&local_id, "v-9").await.unwrap();
        let key = DraftKey::new(&local_id, "v-1");
        session.drafts().save_content(&key, "warmer key light");
        session.drafts().flush_pending().await;

        session.refresh(None).await.unwrap();
        let versions = session.list_versions(&local_id, false).await.unwrap();
        assert_eq!(versions.len(), 2);
        let v1 = versions.iter().find(|m| m.version_id == "v-1").unwrap();
        assert_eq!(v1.draft_content, "warmer key light");
        assert_eq!(v1.note_status, NoteStatus::Draft);
    }

    #[tokio::test]
    async fn test_update_status_updates_memberships() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_playlist(
            remote_playlist("rs-1", "Comp", PlaylistKind::Session),
            vec![remote_version("v-1", "sh010", 1)],
        );
        tracker.set_statuses(vec![StatusOption {
            id: "st-ok".to_string(),
            name: "Approved".to_string(),
            color: None,
        }]);
        let session = session_with(tracker.clone()).await;
        session.refresh(None).await.unwrap();
        let local_id = session.list_playlists().await.unwrap()[0].local_id.clone();

        session.update_status("v-1", "st-ok", Some("proj-1")).await.unwrap();

        let versions = session.list_versions(&local_id, false).await.unwrap();
        assert_eq!(versions[0].status_name.as_deref(), Some("Approved"));
        assert_eq!(tracker.status_updates().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_remote_flushes_and_rehydrates() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_playlist(
            remote_playlist("rs-1", "Comp", PlaylistKind::Session),
            vec![remote_version("v-1", "sh010", 1)],
        );
        let session = session_with(tracker.clone()).await;
        session.refresh(None).await.unwrap();
        let local_id = session.list_playlists().await.unwrap()[0].local_id.clone();
        let key = DraftKey::new(&local_id, "v-1");
        session.drafts().save_content(&key, "unsaved edit");

        let next = Arc::new(MockTracker::new());
        session
            .replace_remote(Settings::new("https://other.test", "reviewer", "key2"), next)
            .await
            .unwrap();

        assert_eq!(session.settings().server_url, "https://other.test");
        assert_eq!(session.drafts().draft(&key).content, "unsaved edit");
        assert_eq!(session.drafts().pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_delete_playlist_drops_everything() {
        let tracker = Arc::new(MockTracker::new());
        tracker.add_playlist(
            remote_playlist("rs-1", "Comp", PlaylistKind::Session),
            vec![remote_version("v-1", "sh010", 1)],
        );
        let session = session_with(tracker).await;
        session.refresh(None).await.unwrap();
        let local_id = session.list_playlists().await.unwrap()[0].local_id.clone();
        let key = DraftKey::new(&local_id, "v-1");
        session.drafts().save_content(&key, "gone soon");

        assert!(session.delete_playlist(&local_id).await.unwrap());
        assert!(session.list_playlists().await.unwrap().is_empty());
        assert_eq!(session.drafts().status(&key), NoteStatus::Empty);
        assert_eq!(session.drafts().pending_writes(), 0);
    }
}
