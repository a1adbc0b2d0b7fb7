use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::debounce::{DraftPersister, DraftStore};
use super::models::{Draft, DraftKey, DraftRecord, NoteStatus, PublishedNote};
use super::state;
use crate::attachments::{Attachment, AttachmentManager, AttachmentPayload};
use crate::errors::{AppError, BatchResult};
use crate::events::{ChangeReason, EntityKind, EventBus, InvalidationEvent};
use crate::playlist::PlaylistManager;
use crate::remote::{NoteRequest, TrackingService};

#[async_trait]
impl DraftStore for PlaylistManager {
    async fn persist(&self, key: &DraftKey, record: &DraftRecord) -> Result<(), AppError> {
        if !self.save_draft(key, record).await? {
            log::warn!("Draft {} has no membership row, not persisted", key);
        }
        Ok(())
    }
}

/// In-memory drafts for every version the user touched, plus the set of
/// versions selected for batch publish.
///
/// Edits land in memory first and reach storage through the debounced
/// [`DraftPersister`]. Publication goes straight to the tracking server.
pub struct DraftManager {
    drafts: Mutex<HashMap<DraftKey, Draft>>,
    selection: Mutex<BTreeSet<DraftKey>>,
    publishing: Mutex<HashSet<DraftKey>>,
    playlists: Arc<PlaylistManager>,
    attachments: Arc<AttachmentManager>,
    persister: DraftPersister,
    bus: EventBus,
}

impl DraftManager {
    pub fn new(
        playlists: Arc<PlaylistManager>,
        attachments: Arc<AttachmentManager>,
        bus: EventBus,
        debounce: Duration,
    ) -> Self {
        let persister = DraftPersister::spawn(playlists.clone(), debounce);
        Self {
            drafts: Mutex::new(HashMap::new()),
            selection: Mutex::new(BTreeSet::new()),
            publishing: Mutex::new(HashSet::new()),
            playlists,
            attachments,
            persister,
            bus,
        }
    }

    /// Load stored drafts and attachments into memory. Returns the number of drafts.
    pub async fn hydrate(&self) -> Result<usize, AppError> {
        let records = self.playlists.load_drafts().await?;
        let mut attachments = self.attachments.load_all().await?;

        let mut loaded: HashMap<DraftKey, Draft> = HashMap::new();
        for (key, record) in records {
            let draft = Draft {
                attachments: attachments.remove(&key).unwrap_or_default(),
                content: record.content,
                label_id: record.label_id,
                status: record.status,
                published_note_id: None,
            };
            loaded.insert(key, draft);
        }
        // Attachments whose draft row has no text yet
        for (key, items) in attachments {
            let mut draft = Draft {
                attachments: items,
                ..Draft::default()
            };
            draft.status = state::settle(&draft);
            loaded.insert(key, draft);
        }

        let count = loaded.len();
        *self.drafts.lock() = loaded;
        log::info!("Hydrated {} drafts", count);
        Ok(count)
    }

    pub fn draft(&self, key: &DraftKey) -> Draft {
        self.drafts.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn status(&self, key: &DraftKey) -> NoteStatus {
        self.drafts.lock().get(key).map(|d| d.status).unwrap_or_default()
    }

    /// Drafts of one playlist, keyed by version id.
    pub fn drafts_for_playlist(&self, playlist_local_id: &str) -> HashMap<String, Draft> {
        self.drafts
            .lock()
            .iter()
            .filter(|(key, _)| key.playlist_local_id == playlist_local_id)
            .map(|(key, draft)| (key.version_id.clone(), draft.clone()))
            .collect()
    }

    pub fn save_content(&self, key: &DraftKey, content: &str) -> NoteStatus {
        self.edit(key, |draft| {
            state::set_content(draft, content);
        })
    }

    pub fn set_label(&self, key: &DraftKey, label_id: Option<String>) -> NoteStatus {
        self.edit(key, |draft| draft.label_id = label_id)
    }

    pub async fn add_attachment(
        &self,
        key: &DraftKey,
        name: &str,
        media_type: &str,
        payload: AttachmentPayload,
    ) -> Result<Attachment, AppError> {
        let attachment = self.attachments.create(key, name, media_type, payload).await?;
        let added = attachment.clone();
        self.edit(key, move |draft| {
            state::add_attachment(draft, added);
        });
        self.bus.emit(InvalidationEvent::new(
            EntityKind::Attachment,
            attachment.id.as_str(),
            ChangeReason::Changed,
        ));
        Ok(attachment)
    }

    /// Returns false if the draft had no such attachment.
    pub async fn remove_attachment(&self, key: &DraftKey, attachment_id: &str) -> Result<bool, AppError> {
        let mut removed = None;
        self.edit(key, |draft| removed = state::remove_attachment(draft, attachment_id));
        match removed {
            Some(attachment) => {
                self.attachments.remove(&attachment).await?;
                self.bus.emit(InvalidationEvent::new(
                    EntityKind::Attachment,
                    attachment.id.as_str(),
                    ChangeReason::Deleted,
                ));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Reset content, label, attachments and status, even after publish.
    pub async fn clear(&self, key: &DraftKey) -> Result<(), AppError> {
        let dropped = {
            let mut drafts = self.drafts.lock();
            drafts.remove(key).map(|mut d| state::clear(&mut d)).unwrap_or_default()
        };
        self.selection.lock().remove(key);
        self.persister.schedule(key.clone(), DraftRecord::from(&Draft::default()));
        self.attachments.remove_all(key, &dropped).await?;

        self.bus.emit(InvalidationEvent::new(
            EntityKind::Note,
            key.to_string(),
            ChangeReason::Deleted,
        ));
        Ok(())
    }

    /// Select or deselect for batch publish. Empty drafts cannot be selected.
    /// Returns whether the key is selected afterwards.
    pub fn toggle_selection(&self, key: &DraftKey) -> bool {
        let mut selection = self.selection.lock();
        if selection.remove(key) {
            return false;
        }
        if self.status(key) == NoteStatus::Empty {
            return false;
        }
        selection.insert(key.clone());
        true
    }

    pub fn selected(&self) -> Vec<DraftKey> {
        self.selection.lock().iter().cloned().collect()
    }

    pub fn clear_selection(&self) {
        self.selection.lock().clear();
    }

    /// Publish one draft. A key already being published is refused with
    /// [`AppError::InProgress`], so one draft never yields two notes.
    pub async fn publish(&self, remote: &dyn TrackingService, key: &DraftKey) -> Result<PublishedNote, AppError> {
        let _claim = PublishClaim::take(&self.publishing, key)?;
        let snapshot = self.draft(key);
        if !snapshot.is_publishable() {
            return Err(AppError::Validation(format!("Nothing to publish for {}", key)));
        }

        let request = NoteRequest {
            version_id: key.version_id.clone(),
            content: snapshot.content.clone(),
            label_id: snapshot.label_id.clone(),
        };
        let note = remote.create_note(&request).await?;

        let uploads = self
            .attachments
            .upload_and_link(remote, &note.id, &snapshot.attachments)
            .await;
        let failed_attachments = uploads
            .failed
            .into_iter()
            .map(|f| (f.id, f.error))
            .collect::<Vec<_>>();

        // Edits made while the request was out are kept; only the attachments
        // sent with the note leave the draft
        let sent_ids: Vec<&str> = snapshot.attachments.iter().map(|a| a.id.as_str()).collect();
        let mut released = Vec::new();
        {
            let mut drafts = self.drafts.lock();
            let draft = drafts.entry(key.clone()).or_default();
            if draft.status == NoteStatus::Empty {
                draft.status = NoteStatus::Draft;
            }
            if let Err(e) = state::mark_published(draft, &note.id) {
                log::warn!("Note {} created for {} but draft not marked: {}", note.id, key, e);
            }
            draft.attachments.retain(|a| {
                let sent = sent_ids.contains(&a.id.as_str());
                if sent {
                    released.push(a.clone());
                }
                !sent
            });
            self.persister.schedule(key.clone(), DraftRecord::from(&*draft));
        }
        self.selection.lock().remove(key);

        for attachment in &released {
            if let Err(e) = self.attachments.remove(attachment).await {
                log::warn!("Could not release attachment {} of {}: {}", attachment.id, key, e);
            }
        }

        self.bus.emit(InvalidationEvent::new(
            EntityKind::Note,
            key.to_string(),
            ChangeReason::Published,
        ));

        if failed_attachments.is_empty() {
            log::info!("Published note {} for {}", note.id, key);
        } else {
            log::warn!(
                "Published note {} for {} with {} failed attachments",
                note.id,
                key,
                failed_attachments.len()
            );
        }

        Ok(PublishedNote {
            key: key.clone(),
            note_id: note.id,
            failed_attachments,
        })
    }

    /// Publish each key independently. Published and empty drafts are skipped.
    pub async fn publish_batch(
        &self,
        remote: &dyn TrackingService,
        keys: &[DraftKey],
    ) -> BatchResult<PublishedNote, DraftKey> {
        let mut result = BatchResult::default();
        let mut skipped = 0;

        for key in keys {
            if !self.draft(key).is_publishable() {
                skipped += 1;
                continue;
            }
            match self.publish(remote, key).await {
                Ok(published) => result.record_success(published),
                Err(AppError::InProgress(_)) => {
                    log::debug!("{} is already being published", key);
                    skipped += 1;
                }
                Err(e) => {
                    log::warn!("Failed to publish {}: {}", key, e);
                    result.record_failure(key.clone(), e);
                }
            }
        }

        log::info!(
            "Batch publish: {} succeeded, {} failed, {} skipped",
            result.succeeded.len(),
            result.failed.len(),
            skipped
        );
        result
    }

    pub async fn publish_selected(&self, remote: &dyn TrackingService) -> BatchResult<PublishedNote, DraftKey> {
        let keys = self.selected();
        self.publish_batch(remote, &keys).await
    }

    /// Persist every queued draft write now.
    pub async fn flush_pending(&self) -> BatchResult<DraftKey> {
        self.persister.flush().await
    }

    pub fn pending_writes(&self) -> usize {
        self.persister.pending()
    }

    /// Drop in-memory state for a playlist whose rows are being deleted.
    pub fn forget_playlist(&self, playlist_local_id: &str) -> usize {
        let removed: Vec<(DraftKey, Draft)> = {
            let mut drafts = self.drafts.lock();
            let keys: Vec<DraftKey> = drafts
                .keys()
                .filter(|key| key.playlist_local_id == playlist_local_id)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| drafts.remove(&key).map(|draft| (key, draft)))
                .collect()
        };

        let mut selection = self.selection.lock();
        for (key, draft) in &removed {
            selection.remove(key);
            self.persister.cancel(key);
            for handle in draft.attachments.iter().filter_map(|a| a.preview.as_ref()) {
                self.attachments.revoke_preview(handle);
            }
        }
        removed.len()
    }

    /// Forget all in-memory state: drafts, selection, queued writes and previews.
    pub fn reset(&self) {
        self.persister.reset();
        self.drafts.lock().clear();
        self.selection.lock().clear();
        self.attachments.reset();
    }

    /// Apply `change` to the draft, queue it for storage and keep the
    /// selection in step with the resulting status.
    fn edit(&self, key: &DraftKey, change: impl FnOnce(&mut Draft)) -> NoteStatus {
        let (status, record) = {
            let mut drafts = self.drafts.lock();
            let draft = drafts.entry(key.clone()).or_default();
            change(draft);
            (draft.status, DraftRecord::from(&*draft))
        };

        if status == NoteStatus::Empty {
            self.selection.lock().remove(key);
        }
        self.persister.schedule(key.clone(), record);
        status
    }
}

/// Marks a key as being published until dropped.
struct PublishClaim<'a> {
    publishing: &'a Mutex<HashSet<DraftKey>>,
    key: DraftKey,
}

impl<'a> PublishClaim<'a> {
    fn take(publishing: &'a Mutex<HashSet<DraftKey>>, key: &DraftKey) -> Result<Self, AppError> {
        if !publishing.lock().insert(key.clone()) {
            return Err(AppError::InProgress(format!("Publish of {}", key)));
        }
        Ok(Self {
            publishing,
            key: key.clone(),
        })
    }
}

impl Drop for PublishClaim<'_> {
    fn drop(&mut self) {
        self.publishing.lock().remove(&self.key);
    }
}
