use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use parking_lot::Mutex;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

use super::models::{Attachment, AttachmentPayload, PreviewHandle};
use crate::errors::{AppError, BatchResult};
use crate::notes::models::DraftKey;
use crate::remote::TrackingService;

struct PreviewResource {
    attachment_id: String,
    url: String,
}

/// Owns attachment rows and the transient previews created for them.
///
/// Every preview handed out must eventually be revoked, either by removing
/// the attachment, clearing the draft, publishing it or resetting the session.
pub struct AttachmentManager {
    pool: Pool<Sqlite>,
    previews: Mutex<HashMap<PreviewHandle, PreviewResource>>,
}

impl AttachmentManager {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            previews: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create(
        &self,
        key: &DraftKey,
        name: &str,
        media_type: &str,
        payload: AttachmentPayload,
    ) -> Result<Attachment, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("Attachment name is empty".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp_millis();
        let (payload_path, payload_bytes) = match &payload {
            AttachmentPayload::Path(path) => (Some(path.to_string_lossy().to_string()), None),
            AttachmentPayload::Bytes(bytes) => (None, Some(bytes.clone())),
        };

        sqlx::query(
            r#"
            INSERT INTO attachments
                (id, version_id, playlist_local_id, name, media_type, payload_path, payload_bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&key.version_id)
        .bind(&key.playlist_local_id)
        .bind(name)
        .bind(media_type)
        .bind(&payload_path)
        .bind(&payload_bytes)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        let mut attachment = Attachment {
            id,
            version_id: key.version_id.clone(),
            playlist_local_id: key.playlist_local_id.clone(),
            name: name.to_string(),
            media_type: media_type.to_string(),
            preview: None,
            payload,
            created_at,
        };
        attachment.preview = Some(self.create_preview(&attachment));

        log::debug!("Added attachment '{}' to {}", attachment.name, key);
        Ok(attachment)
    }

    /// Allocate a display handle for the attachment's payload.
    pub fn create_preview(&self, attachment: &Attachment) -> PreviewHandle {
        let url = match &attachment.payload {
            AttachmentPayload::Bytes(bytes) => format!(
                "data:{};base64,{}",
                attachment.media_type,
                general_purpose::STANDARD.encode(bytes)
            ),
            AttachmentPayload::Path(path) => format!("file://{}", path.display()),
        };
        let handle = PreviewHandle(format!("preview://{}", Uuid::new_v4()));

        self.previews.lock().insert(
            handle.clone(),
            PreviewResource {
                attachment_id: attachment.id.clone(),
                url,
            },
        );
        handle
    }

    pub fn preview_url(&self, handle: &PreviewHandle) -> Option<String> {
        self.previews.lock().get(handle).map(|p| p.url.clone())
    }

    /// Release a preview. Returns false if it was already gone.
    pub fn revoke_preview(&self, handle: &PreviewHandle) -> bool {
        let removed = self.previews.lock().remove(handle);
        if let Some(resource) = &removed {
            log::debug!("Revoked preview {} for attachment {}", handle, resource.attachment_id);
        }
        removed.is_some()
    }

    pub fn live_previews(&self) -> usize {
        self.previews.lock().len()
    }

    /// Remove one attachment: revoke its preview and delete the row.
    pub async fn remove(&self, attachment: &Attachment) -> Result<(), AppError> {
        if let Some(handle) = &attachment.preview {
            self.revoke_preview(handle);
        }
        sqlx::query("DELETE FROM attachments WHERE id = ?")
            .bind(&attachment.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove every attachment of a draft. Returns how many rows were deleted.
    pub async fn remove_all(&self, key: &DraftKey, attachments: &[Attachment]) -> Result<u64, AppError> {
        for handle in attachments.iter().filter_map(|a| a.preview.as_ref()) {
            self.revoke_preview(handle);
        }
        let result =
            sqlx::query("DELETE FROM attachments WHERE playlist_local_id = ? AND version_id = ?")
                .bind(&key.playlist_local_id)
                .bind(&key.version_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Load stored attachments, grouped by draft. Fresh previews are allocated.
    pub async fn load_all(&self) -> Result<HashMap<DraftKey, Vec<Attachment>>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, version_id, playlist_local_id, name, media_type, payload_path, payload_bytes, created_at
            FROM attachments
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<DraftKey, Vec<Attachment>> = HashMap::new();
        for row in rows {
            let payload_path: Option<String> = row.try_get("payload_path").ok().flatten();
            let payload_bytes: Option<Vec<u8>> = row.try_get("payload_bytes").ok().flatten();
            let payload = match (payload_path, payload_bytes) {
                (Some(path), _) => AttachmentPayload::Path(PathBuf::from(path)),
                (None, Some(bytes)) => AttachmentPayload::Bytes(bytes),
                (None, None) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    log::warn!("Attachment {} has no payload, skipping", id);
                    continue;
                }
            };

            let mut attachment = Attachment {
                id: row.try_get("id")?,
                version_id: row.try_get("version_id")?,
                playlist_local_id: row.try_get("playlist_local_id")?,
                name: row.try_get("name")?,
                media_type: row.try_get("media_type")?,
                preview: None,
                payload,
                created_at: row.try_get("created_at").unwrap_or(0),
            };
            attachment.preview = Some(self.create_preview(&attachment));

            let key = DraftKey::new(&attachment.playlist_local_id, &attachment.version_id);
            grouped.entry(key).or_default().push(attachment);
        }
        Ok(grouped)
    }

    /// Upload each attachment as a component and link it to `note_id`.
    ///
    /// Items fail independently; the caller gets the ids that made it and a
    /// reason for each one that did not.
    pub async fn upload_and_link(
        &self,
        remote: &dyn TrackingService,
        note_id: &str,
        attachments: &[Attachment],
    ) -> BatchResult<String> {
        let mut result = BatchResult::default();

        for attachment in attachments {
            let bytes = match attachment.payload.read().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("Cannot read attachment '{}': {}", attachment.name, e);
                    result.record_failure(attachment.id.clone(), format!("read failed: {}", e));
                    continue;
                }
            };

            let linked = match remote
                .upload_component(&attachment.name, &attachment.media_type, bytes)
                .await
            {
                Ok(component_id) => remote.link_component(note_id, &component_id).await,
                Err(e) => Err(e),
            };

            match linked {
                Ok(()) => result.record_success(attachment.id.clone()),
                Err(e) => {
                    log::warn!("Attachment '{}' not attached to note {}: {}", attachment.name, note_id, e);
                    result.record_failure(attachment.id.clone(), e);
                }
            }
        }

        result
    }

    /// Revoke every outstanding preview.
    pub fn reset(&self) {
        let count = {
            let mut previews = self.previews.lock();
            let count = previews.len();
            previews.clear();
            count
        };
        if count > 0 {
            log::debug!("Revoked {} previews", count);
        }
    }
}
