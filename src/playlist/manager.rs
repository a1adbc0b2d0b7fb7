use super::models::{
    LocalStatus, Playlist, PlaylistDetails, PlaylistRow, SyncStatus, VersionMembership,
};
use crate::errors::AppError;
use crate::notes::models::{DraftKey, DraftRecord, NoteStatus};
use crate::remote::{PlaylistKind, RemotePlaylist, RemoteVersion};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use uuid::Uuid;

const PLAYLIST_COLUMNS: &str = "local_id, remote_id, name, description, kind, category, project_id, \
     local_status, sync_status, created_at, updated_at";

const MEMBERSHIP_COLUMNS: &str = "playlist_local_id, version_id, display_name, version_number, \
     thumbnail_url, status_name, position, manually_added, is_removed, draft_content, note_status, \
     label_id, created_at, updated_at";

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn to_playlist(row: PlaylistRow) -> Result<Playlist, AppError> {
    let local_id = row.local_id.clone();
    Playlist::try_from(row)
        .map_err(|e| AppError::Database(format!("Corrupt playlist row {}: {}", local_id, e)))
}

fn to_membership(row: &SqliteRow) -> VersionMembership {
    let note_status = row
        .try_get::<String, _>("note_status")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(NoteStatus::Empty);

    VersionMembership {
        playlist_local_id: row.try_get("playlist_local_id").unwrap_or_default(),
        version_id: row.try_get("version_id").unwrap_or_default(),
        display_name: row.try_get("display_name").unwrap_or_default(),
        version_number: row.try_get("version_number").unwrap_or(0),
        thumbnail_url: row.try_get("thumbnail_url").ok().flatten(),
        status_name: row.try_get("status_name").ok().flatten(),
        position: row.try_get("position").unwrap_or(0),
        manually_added: row.try_get::<i64, _>("manually_added").unwrap_or(0) != 0,
        is_removed: row.try_get::<i64, _>("is_removed").unwrap_or(0) != 0,
        draft_content: row.try_get("draft_content").unwrap_or_default(),
        note_status,
        label_id: row.try_get("label_id").ok().flatten(),
        created_at: row.try_get("created_at").unwrap_or(0),
        updated_at: row.try_get("updated_at").unwrap_or(0),
    }
}

pub struct PlaylistManager {
    pool: Pool<Sqlite>,
}

impl PlaylistManager {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create a playlist that exists only locally until published.
    pub async fn create_playlist(
        &self,
        name: &str,
        kind: PlaylistKind,
        category: Option<String>,
        project_id: Option<String>,
    ) -> Result<Playlist, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("Playlist name is empty".to_string()));
        }

        let now = now_millis();
        let playlist = Playlist {
            local_id: Uuid::new_v4().to_string(),
            remote_id: None,
            name: name.trim().to_string(),
            description: None,
            kind,
            category,
            project_id,
            local_status: LocalStatus::Draft,
            sync_status: SyncStatus::NotSynced,
            created_at: now,
            updated_at: now,
        };
        self.insert_playlist(&playlist).await?;
        Ok(playlist)
    }

    /// Insert a playlist row unless one with the same local id exists.
    /// Returns whether a row was written.
    pub async fn insert_playlist(&self, playlist: &Playlist) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO playlists
                (local_id, remote_id, name, description, kind, category, project_id,
                 local_status, sync_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&playlist.local_id)
        .bind(&playlist.remote_id)
        .bind(&playlist.name)
        .bind(&playlist.description)
        .bind(playlist.kind.to_string())
        .bind(&playlist.category)
        .bind(&playlist.project_id)
        .bind(playlist.local_status.to_string())
        .bind(playlist.sync_status.to_string())
        .bind(playlist.created_at)
        .bind(playlist.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// New local row mirroring a remote playlist, under a resolved local id.
    pub fn playlist_from_remote(local_id: String, remote: &RemotePlaylist) -> Playlist {
        let now = now_millis();
        Playlist {
            local_id,
            remote_id: Some(remote.id.clone()),
            name: remote.name.clone(),
            description: remote.description.clone(),
            kind: remote.kind,
            category: remote.category.clone(),
            project_id: remote.project_id.clone(),
            local_status: LocalStatus::Synced,
            sync_status: SyncStatus::Synced,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stable order: creation time, then local id.
    pub async fn get_playlists(&self) -> Result<Vec<Playlist>, AppError> {
        let rows = sqlx::query_as::<_, PlaylistRow>(&format!(
            "SELECT {} FROM playlists ORDER BY created_at ASC, local_id ASC",
            PLAYLIST_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_playlist).collect()
    }

    pub async fn get_playlist(&self, local_id: &str) -> Result<Option<Playlist>, AppError> {
        let row = sqlx::query_as::<_, PlaylistRow>(&format!(
            "SELECT {} FROM playlists WHERE local_id = ?",
            PLAYLIST_COLUMNS
        ))
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(to_playlist).transpose()
    }

    /// All rows claiming `remote_id`, oldest first.
    pub async fn find_by_remote_id(&self, remote_id: &str) -> Result<Vec<Playlist>, AppError> {
        let rows = sqlx::query_as::<_, PlaylistRow>(&format!(
            "SELECT {} FROM playlists WHERE remote_id = ? ORDER BY created_at ASC, rowid ASC",
            PLAYLIST_COLUMNS
        ))
        .bind(remote_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(to_playlist).collect()
    }

    pub async fn get_playlist_details(&self, local_id: &str) -> Result<PlaylistDetails, AppError> {
        let playlist = self
            .get_playlist(local_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Playlist {}", local_id)))?;
        let versions = self.list_versions(local_id, false).await?;
        Ok(PlaylistDetails { playlist, versions })
    }

    pub async fn rename_playlist(&self, local_id: &str, name: &str) -> Result<(), AppError> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("Playlist name is empty".to_string()));
        }
        let result = sqlx::query("UPDATE playlists SET name = ?, updated_at = ? WHERE local_id = ?")
            .bind(name.trim())
            .bind(now_millis())
            .bind(local_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Playlist {}", local_id)));
        }
        Ok(())
    }

    /// Refresh sync bookkeeping only. Returns false when nothing changed.
    pub async fn mark_synced(&self, local_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE playlists SET sync_status = 'synced', local_status = 'synced', updated_at = ?
            WHERE local_id = ? AND (sync_status != 'synced' OR local_status != 'synced')
            "#,
        )
        .bind(now_millis())
        .bind(local_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the server id of a playlist that was created locally.
    pub async fn attach_remote_id(&self, local_id: &str, remote_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE playlists
            SET remote_id = ?, sync_status = 'synced', local_status = 'synced', updated_at = ?
            WHERE local_id = ?
            "#,
        )
        .bind(remote_id)
        .bind(now_millis())
        .bind(local_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hard delete: the playlist, its memberships and their attachments.
    pub async fn delete_playlist(&self, local_id: &str) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM attachments WHERE playlist_local_id = ?")
            .bind(local_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM version_memberships WHERE playlist_local_id = ?")
            .bind(local_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM playlists WHERE local_id = ?")
            .bind(local_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fold `duplicate` into `keeper` and delete it. Memberships and
    /// attachments the keeper lacks are carried over so no draft is lost.
    /// Where both rows hold a version, the duplicate's draft fills an
    /// untouched keeper draft.
    pub async fn merge_duplicate_into(&self, keeper: &str, duplicate: &str) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE version_memberships
            SET draft_content = d.draft_content,
                note_status = d.note_status,
                label_id = d.label_id,
                draft_updated_at = d.draft_updated_at
            FROM (
                SELECT version_id, draft_content, note_status, label_id, draft_updated_at
                FROM version_memberships
                WHERE playlist_local_id = ?
                  AND (note_status != 'empty' OR draft_content != '' OR label_id IS NOT NULL)
            ) AS d
            WHERE version_memberships.playlist_local_id = ?
              AND version_memberships.version_id = d.version_id
              AND version_memberships.note_status = 'empty'
              AND version_memberships.draft_content = ''
              AND version_memberships.label_id IS NULL
            "#,
        )
        .bind(duplicate)
        .bind(keeper)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            r#"
            INSERT OR IGNORE INTO version_memberships ({cols})
            SELECT ?, version_id, display_name, version_number, thumbnail_url, status_name, position,
                   manually_added, is_removed, draft_content, note_status, label_id, created_at, updated_at
            FROM version_memberships WHERE playlist_local_id = ?
            "#,
            cols = MEMBERSHIP_COLUMNS
        ))
        .bind(keeper)
        .bind(duplicate)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE attachments SET playlist_local_id = ?
            WHERE playlist_local_id = ?
              AND version_id NOT IN (SELECT version_id FROM attachments WHERE playlist_local_id = ?)
            "#,
        )
        .bind(keeper)
        .bind(duplicate)
        .bind(keeper)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM attachments WHERE playlist_local_id = ?")
            .bind(duplicate)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM version_memberships WHERE playlist_local_id = ?")
            .bind(duplicate)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM playlists WHERE local_id = ?")
            .bind(duplicate)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_versions(
        &self,
        playlist_local_id: &str,
        include_removed: bool,
    ) -> Result<Vec<VersionMembership>, AppError> {
        let sql = if include_removed {
            format!(
                "SELECT {} FROM version_memberships WHERE playlist_local_id = ? ORDER BY position ASC, version_id ASC",
                MEMBERSHIP_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM version_memberships WHERE playlist_local_id = ? AND is_removed = 0 ORDER BY position ASC, version_id ASC",
                MEMBERSHIP_COLUMNS
            )
        };
        let rows = sqlx::query(&sql)
            .bind(playlist_local_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(to_membership).collect())
    }

    pub async fn get_membership(&self, key: &DraftKey) -> Result<Option<VersionMembership>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM version_memberships WHERE playlist_local_id = ? AND version_id = ?",
            MEMBERSHIP_COLUMNS
        ))
        .bind(&key.playlist_local_id)
        .bind(&key.version_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(to_membership))
    }

    /// Mirror a remote membership. Display fields follow the server; draft
    /// columns, the manual flag and soft deletion are never touched.
    /// Returns whether anything was written.
    pub async fn upsert_remote_version(
        &self,
        playlist_local_id: &str,
        version: &RemoteVersion,
        position: i64,
    ) -> Result<bool, AppError> {
        let now = now_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO version_memberships
                (playlist_local_id, version_id, display_name, version_number, thumbnail_url,
                 status_name, position, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(playlist_local_id, version_id) DO UPDATE SET
                display_name = excluded.display_name,
                version_number = excluded.version_number,
                thumbnail_url = excluded.thumbnail_url,
                status_name = excluded.status_name,
                position = excluded.position,
                updated_at = excluded.updated_at
            WHERE display_name IS NOT excluded.display_name
               OR version_number IS NOT excluded.version_number
               OR thumbnail_url IS NOT excluded.thumbnail_url
               OR status_name IS NOT excluded.status_name
               OR position IS NOT excluded.position
            "#,
        )
        .bind(playlist_local_id)
        .bind(&version.id)
        .bind(&version.name)
        .bind(version.version_number)
        .bind(&version.thumbnail_url)
        .bind(&version.status_name)
        .bind(position)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Add a version by hand. Re-adding a soft-deleted version restores it.
    pub async fn add_version_manually(
        &self,
        playlist_local_id: &str,
        version: &RemoteVersion,
    ) -> Result<VersionMembership, AppError> {
        if self.get_playlist(playlist_local_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Playlist {}", playlist_local_id)));
        }

        let (next_position,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM version_memberships WHERE playlist_local_id = ?",
        )
        .bind(playlist_local_id)
        .fetch_one(&self.pool)
        .await?;
        let now = now_millis();

        sqlx::query(
            r#"
            INSERT INTO version_memberships
                (playlist_local_id, version_id, display_name, version_number, thumbnail_url,
                 status_name, position, manually_added, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(playlist_local_id, version_id) DO UPDATE SET
                is_removed = 0,
                manually_added = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(playlist_local_id)
        .bind(&version.id)
        .bind(&version.name)
        .bind(version.version_number)
        .bind(&version.thumbnail_url)
        .bind(&version.status_name)
        .bind(next_position)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let key = DraftKey::new(playlist_local_id, &version.id);
        self.get_membership(&key)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Membership {} missing after insert", key)))
    }

    /// Soft delete. The row and its draft are kept for undo.
    pub async fn remove_version(&self, key: &DraftKey) -> Result<bool, AppError> {
        self.set_removed(key, true).await
    }

    pub async fn restore_version(&self, key: &DraftKey) -> Result<bool, AppError> {
        self.set_removed(key, false).await
    }

    async fn set_removed(&self, key: &DraftKey, removed: bool) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE version_memberships SET is_removed = ?, updated_at = ?
            WHERE playlist_local_id = ? AND version_id = ? AND is_removed != ?
            "#,
        )
        .bind(removed as i64)
        .bind(now_millis())
        .bind(&key.playlist_local_id)
        .bind(&key.version_id)
        .bind(removed as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Persist a draft's bookkeeping. Returns false if the membership is gone.
    pub async fn save_draft(&self, key: &DraftKey, record: &DraftRecord) -> Result<bool, AppError> {
        let now = now_millis();
        let result = sqlx::query(
            r#"
            UPDATE version_memberships
            SET draft_content = ?, note_status = ?, label_id = ?, draft_updated_at = ?, updated_at = ?
            WHERE playlist_local_id = ? AND version_id = ?
            "#,
        )
        .bind(&record.content)
        .bind(record.status.as_str())
        .bind(&record.label_id)
        .bind(now)
        .bind(now)
        .bind(&key.playlist_local_id)
        .bind(&key.version_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every membership carrying draft state, for hydrating memory on start.
    pub async fn load_drafts(&self) -> Result<Vec<(DraftKey, DraftRecord)>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT playlist_local_id, version_id, draft_content, note_status, label_id
            FROM version_memberships
            WHERE draft_content != '' OR note_status != 'empty' OR label_id IS NOT NULL
            ORDER BY playlist_local_id, version_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let key = DraftKey::new(
                    row.try_get::<String, _>("playlist_local_id").unwrap_or_default(),
                    row.try_get::<String, _>("version_id").unwrap_or_default(),
                );
                let record = DraftRecord {
                    content: row.try_get("draft_content").unwrap_or_default(),
                    status: row
                        .try_get::<String, _>("note_status")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(NoteStatus::Empty),
                    label_id: row.try_get("label_id").ok().flatten(),
                };
                (key, record)
            })
            .collect())
    }

    /// Reflect a status change on every membership of the version.
    pub async fn set_version_status_name(
        &self,
        version_id: &str,
        status_name: Option<&str>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            "UPDATE version_memberships SET status_name = ?, updated_at = ? WHERE version_id = ?",
        )
        .bind(status_name)
        .bind(now_millis())
        .bind(version_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
