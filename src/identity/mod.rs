//! Stable local identifiers for remote entities.
//!
//! A remote id is mapped to a local id exactly once. Resolution is a
//! lookup-then-create that is serialized per key in process and backed by
//! the `identity_map` primary key across connections, so racing refreshes
//! always agree on the same local id.

use chrono::Utc;
use parking_lot::Mutex;
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::EntityKind;

type KeyLock = Arc<AsyncMutex<()>>;

pub struct IdentityResolver {
    pool: Pool<Sqlite>,
    locks: Mutex<HashMap<(EntityKind, String), KeyLock>>,
}

impl IdentityResolver {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lookup(&self, kind: EntityKind, remote_id: &str) -> Result<Option<String>, AppError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT local_id FROM identity_map WHERE entity_kind = ? AND remote_id = ?",
        )
        .bind(kind.to_string())
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    /// Local id for `remote_id`, allocating one on first sight.
    pub async fn resolve_local_id(&self, kind: EntityKind, remote_id: &str) -> Result<String, AppError> {
        if let Some(id) = self.lookup(kind, remote_id).await? {
            return Ok(id);
        }

        let lock = self.key_lock(kind, remote_id);
        let resolved = {
            let _guard = lock.lock().await;
            self.resolve_locked(kind, remote_id).await
        };
        self.release_key_lock(kind, remote_id, lock);
        resolved
    }

    /// Bind `remote_id` to an existing local id, e.g. after a local playlist
    /// was created on the server. If the remote id is already bound, the
    /// existing binding wins and is returned.
    pub async fn link(&self, kind: EntityKind, remote_id: &str, local_id: &str) -> Result<String, AppError> {
        let lock = self.key_lock(kind, remote_id);
        let linked = {
            let _guard = lock.lock().await;
            self.insert_mapping(kind, remote_id, local_id).await
        };
        self.release_key_lock(kind, remote_id, lock);

        let effective = linked?;
        if effective != local_id {
            log::warn!(
                "{} {} already bound to {}, not rebinding to {}",
                kind,
                remote_id,
                effective,
                local_id
            );
        }
        Ok(effective)
    }

    async fn resolve_locked(&self, kind: EntityKind, remote_id: &str) -> Result<String, AppError> {
        // Someone may have resolved it while we waited for the lock
        if let Some(id) = self.lookup(kind, remote_id).await? {
            return Ok(id);
        }

        // Rows stored before the mapping existed keep their id
        let candidate = match self.adopt_existing_row(kind, remote_id).await? {
            Some(existing) => existing,
            None => Uuid::new_v4().to_string(),
        };

        let id = self.insert_mapping(kind, remote_id, &candidate).await?;
        if id == candidate {
            log::debug!("Bound {} {} -> {}", kind, remote_id, id);
        }
        Ok(id)
    }

    async fn adopt_existing_row(&self, kind: EntityKind, remote_id: &str) -> Result<Option<String>, AppError> {
        if kind != EntityKind::Playlist {
            return Ok(None);
        }
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT local_id FROM playlists WHERE remote_id = ? ORDER BY created_at ASC, rowid ASC LIMIT 1",
        )
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    /// Insert-if-absent, then read back whatever won. A local id bound to
    /// another remote id is refused.
    async fn insert_mapping(&self, kind: EntityKind, remote_id: &str, local_id: &str) -> Result<String, AppError> {
        let bound: Option<(String, String)> = sqlx::query_as(
            "SELECT entity_kind, remote_id FROM identity_map WHERE local_id = ?",
        )
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some((bound_kind, bound_remote)) = bound {
            if bound_kind != kind.to_string() || bound_remote != remote_id {
                return Err(AppError::Validation(format!(
                    "Local id {} is already bound to {} {}",
                    local_id, bound_kind, bound_remote
                )));
            }
        }

        sqlx::query(
            r#"
            INSERT INTO identity_map (entity_kind, remote_id, local_id, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(entity_kind, remote_id) DO NOTHING
            "#,
        )
        .bind(kind.to_string())
        .bind(remote_id)
        .bind(local_id)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        self.lookup(kind, remote_id).await?.ok_or_else(|| {
            AppError::Internal(format!("Identity for {} {} vanished after insert", kind, remote_id))
        })
    }

    fn key_lock(&self, kind: EntityKind, remote_id: &str) -> KeyLock {
        self.locks
            .lock()
            .entry((kind, remote_id.to_string()))
            .or_default()
            .clone()
    }

    fn release_key_lock(&self, kind: EntityKind, remote_id: &str, lock: KeyLock) {
        let mut locks = self.locks.lock();
        // One reference in the map, one held here: nobody else is waiting
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&(kind, remote_id.to_string()));
        }
    }

    pub fn pending_locks(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseManager;
    use futures_util::future::join_all;

    async fn resolver() -> IdentityResolver {
        let db = DatabaseManager::in_memory().await.unwrap();
        IdentityResolver::new(db.pool)
    }

    #[tokio::test]
    async fn test_resolve_is_stable() {
        let resolver = resolver().await;
        let first = resolver.resolve_local_id(EntityKind::Playlist, "rs-1").await.unwrap();
        let second = resolver.resolve_local_id(EntityKind::Playlist, "rs-1").await.unwrap();
        let other = resolver.resolve_local_id(EntityKind::Playlist, "rs-2").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_allocates_once() {
        let resolver = resolver().await;
        let ids = join_all((0..16).map(|_| resolver.resolve_local_id(EntityKind::Playlist, "rs-9"))).await;

        let first = ids[0].as_ref().unwrap().clone();
        assert!(ids.iter().all(|id| id.as_ref().unwrap() == &first));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM identity_map")
            .fetch_one(&resolver.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(resolver.pending_locks(), 0);
    }

    #[tokio::test]
    async fn test_independent_resolvers_agree_through_storage() {
        let db = DatabaseManager::in_memory().await.unwrap();
        let a = IdentityResolver::new(db.pool.clone());
        let b = IdentityResolver::new(db.pool.clone());

        let (x, y) = tokio::join!(
            a.resolve_local_id(EntityKind::Playlist, "rs-1"),
            b.resolve_local_id(EntityKind::Playlist, "rs-1")
        );
        assert_eq!(x.unwrap(), y.unwrap());
    }

    #[tokio::test]
    async fn test_existing_row_is_adopted() {
        let resolver = resolver().await;
        for (local_id, created_at) in [("late", 20), ("early", 10)] {
            sqlx::query(
                "INSERT INTO playlists (local_id, remote_id, name, created_at, updated_at) VALUES (?, 'rs-1', 'A', ?, ?)",
            )
            .bind(local_id)
            .bind(created_at)
            .bind(created_at)
            .execute(&resolver.pool)
            .await
            .unwrap();
        }

        let id = resolver.resolve_local_id(EntityKind::Playlist, "rs-1").await.unwrap();
        assert_eq!(id, "early");
    }

    #[tokio::test]
    async fn test_link_never_rebinds() {
        let resolver = resolver().await;
        let linked = resolver.link(EntityKind::Playlist, "rs-1", "local-a").await.unwrap();
        assert_eq!(linked, "local-a");

        let relinked = resolver.link(EntityKind::Playlist, "rs-1", "local-b").await.unwrap();
        assert_eq!(relinked, "local-a");
        assert_eq!(
            resolver.resolve_local_id(EntityKind::Playlist, "rs-1").await.unwrap(),
            "local-a"
        );
    }

    #[tokio::test]
    async fn test_link_refuses_local_id_bound_elsewhere() {
        let resolver = resolver().await;
        resolver.link(EntityKind::Playlist, "rs-1", "local-a").await.unwrap();

        let result = resolver.link(EntityKind::Playlist, "rs-2", "local-a").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(resolver.lookup(EntityKind::Playlist, "rs-2").await.unwrap(), None);
        assert_eq!(resolver.pending_locks(), 0);
    }
}
