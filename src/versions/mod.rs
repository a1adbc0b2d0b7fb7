//! Cached lookups against the tracking server: version search, version
//! details, workflow statuses and note labels.
//!
//! Every lookup goes through a [`Coalescer`](crate::cache::Coalescer), so
//! concurrent callers share one request. Not-found and schema errors degrade
//! to an empty answer; everything else is returned to the caller.

use std::sync::Arc;

use crate::cache::RemoteCaches;
use crate::config::{LABEL_CACHE_TTL, SEARCH_CACHE_TTL, STATUS_CACHE_TTL, VERSION_CACHE_TTL};
use crate::errors::AppError;
use crate::events::{ChangeReason, EntityKind, EventBus, InvalidationEvent};
use crate::remote::{
    EntityRef, EntityType, NoteLabel, RemoteError, RemoteVersion, StatusOption, TrackingService,
    VersionSearch,
};

fn degrade<T: Default>(what: &str, result: Result<T, RemoteError>) -> Result<T, AppError> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_degradable() => {
            log::warn!("{} unavailable, using empty result: {}", what, e);
            Ok(T::default())
        }
        Err(e) => Err(e.into()),
    }
}

pub struct VersionService {
    caches: Arc<RemoteCaches>,
    bus: EventBus,
}

impl VersionService {
    pub fn new(caches: Arc<RemoteCaches>, bus: EventBus) -> Self {
        Self { caches, bus }
    }

    pub async fn search(
        &self,
        remote: Arc<dyn TrackingService>,
        search: &VersionSearch,
    ) -> Result<Vec<RemoteVersion>, AppError> {
        let query = search.to_query();
        let key = query.render();
        let result = self
            .caches
            .searches
            .get_or_fetch(key, SEARCH_CACHE_TTL, move || async move {
                remote.search_versions(&query).await
            })
            .await;
        degrade("Version search", result)
    }

    pub async fn version_details(
        &self,
        remote: Arc<dyn TrackingService>,
        version_id: &str,
    ) -> Result<Option<RemoteVersion>, AppError> {
        let id = version_id.to_string();
        let result = self
            .caches
            .versions
            .get_or_fetch(id.clone(), VERSION_CACHE_TTL, move || async move {
                remote.get_version(&id).await
            })
            .await;
        degrade("Version details", result)
    }

    /// Valid statuses for `entity_type` in the project's workflow.
    pub async fn statuses_for(
        &self,
        remote: Arc<dyn TrackingService>,
        entity_type: EntityType,
        project_id: &str,
    ) -> Result<Vec<StatusOption>, AppError> {
        let project = project_id.to_string();
        let result = self
            .caches
            .statuses
            .get_or_fetch((entity_type, project.clone()), STATUS_CACHE_TTL, move || async move {
                remote.resolve_statuses(entity_type, &project).await
            })
            .await;
        degrade("Status list", result)
    }

    pub async fn note_labels(&self, remote: Arc<dyn TrackingService>) -> Result<Vec<NoteLabel>, AppError> {
        let result = self
            .caches
            .labels
            .get_or_fetch((), LABEL_CACHE_TTL, move || async move {
                remote.fetch_note_labels().await
            })
            .await;
        degrade("Note labels", result)
    }

    /// Change a version's status and evict everything derived from it.
    pub async fn update_status(
        &self,
        remote: &dyn TrackingService,
        version_id: &str,
        status_id: &str,
    ) -> Result<(), AppError> {
        remote.update_status(&EntityRef::version(version_id), status_id).await?;

        self.caches.versions.invalidate(&version_id.to_string());
        self.caches.searches.reset();
        self.bus.emit(InvalidationEvent::new(
            EntityKind::Version,
            version_id,
            ChangeReason::StatusChanged,
        ));
        log::info!("Set status of version {} to {}", version_id, status_id);
        Ok(())
    }
}
