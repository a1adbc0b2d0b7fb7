//! Merge freshly fetched remote playlists into the local mirror.
//!
//! Local rows win: names, descriptions and other user edits are never taken
//! from the remote copy, only sync bookkeeping is refreshed. New remote
//! playlists get their local id from the [`IdentityResolver`], so any number
//! of overlapping refreshes converge on one row per remote id.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::manager::PlaylistManager;
use super::models::Playlist;
use crate::errors::AppError;
use crate::events::EntityKind;
use crate::identity::IdentityResolver;
use crate::remote::{RemotePlaylist, RemoteVersion};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileOutcome {
    /// Every local playlist after the merge, in stable display order.
    pub playlists: Vec<Playlist>,
    pub inserted: Vec<String>,
    /// Rows whose sync bookkeeping changed.
    pub refreshed: Vec<String>,
    pub duplicates_removed: usize,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        !self.inserted.is_empty() || !self.refreshed.is_empty() || self.duplicates_removed > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipOutcome {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
}

/// Remote ids claimed by more than one local row.
pub fn duplicate_groups(local: &[Playlist]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for remote_id in local.iter().filter_map(|p| p.remote_id.as_deref()) {
        *counts.entry(remote_id).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| id.to_string())
        .collect()
}

pub struct Reconciler {
    playlists: Arc<PlaylistManager>,
    identity: Arc<IdentityResolver>,
}

impl Reconciler {
    pub fn new(playlists: Arc<PlaylistManager>, identity: Arc<IdentityResolver>) -> Self {
        Self { playlists, identity }
    }

    /// Collapse every row claiming `remote_id` into the oldest one.
    /// Returns how many rows were removed.
    pub async fn cleanup_duplicates(&self, remote_id: &str) -> Result<usize, AppError> {
        let rows = self.playlists.find_by_remote_id(remote_id).await?;
        let Some((keeper, duplicates)) = rows.split_first() else {
            return Ok(0);
        };

        for duplicate in duplicates {
            self.playlists
                .merge_duplicate_into(&keeper.local_id, &duplicate.local_id)
                .await?;
        }

        if !duplicates.is_empty() {
            log::warn!(
                "Removed {} duplicate rows for remote playlist {}, kept {}",
                duplicates.len(),
                remote_id,
                keeper.local_id
            );
        }
        Ok(duplicates.len())
    }

    /// Merge `remote` into local storage. Local-only rows are left alone.
    pub async fn reconcile(&self, remote: &[RemotePlaylist]) -> Result<ReconcileOutcome, AppError> {
        let mut outcome = ReconcileOutcome::default();

        // Duplicates must be gone before anything is read back for display
        let local = self.playlists.get_playlists().await?;
        for remote_id in duplicate_groups(&local) {
            outcome.duplicates_removed += self.cleanup_duplicates(&remote_id).await?;
        }

        let mut seen = HashSet::new();
        for item in remote {
            if !seen.insert(item.id.as_str()) {
                continue;
            }

            let local_id = self
                .identity
                .resolve_local_id(EntityKind::Playlist, &item.id)
                .await?;

            let existing = match self.playlists.get_playlist(&local_id).await? {
                Some(row) => Some(row),
                // Mapping outlived its row, but another row still carries the id
                None => self.playlists.find_by_remote_id(&item.id).await?.into_iter().next(),
            };

            match existing {
                Some(row) => {
                    if self.playlists.mark_synced(&row.local_id).await? {
                        outcome.refreshed.push(row.local_id);
                    }
                }
                None => {
                    let row = PlaylistManager::playlist_from_remote(local_id, item);
                    if self.playlists.insert_playlist(&row).await? {
                        log::debug!("Mirrored remote playlist {} as {}", item.id, row.local_id);
                        outcome.inserted.push(row.local_id);
                    }
                }
            }
        }

        outcome.playlists = self.playlists.get_playlists().await?;
        Ok(outcome)
    }

    /// Mirror a playlist's remote versions. Draft columns, manual rows and
    /// soft deletions are never touched, and nothing local is removed.
    pub async fn reconcile_versions(
        &self,
        playlist_local_id: &str,
        remote: &[RemoteVersion],
    ) -> Result<MembershipOutcome, AppError> {
        let known: HashSet<String> = self
            .playlists
            .list_versions(playlist_local_id, true)
            .await?
            .into_iter()
            .map(|m| m.version_id)
            .collect();

        let mut outcome = MembershipOutcome::default();
        let mut seen = HashSet::new();
        for (position, version) in remote.iter().enumerate() {
            if !seen.insert(version.id.as_str()) {
                continue;
            }
            let written = self
                .playlists
                .upsert_remote_version(playlist_local_id, version, position as i64)
                .await?;
            if !written {
                continue;
            }
            if known.contains(&version.id) {
                outcome.updated.push(version.id.clone());
            } else {
                outcome.inserted.push(version.id.clone());
            }
        }
        Ok(outcome)
    }
}
