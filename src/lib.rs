pub mod attachments;
pub mod cache;
pub mod config;
pub mod database;
pub mod errors;
pub mod events;
pub mod identity;
pub mod notes;
pub mod playlist;
pub mod remote;
pub mod session;
pub mod versions;

#[cfg(test)]
pub(crate) mod test_support;

use anyhow::Context;

use config::{get_database_path, get_settings_file_path, Settings};
use database::DatabaseManager;
use session::Session;

/// Load settings, open the local store, run one refresh and flush.
pub async fn run(project_id: Option<String>) -> anyhow::Result<()> {
    let settings_path = get_settings_file_path();
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("reading settings from {}", settings_path.display()))?
        .with_env_overrides();
    settings
        .validate()
        .context("tracking server settings are incomplete")?;

    let db_path = get_database_path();
    let db = DatabaseManager::open(&db_path)
        .await
        .with_context(|| format!("opening database at {}", db_path.display()))?;
    log::info!("Using database at {}", db_path.display());

    let session = Session::connect(db, settings).await.context("starting session")?;

    match session.refresh(project_id.as_deref()).await {
        Ok(report) => {
            for failure in &report.failed {
                log::warn!("Playlist {} not refreshed: {}", failure.id, failure.error);
            }
        }
        // Stored playlists stay usable when the server is unreachable
        Err(e) if e.is_transient() => log::warn!("Working offline: {}", e),
        Err(e) => return Err(e).context("refreshing playlists"),
    }

    for playlist in session.list_playlists().await? {
        let versions = session.list_versions(&playlist.local_id, false).await?;
        log::info!(
            "{} [{}] {} versions ({})",
            playlist.name,
            playlist.kind,
            versions.len(),
            playlist.sync_status
        );
    }

    session.shutdown().await;
    Ok(())
}
