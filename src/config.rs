use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::AppError;

pub const STATUS_CACHE_TTL: Duration = Duration::from_secs(30);
pub const SEARCH_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const VERSION_CACHE_TTL: Duration = Duration::from_secs(2 * 60);
pub const LABEL_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
pub const DRAFT_DEBOUNCE: Duration = Duration::from_millis(100);
pub const REQUEST_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_PAGE_LIMIT: u32 = 100;
pub const EVENT_BUS_CAPACITY: usize = 256;

pub const ENV_SERVER_URL: &str = "DAILIES_SERVER_URL";
pub const ENV_USER: &str = "DAILIES_USER";
pub const ENV_API_KEY: &str = "DAILIES_API_KEY";

pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dailies")
}

pub fn get_settings_file_path() -> PathBuf {
    get_config_dir().join("settings.json")
}

pub fn get_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dailies")
        .join("review.db")
}

/// Connection settings for the tracking server.
///
/// Any change to these invalidates the active remote session and every cache.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub server_url: String,
    pub user: String,
    pub credential: String,
}

impl Settings {
    pub fn new(
        server_url: impl Into<String>,
        user: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            user: user.into(),
            credential: credential.into(),
        }
    }

    /// Load settings from disk. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            log::info!("No settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&text)
            .map_err(|e| AppError::Config(format!("Invalid settings file {:?}: {}", path, e)))?;
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        log::debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Overlay values from the environment on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_SERVER_URL) {
            self.server_url = url;
        }
        if let Ok(user) = std::env::var(ENV_USER) {
            self.user = user;
        }
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            self.credential = key;
        }
        self
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let url = self.server_url.trim();
        if url.is_empty() {
            return Err(AppError::Config("Server URL is not set".to_string()));
        }
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(AppError::Config(format!(
                "Server URL must start with http:// or https://, got '{}'",
                url
            )));
        }
        if self.user.trim().is_empty() {
            return Err(AppError::Config("User is not set".to_string()));
        }
        if self.credential.trim().is_empty() {
            return Err(AppError::Config("API key is not set".to_string()));
        }
        Ok(())
    }

    pub fn api_url(&self) -> String {
        format!("{}/api", self.server_url.trim().trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings::new("https://studio.example.com", "reviewer", "secret");

        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_corrupt_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Settings::load(&path), Err(AppError::Config(_))));
    }

    #[test]
    fn test_validate() {
        assert!(Settings::new("https://a.example", "u", "k").validate().is_ok());
        assert!(Settings::new("", "u", "k").validate().is_err());
        assert!(Settings::new("ftp://a.example", "u", "k").validate().is_err());
        assert!(Settings::new("https://a.example", " ", "k").validate().is_err());
        assert!(Settings::new("https://a.example", "u", "").validate().is_err());
    }

    #[test]
    fn test_api_url_trims_trailing_slash() {
        let settings = Settings::new("https://a.example/", "u", "k");
        assert_eq!(settings.api_url(), "https://a.example/api");
    }
}
