use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::error::ConfigError;

pub const BASE_URL_ENV: &str = "RSS_SYNC_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub stale_time_ms: u64,
    pub retry_reads: bool,
    pub summary_pending_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub articles_per_page: u32,
    pub placeholder_previous: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            cache: CacheConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            request_timeout_seconds: 30,
            user_agent: concat!("rss-sync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: 30_000,
            retry_reads: true,
            summary_pending_timeout_seconds: 300,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            articles_per_page: 20,
            placeholder_previous: true,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Parses the base URL, guaranteeing a trailing slash so relative joins
    /// keep the `/api/v1` prefix.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Ok(Url::parse(&raw)?)
    }
}

impl CacheConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn summary_pending_timeout(&self) -> Duration {
        Duration::from_secs(self.summary_pending_timeout_seconds)
    }
}

impl SyncConfig {
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("rss-sync"))
    }

    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Loads the config from the platform config dir. Falls back to defaults
    /// (and tries to write them) when the file is missing or unreadable.
    pub fn load() -> Self {
        let loaded = Self::config_file_path().and_then(|path| {
            Self::load_from(&path).or_else(|e| {
                warn!(error = %e, path = %path.display(), "failed to load config, using defaults");
                let defaults = Self::default();
                if let Err(save_err) = defaults.save_to(&path) {
                    warn!(error = %save_err, "failed to save default config");
                }
                Ok(defaults)
            })
        });
        let mut config = loaded.unwrap_or_else(|e| {
            warn!(error = %e, "no config location, using defaults");
            Self::default()
        });
        config.apply_env();
        config
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: SyncConfig = serde_json::from_str(&content)?;
        config.normalize();
        Ok(config)
    }

    /// Writes through a `.tmp` sibling and renames it into place.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn apply_env(&mut self) {
        if let Ok(base) = std::env::var(BASE_URL_ENV) {
            if !base.trim().is_empty() {
                self.api.base_url = base;
            }
        }
    }

    // The list endpoint contract is built around 20 items per page.
    fn normalize(&mut self) {
        if self.ui.articles_per_page != crate::pagination::PAGE_SIZE {
            warn!(
                requested = self.ui.articles_per_page,
                "articles_per_page is fixed, ignoring configured value"
            );
            self.ui.articles_per_page = crate::pagination::PAGE_SIZE;
        }
    }
}
