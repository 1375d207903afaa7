//! Engine settings, loaded read-only from a JSON file.
//!
//! The UI owns the settings file and writes it; the engine only reads it on startup. A missing
//! or broken file yields defaults so a bad edit never keeps the file manager from starting.

use crate::write_operations::ConflictPolicy;
use log::{debug, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Folder under the platform config dir that holds `settings.json`.
pub const SETTINGS_DIR_NAME: &str = "fileops";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// How long a folder listing stays fresh.
    #[serde(default = "default_listing_ttl_ms")]
    pub listing_ttl_ms: u64,
    /// How long the list of configured remotes stays fresh.
    #[serde(default = "default_discovery_ttl_ms")]
    pub discovery_ttl_ms: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "default_refresh_debounce_ms")]
    pub refresh_debounce_ms: u64,
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_per_remote")]
    pub max_concurrent_per_remote: usize,
    /// Total attempts for a transient provider failure, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_undo_depth")]
    pub undo_depth: usize,
    /// Where undo backups go. Defaults to a folder in the platform data dir.
    #[serde(default)]
    pub undo_dir: Option<PathBuf>,
    #[serde(default)]
    pub default_conflict_policy: ConflictPolicy,
    #[serde(default = "default_rclone_binary")]
    pub rclone_binary: String,
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    /// Emit a search progress event every N scanned entries.
    #[serde(default = "default_search_progress_every")]
    pub search_progress_every: usize,
    #[serde(default = "default_show_hidden")]
    pub show_hidden_files: bool,
}

fn default_listing_ttl_ms() -> u64 {
    5_000
}

fn default_discovery_ttl_ms() -> u64 {
    300_000
}

fn default_cache_max_entries() -> usize {
    256
}

fn default_refresh_debounce_ms() -> u64 {
    250
}

fn default_refresh_timeout_ms() -> u64 {
    15_000
}

fn default_max_concurrent_per_remote() -> usize {
    4
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_undo_depth() -> usize {
    50
}

fn default_rclone_binary() -> String {
    "rclone".to_string()
}

fn default_provider_timeout_ms() -> u64 {
    60_000
}

fn default_search_progress_every() -> usize {
    200
}

fn default_show_hidden() -> bool {
    true
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            listing_ttl_ms: default_listing_ttl_ms(),
            discovery_ttl_ms: default_discovery_ttl_ms(),
            cache_max_entries: default_cache_max_entries(),
            refresh_debounce_ms: default_refresh_debounce_ms(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
            max_concurrent_per_remote: default_max_concurrent_per_remote(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            undo_depth: default_undo_depth(),
            undo_dir: None,
            default_conflict_policy: ConflictPolicy::default(),
            rclone_binary: default_rclone_binary(),
            provider_timeout_ms: default_provider_timeout_ms(),
            search_progress_every: default_search_progress_every(),
            show_hidden_files: default_show_hidden(),
        }
    }
}

impl EngineSettings {
    pub fn listing_ttl(&self) -> Duration {
        Duration::from_millis(self.listing_ttl_ms)
    }

    pub fn discovery_ttl(&self) -> Duration {
        Duration::from_millis(self.discovery_ttl_ms)
    }

    pub fn refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.refresh_debounce_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// The configured undo dir, or `<data_dir>/fileops/undo`, or a temp-dir fallback.
    pub fn resolved_undo_dir(&self) -> PathBuf {
        if let Some(dir) = &self.undo_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(SETTINGS_DIR_NAME)
            .join("undo")
    }
}

/// Path of the settings file in the platform config dir, if there is one.
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Loads settings from `path`. Returns defaults if the file doesn't exist or can't be parsed.
pub fn load_settings(path: &Path) -> EngineSettings {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Settings file {} not found, using defaults", path.display());
            return EngineSettings::default();
        }
        Err(e) => {
            warn!("Couldn't read settings file {}: {}, using defaults", path.display(), e);
            return EngineSettings::default();
        }
    };
    parse_settings(&contents).unwrap_or_else(|e| {
        warn!("Couldn't parse settings file {}: {}, using defaults", path.display(), e);
        EngineSettings::default()
    })
}

/// Loads settings from the default location.
pub fn load_default_settings() -> EngineSettings {
    match default_settings_path() {
        Some(path) => load_settings(&path),
        None => {
            warn!("No config dir on this platform, using default settings");
            EngineSettings::default()
        }
    }
}

/// Parses settings JSON. Unknown keys are ignored so the UI can keep its own keys in the same file.
pub fn parse_settings(json: &str) -> Result<EngineSettings, serde_json::Error> {
    serde_json::from_str(json)
}
