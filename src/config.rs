//! Persistent user preferences.

use dirs_next as dirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Overrides where plan, session and history data is kept.
pub const DATA_DIR_ENV: &str = "WORKOUT_TRACKER_DATA_DIR";

fn default_autosave_delay_ms() -> u64 {
    1000
}

/// User preferences, stored as JSON in the platform config directory.
///
/// Every field has a serde default so files written by older versions keep
/// loading after new options are added.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Quiet period after the last keystroke before a session is autosaved.
    #[serde(default = "default_autosave_delay_ms")]
    pub autosave_delay_ms: u64,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub last_file: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autosave_delay_ms: default_autosave_delay_ms(),
            data_dir: None,
            last_file: None,
        }
    }
}

impl Settings {
    const FILE: &'static str = "workout_tracker_settings.json";

    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(Self::FILE))
    }

    /// Load settings, falling back to defaults when the file is missing or
    /// unreadable.
    pub fn load() -> Self {
        if let Some(path) = Self::path() {
            if let Ok(data) = std::fs::read_to_string(&path) {
                match serde_json::from_str(&data) {
                    Ok(cfg) => return cfg,
                    Err(e) => log::warn!("Ignoring malformed settings {}: {e}", path.display()),
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) {
        if let Some(path) = Self::path() {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match serde_json::to_string_pretty(self) {
                Ok(data) => {
                    if let Err(e) = std::fs::write(&path, data) {
                        log::error!("Failed to save settings to {}: {e}", path.display());
                    }
                }
                Err(e) => log::error!("Failed to serialize settings: {e}"),
            }
        }
    }

    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    /// Directory for tracker data. The environment variable takes precedence
    /// over the configured directory, which takes precedence over the
    /// platform data directory.
    pub fn resolve_data_dir(&self) -> PathBuf {
        std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| self.data_dir.as_ref().map(PathBuf::from))
            .or_else(|| dirs::data_dir().map(|p| p.join("workout_tracker")))
            .unwrap_or_else(|| PathBuf::from("workout_tracker_data"))
    }
}
