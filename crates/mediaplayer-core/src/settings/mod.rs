//! Player Settings Persistence
//!
//! Provides persistent player settings with:
//! - Atomic file writes (temp file + rename)
//! - Tolerant loading with defaults for missing or bad values
//! - An advisory lock file so two processes never write at once
//!
//! Storage location: {config_dir}/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::loader::DEFAULT_FETCH_TIMEOUT_SECS;
use crate::playback::BackendKind;
use crate::{CoreError, CoreResult};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Backend value meaning "pick the backend for the current target"
pub const AUTO_BACKEND: &str = "auto";

/// Player settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Initial volume (0.0 - 1.0)
    #[serde(default = "default_volume")]
    pub default_volume: f32,

    /// Loop playback
    #[serde(default)]
    pub loop_playback: bool,

    /// Engine backend: "auto" or a backend name such as "gstreamer"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Subtitle settings
    #[serde(default)]
    pub subtitles: SubtitleSettings,

    /// Audio level metering
    #[serde(default)]
    pub audio_levels: AudioLevelSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

fn default_volume() -> f32 {
    0.8
}

fn default_backend() -> String {
    AUTO_BACKEND.to_string()
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            default_volume: default_volume(),
            loop_playback: false,
            backend: default_backend(),
            subtitles: SubtitleSettings::default(),
            audio_levels: AudioLevelSettings::default(),
        }
    }
}

impl PlayerSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    ///
    /// Bad values are corrected rather than rejected.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        self.default_volume = if self.default_volume.is_finite() {
            self.default_volume.clamp(0.0, 1.0)
        } else {
            default_volume()
        };

        if !self.backend.eq_ignore_ascii_case(AUTO_BACKEND)
            && self.backend.parse::<BackendKind>().is_err()
        {
            warn!("Unknown backend {:?} in settings, using auto", self.backend);
            self.backend = default_backend();
        }
        self.backend = self.backend.to_ascii_lowercase();

        self.subtitles.fetch_timeout_secs = self.subtitles.fetch_timeout_secs.clamp(1, 300);
        if self.subtitles.preferred_language.trim().is_empty() {
            self.subtitles.preferred_language = default_language();
        }
    }

    /// Resolves the configured backend, falling back to the build target
    pub fn backend_kind(&self) -> BackendKind {
        self.backend
            .parse()
            .unwrap_or_else(|_| BackendKind::for_current_target())
    }
}

/// Subtitle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleSettings {
    /// Show subtitles when a track is available
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Preferred subtitle language tag
    #[serde(default = "default_language")]
    pub preferred_language: String,

    /// Timeout for fetching subtitle files, in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for SubtitleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            preferred_language: default_language(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_language() -> String {
    "en".to_string()
}

fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

/// Audio level metering settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioLevelSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AudioLevelSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Settings manager for loading, saving, and resetting settings
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager storing into `config_dir`
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            settings_path: config_dir.join(SETTINGS_FILE),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(
        &self,
        exclusive: bool,
        op: impl FnOnce() -> CoreResult<T>,
    ) -> CoreResult<T> {
        // Ensure parent directory exists so the lock file can be created.
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &PathBuf {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if missing or unreadable
    pub fn load(&self) -> PlayerSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(PlayerSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings = serde_json::from_str::<PlayerSettings>(&content)?;

            if settings.version < SETTINGS_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    settings.version, SETTINGS_VERSION
                );
            }

            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                PlayerSettings::default()
            }
        }
    }

    /// Save settings to disk using atomic write (temp file + rename)
    pub fn save(&self, settings: &PlayerSettings) -> CoreResult<PlayerSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            let content = serde_json::to_string_pretty(&normalized)?;

            let temp_path = self.settings_path.with_extension("json.tmp");
            if temp_path.exists() {
                let _ = fs::remove_file(&temp_path);
            }

            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;

            if cfg!(windows) && self.settings_path.exists() {
                // rename does not overwrite on Windows
                fs::remove_file(&self.settings_path)?;
            }
            fs::rename(&temp_path, &self.settings_path).map_err(|e| {
                CoreError::Settings(format!("Failed to finalize settings file: {}", e))
            })?;

            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> CoreResult<PlayerSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(PlayerSettings::default())
        })
    }
}
