//! MediaPlayer Core Type Definitions
//!
//! Defines fundamental types used throughout the project.

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Player instance identifier (ULID)
pub type PlayerId = String;

// =============================================================================
// Time Types
// =============================================================================

/// Time in milliseconds. Never negative.
pub type TimeMs = u64;

// =============================================================================
// Playback State
// =============================================================================

/// Normalized playback state. Exactly one holds at a time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Buffering,
    #[default]
    Idle,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
            PlaybackState::Buffering => write!(f, "buffering"),
            PlaybackState::Idle => write!(f, "idle"),
        }
    }
}

// =============================================================================
// Media Metadata
// =============================================================================

/// Media metadata reported by the native engine.
///
/// Every field is independently optional: `None` means unknown, not zero.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    /// Duration in milliseconds
    pub duration: Option<TimeMs>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Bitrate in bits per second
    pub bitrate: Option<u64>,
    pub frame_rate: Option<f32>,
    pub mime_type: Option<String>,
    pub audio_channels: Option<u16>,
    pub audio_sample_rate: Option<u32>,
}

impl VideoMetadata {
    /// Creates an empty metadata record
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no field has been populated yet
    pub fn is_all_null(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.duration.is_none()
            && self.width.is_none()
            && self.height.is_none()
            && self.bitrate.is_none()
            && self.frame_rate.is_none()
            && self.mime_type.is_none()
            && self.audio_channels.is_none()
            && self.audio_sample_rate.is_none()
    }

    /// Applies a single `key = value` pair as reported by an engine callback.
    ///
    /// Returns false for unknown keys or values that do not parse.
    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        let value = value.trim();
        match key {
            "title" => self.title = Some(value.to_string()),
            "artist" => self.artist = Some(value.to_string()),
            "mimeType" => self.mime_type = Some(value.to_string()),
            "duration" => match value.parse() {
                Ok(v) => self.duration = Some(v),
                Err(_) => return false,
            },
            "width" => match value.parse() {
                Ok(v) => self.width = Some(v),
                Err(_) => return false,
            },
            "height" => match value.parse() {
                Ok(v) => self.height = Some(v),
                Err(_) => return false,
            },
            "bitrate" => match value.parse() {
                Ok(v) => self.bitrate = Some(v),
                Err(_) => return false,
            },
            "frameRate" => match value.parse::<f32>() {
                Ok(v) if v.is_finite() => self.frame_rate = Some(v),
                _ => return false,
            },
            "audioChannels" => match value.parse() {
                Ok(v) => self.audio_channels = Some(v),
                Err(_) => return false,
            },
            "audioSampleRate" => match value.parse() {
                Ok(v) => self.audio_sample_rate = Some(v),
                Err(_) => return false,
            },
            _ => return false,
        }
        true
    }
}

// =============================================================================
// Audio Levels
// =============================================================================

/// Per-channel output level, each in `[0.0, 1.0]`
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioLevels {
    pub left: f32,
    pub right: f32,
}

impl AudioLevels {
    pub fn new(left: f32, right: f32) -> Self {
        Self {
            left: clamp_level(left),
            right: clamp_level(right),
        }
    }

    /// Scales both channels by a volume factor
    pub fn scaled(self, volume: f32) -> Self {
        Self::new(self.left * volume, self.right * volume)
    }
}

fn clamp_level(value: f32) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_default_is_all_null() {
        assert!(VideoMetadata::new().is_all_null());
        assert!(VideoMetadata::default().is_all_null());
    }

    #[test]
    fn test_metadata_single_field_not_all_null() {
        let with_title = VideoMetadata {
            title: Some("Clip".to_string()),
            ..Default::default()
        };
        assert!(!with_title.is_all_null());

        let with_rate = VideoMetadata {
            audio_sample_rate: Some(48_000),
            ..Default::default()
        };
        assert!(!with_rate.is_all_null());
    }

    #[test]
    fn test_metadata_apply() {
        let mut meta = VideoMetadata::new();
        assert!(meta.apply("duration", "120000"));
        assert!(meta.apply("frameRate", "29.97"));
        assert!(!meta.apply("width", "wide"));
        assert!(!meta.apply("unknownKey", "1"));

        assert_eq!(meta.duration, Some(120_000));
        assert_eq!(meta.width, None);
        assert!(meta.frame_rate.is_some());
    }

    #[test]
    fn test_audio_levels_clamped() {
        let levels = AudioLevels::new(1.7, -0.2);
        assert_eq!(levels.left, 1.0);
        assert_eq!(levels.right, 0.0);
        assert_eq!(AudioLevels::new(f32::NAN, 0.5).left, 0.0);
        assert_eq!(AudioLevels::new(0.8, 0.4).scaled(0.5), AudioLevels::new(0.4, 0.2));
    }

    #[test]
    fn test_playback_state_default_idle() {
        assert_eq!(PlaybackState::default(), PlaybackState::Idle);
        assert_eq!(PlaybackState::Buffering.to_string(), "buffering");
    }
}
