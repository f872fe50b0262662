//! Native Engine Contract
//!
//! Every platform adapter (ExoPlayer, GStreamer, Media Foundation,
//! AVFoundation, HTML5 video, audio-only) wraps its native player behind
//! [`MediaEngine`] and hands out fresh handles through [`EngineFactory`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::BackendKind;
use crate::{AudioLevels, CoreError, CoreResult, EngineResult, TimeMs};

// =============================================================================
// Media Source
// =============================================================================

/// A media location, classified once at `open` time
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaSource {
    /// `http://` or `https://` URL
    Remote(String),
    /// Local file
    Local(PathBuf),
}

impl MediaSource {
    /// Classifies a URI or path. `http`/`https` (any case) is remote,
    /// `file://` URIs and everything else are local files.
    pub fn classify(src: &str) -> CoreResult<Self> {
        let src = src.trim();
        if src.is_empty() {
            return Err(CoreError::InvalidSource("empty source".to_string()));
        }

        let lower = src.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(Self::Remote(src.to_string()));
        }
        if lower.starts_with("file://") {
            let path = &src["file://".len()..];
            if path.is_empty() {
                return Err(CoreError::InvalidSource(src.to_string()));
            }
            return Ok(Self::Local(PathBuf::from(path)));
        }

        Ok(Self::Local(PathBuf::from(src)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

impl std::fmt::Display for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaSource::Remote(url) => write!(f, "{}", url),
            MediaSource::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

// =============================================================================
// Engine Callbacks
// =============================================================================

/// Raw transport event emitted by a native engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    Connecting,
    Playing,
    Paused,
    Stopped,
}

/// Receiver for native engine notifications.
///
/// Events must be delivered in the order the engine produces them.
pub trait EngineCallback: Send + Sync {
    fn on_event(&self, event: EngineEvent);

    /// Advisory metadata such as `duration` or `audioSampleRate`
    fn on_metadata(&self, key: &str, value: &str);

    fn on_error(&self, message: &str);
}

// =============================================================================
// Engine Handle
// =============================================================================

/// One native engine handle. Never shared across player instances.
///
/// `set_volume`, `set_looping` and `set_callback` must not invoke the
/// callback; the transport methods may invoke it synchronously.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Resolves `source` and prepares it, starting playback if `autoplay`.
    async fn open(&self, source: &MediaSource, autoplay: bool) -> EngineResult<()>;

    fn play(&self) -> EngineResult<()>;

    fn pause(&self) -> EngineResult<()>;

    fn stop(&self) -> EngineResult<()>;

    fn seek_to(&self, position_ms: TimeMs) -> EngineResult<()>;

    /// `volume` is already clamped to `[0.0, 1.0]`
    fn set_volume(&self, volume: f32) -> EngineResult<()>;

    fn set_looping(&self, looping: bool) -> EngineResult<()>;

    fn position_ms(&self) -> EngineResult<TimeMs>;

    /// `Ok(None)` for live or unknown-length media
    fn duration_ms(&self) -> EngineResult<Option<TimeMs>>;

    /// True when nothing is loaded or playback was stopped
    fn is_empty(&self) -> bool;

    fn is_paused(&self) -> bool;

    /// Current per-channel output level, if the engine meters audio
    fn audio_levels(&self) -> Option<AudioLevels> {
        None
    }

    fn set_callback(&self, callback: Option<Arc<dyn EngineCallback>>);

    /// Releases the native resources. Safe to call more than once.
    fn close(&self);
}

/// Creates engine handles for one backend
pub trait EngineFactory: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn create_engine(&self) -> EngineResult<Arc<dyn MediaEngine>>;
}
