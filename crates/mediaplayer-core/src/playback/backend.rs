//! Backend Selection
//!
//! Maps backend kinds to engine factories. The kind is fixed at build time
//! (or overridden from settings at startup); platform adapters register their
//! factory before the first player is created.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{AudioOnlyFactory, EngineFactory};
use crate::{CoreError, CoreResult};

/// Native engine families
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    /// Android ExoPlayer
    ExoPlayer,
    /// Desktop GStreamer / JavaFX media
    GStreamer,
    /// Windows Media Foundation
    MediaFoundation,
    /// macOS / iOS AVFoundation
    AvFoundation,
    /// Browser `<video>` element
    Html5Video,
    /// Portable audio-only transport
    AudioOnly,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        BackendKind::ExoPlayer,
        BackendKind::GStreamer,
        BackendKind::MediaFoundation,
        BackendKind::AvFoundation,
        BackendKind::Html5Video,
        BackendKind::AudioOnly,
    ];

    /// Backend native to the build target
    pub fn for_current_target() -> Self {
        if cfg!(target_os = "android") {
            BackendKind::ExoPlayer
        } else if cfg!(target_arch = "wasm32") {
            BackendKind::Html5Video
        } else if cfg!(target_os = "windows") {
            BackendKind::MediaFoundation
        } else if cfg!(any(target_os = "macos", target_os = "ios")) {
            BackendKind::AvFoundation
        } else if cfg!(target_os = "linux") {
            BackendKind::GStreamer
        } else {
            BackendKind::AudioOnly
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::ExoPlayer => write!(f, "exoplayer"),
            BackendKind::GStreamer => write!(f, "gstreamer"),
            BackendKind::MediaFoundation => write!(f, "media-foundation"),
            BackendKind::AvFoundation => write!(f, "avfoundation"),
            BackendKind::Html5Video => write!(f, "html5-video"),
            BackendKind::AudioOnly => write!(f, "audio-only"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exoplayer" | "android" => Ok(BackendKind::ExoPlayer),
            "gstreamer" | "javafx" | "desktop" => Ok(BackendKind::GStreamer),
            "media-foundation" | "mediafoundation" | "windows" => {
                Ok(BackendKind::MediaFoundation)
            }
            "avfoundation" | "apple" => Ok(BackendKind::AvFoundation),
            "html5-video" | "html5" | "web" => Ok(BackendKind::Html5Video),
            "audio-only" | "audioonly" | "audio" => Ok(BackendKind::AudioOnly),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Registered engine factories, keyed by kind
pub struct BackendRegistry {
    factories: HashMap<BackendKind, Arc<dyn EngineFactory>>,
}

impl BackendRegistry {
    /// Creates a registry holding only the audio-only backend
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(Arc::new(AudioOnlyFactory));
        registry
    }

    /// Registers a factory, replacing any previous one of the same kind
    pub fn register(&mut self, factory: Arc<dyn EngineFactory>) {
        let kind = factory.kind();
        if self.factories.insert(kind, factory).is_some() {
            debug!("Replaced engine factory for {}", kind);
        }
    }

    pub fn resolve(&self, kind: BackendKind) -> CoreResult<Arc<dyn EngineFactory>> {
        self.factories
            .get(&kind)
            .cloned()
            .ok_or(CoreError::BackendUnavailable(kind))
    }

    /// Resolves `kind`, falling back to the audio-only backend
    pub fn resolve_or_audio_only(&self, kind: BackendKind) -> Arc<dyn EngineFactory> {
        match self.resolve(kind) {
            Ok(factory) => factory,
            Err(e) => {
                warn!("{}, falling back to audio-only", e);
                Arc::new(AudioOnlyFactory)
            }
        }
    }

    /// Registered kinds, sorted
    pub fn available(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_display_roundtrip() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.to_string().parse::<BackendKind>().unwrap(), kind);
        }
        assert_eq!("AUDIO".parse::<BackendKind>().unwrap(), BackendKind::AudioOnly);
        assert!("vlc".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_registry_defaults_to_audio_only() {
        let registry = BackendRegistry::new();
        assert_eq!(registry.available(), vec![BackendKind::AudioOnly]);
        assert!(registry.resolve(BackendKind::AudioOnly).is_ok());
        assert!(matches!(
            registry.resolve(BackendKind::ExoPlayer),
            Err(CoreError::BackendUnavailable(BackendKind::ExoPlayer))
        ));
        assert_eq!(
            registry.resolve_or_audio_only(BackendKind::GStreamer).kind(),
            BackendKind::AudioOnly
        );
    }
}
