//! MediaPlayer Core Library
//!
//! Platform-independent core of the media player component.
//! This library contains the subtitle cue model, SRT/VTT parsing and lookup,
//! the time codec used by seek bars, and the playback state model that every
//! native engine adapter is driven through.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       MediaPlayer Core                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  timecode.rs   - MM:SS / HH:MM:SS <-> milliseconds              │
//! │  captions/     - Cue model, cue store, SRT/VTT parse + export   │
//! │  loader.rs     - Subtitle byte-source (file, http)              │
//! │  playback/     - Engine contract, backends, MediaPlayer         │
//! │  settings/     - Persisted player settings                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Native engines (ExoPlayer, GStreamer, Media Foundation, AVFoundation,
//! HTML5 video) are external collaborators: adapters implement
//! [`playback::MediaEngine`] and register an [`playback::EngineFactory`]
//! with a [`playback::BackendRegistry`] at startup.

pub mod captions;
pub mod loader;
pub mod playback;
pub mod settings;
pub mod timecode;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
