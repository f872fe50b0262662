//! Playback Module
//!
//! Normalizes native engine behavior into one playback state model.
//!
//! # Architecture
//!
//! ```text
//! MediaPlayer ──> EngineFactory (per backend) ──> MediaEngine handle
//!      ^                                              │
//!      └──────────── EngineCallback events ───────────┘
//! ```

mod audio_only;
mod backend;
mod engine;
mod player;

pub use audio_only::{AudioOnlyEngine, AudioOnlyFactory, LEVEL_WINDOW_MS};
pub use backend::{BackendKind, BackendRegistry};
pub use engine::{EngineCallback, EngineEvent, EngineFactory, MediaEngine, MediaSource};
pub use player::{
    ErrorListener, MediaPlayer, OpenOutcome, OpenTicket, SubtitleOutcome, SubtitleTicket,
};
