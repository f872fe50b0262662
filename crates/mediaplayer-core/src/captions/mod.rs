//! Subtitle System Module
//!
//! Provides subtitle functionality for the player including:
//! - Cue data models (SubtitleCue, SubtitleCueStore, SubtitleTrack)
//! - Tolerant SRT and VTT parsing, format sniffing, and export
//! - Active-cue lookup by playback position
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Subtitle System                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  models.rs     - Data structures (Cue, CueStore, Track)         │
//! │  formats.rs    - SRT/VTT parsing, detection and export          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```rust
//! use mediaplayer_core::captions::parse_srt;
//!
//! let store = parse_srt("1\n00:00:01,000 --> 00:00:04,000\nHello\n");
//! let active = store.get_active_cues(2_000);
//! assert_eq!(active[0].text, "Hello");
//! ```

mod formats;
mod models;

// Re-export models
pub use models::{SubtitleCue, SubtitleCueStore, SubtitleTrack, LINE_SEPARATOR};

// Re-export format functions
pub use formats::{
    export_srt, export_vtt, format_srt_timestamp, format_vtt_timestamp, parse_srt,
    parse_srt_timing, parse_subtitles, parse_vtt, parse_vtt_timing, SubtitleFormat,
};
