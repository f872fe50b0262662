//! Subtitle Data Models
//!
//! Defines the cue, the immutable cue store produced by a parse call, and the
//! external-facing subtitle track descriptor.

use serde::{Deserialize, Serialize};

use crate::TimeMs;

/// Line separator used when joining cue text lines
pub const LINE_SEPARATOR: &str = "\n";

// =============================================================================
// Subtitle Cue
// =============================================================================

/// A single subtitle entry with a time window and display text
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleCue {
    /// Ordinal from the source file (not necessarily contiguous)
    pub index: u32,
    /// Start time, inclusive
    pub start_time: TimeMs,
    /// End time, exclusive
    pub end_time: TimeMs,
    /// Display lines joined by [`LINE_SEPARATOR`]
    pub text: String,
}

impl SubtitleCue {
    pub fn new(index: u32, start_time: TimeMs, end_time: TimeMs, text: &str) -> Self {
        Self {
            index,
            start_time,
            end_time,
            text: text.to_string(),
        }
    }

    /// Returns true if the cue is visible at `position_ms`
    pub fn is_active_at(&self, position_ms: TimeMs) -> bool {
        self.start_time <= position_ms && position_ms < self.end_time
    }

    /// Iterates over the individual display lines
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.text.split(LINE_SEPARATOR)
    }

    pub fn duration_ms(&self) -> TimeMs {
        self.end_time.saturating_sub(self.start_time)
    }
}

// =============================================================================
// Subtitle Cue Store
// =============================================================================

/// Ordered, immutable collection of cues.
///
/// Order is the order of the source file; no sort is applied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleCueStore {
    cues: Vec<SubtitleCue>,
}

impl SubtitleCueStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    pub fn cues(&self) -> &[SubtitleCue] {
        &self.cues
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SubtitleCue> {
        self.cues.iter()
    }

    /// Returns every cue with `start <= position < end`, in store order.
    pub fn get_active_cues(&self, position_ms: TimeMs) -> Vec<&SubtitleCue> {
        self.cues
            .iter()
            .filter(|cue| cue.is_active_at(position_ms))
            .collect()
    }

    /// Text of the active cues joined by line breaks, or None if nothing shows
    pub fn active_text(&self, position_ms: TimeMs) -> Option<String> {
        let active = self.get_active_cues(position_ms);
        if active.is_empty() {
            return None;
        }
        Some(
            active
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join(LINE_SEPARATOR),
        )
    }

    /// Latest end time across all cues
    pub fn last_end_ms(&self) -> Option<TimeMs> {
        self.cues.iter().map(|c| c.end_time).max()
    }
}

impl From<Vec<SubtitleCue>> for SubtitleCueStore {
    fn from(cues: Vec<SubtitleCue>) -> Self {
        Self { cues }
    }
}

impl<'a> IntoIterator for &'a SubtitleCueStore {
    type Item = &'a SubtitleCue;
    type IntoIter = std::slice::Iter<'a, SubtitleCue>;

    fn into_iter(self) -> Self::IntoIter {
        self.cues.iter()
    }
}

// =============================================================================
// Subtitle Track
// =============================================================================

/// Subtitle track descriptor as exposed to callers
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleTrack {
    /// Display name
    pub label: String,
    /// Language tag (e.g. "en", "pt-BR")
    pub language: String,
    /// URI or local path of the subtitle file
    pub src: String,
}

impl SubtitleTrack {
    pub fn new(label: &str, language: &str, src: &str) -> Self {
        Self {
            label: label.to_string(),
            language: language.to_string(),
            src: src.to_string(),
        }
    }

    pub fn with_label(&self, label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..self.clone()
        }
    }

    pub fn with_language(&self, language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..self.clone()
        }
    }

    pub fn with_src(&self, src: &str) -> Self {
        Self {
            src: src.to_string(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_cue_store() -> SubtitleCueStore {
        SubtitleCueStore::from(vec![
            SubtitleCue::new(1, 1000, 4000, "First"),
            SubtitleCue::new(2, 5000, 8000, "Second"),
        ])
    }

    #[test]
    fn test_get_active_cues() {
        let store = two_cue_store();

        assert!(store.get_active_cues(500).is_empty());

        let active = store.get_active_cues(2000);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].text, "First");

        assert!(store.get_active_cues(4500).is_empty());

        let active = store.get_active_cues(6000);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].text, "Second");
    }

    #[test]
    fn test_active_cue_boundaries() {
        let store = two_cue_store();
        assert_eq!(store.get_active_cues(1000).len(), 1);
        assert!(store.get_active_cues(4000).is_empty());
        assert!(store.get_active_cues(8000).is_empty());
    }

    #[test]
    fn test_overlapping_cues_keep_store_order() {
        let store = SubtitleCueStore::from(vec![
            SubtitleCue::new(7, 2000, 6000, "Later index"),
            SubtitleCue::new(3, 1000, 5000, "Earlier index"),
        ]);

        let active = store.get_active_cues(3000);
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].index, 7);
        assert_eq!(active[1].index, 3);
        assert_eq!(
            store.active_text(3000).as_deref(),
            Some("Later index\nEarlier index")
        );
    }

    #[test]
    fn test_empty_text_cue_does_not_break_lookup() {
        let store = SubtitleCueStore::from(vec![SubtitleCue::new(1, 0, 1000, "")]);
        assert_eq!(store.get_active_cues(500).len(), 1);
        assert!(SubtitleCueStore::new().get_active_cues(500).is_empty());
    }

    #[test]
    fn test_last_end_ms() {
        assert_eq!(two_cue_store().last_end_ms(), Some(8000));
        assert_eq!(SubtitleCueStore::new().last_end_ms(), None);
    }

    #[test]
    fn test_cue_lines_and_duration() {
        let cue = SubtitleCue::new(1, 1500, 4000, "First line\nSecond line");
        assert_eq!(
            cue.lines().collect::<Vec<_>>(),
            vec!["First line", "Second line"]
        );
        assert_eq!(cue.duration_ms(), 2500);
    }

    #[test]
    fn test_track_copy_with_override() {
        let track = SubtitleTrack::new("English", "en", "subs/en.srt");
        let spanish = track.with_label("Español").with_language("es");

        assert_eq!(track.label, "English");
        assert_eq!(spanish.label, "Español");
        assert_eq!(spanish.language, "es");
        assert_eq!(spanish.src, track.src);
        assert_eq!(track, track.with_src("subs/en.srt"));
        assert_ne!(track, spanish);
    }
}
