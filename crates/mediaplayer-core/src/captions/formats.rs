//! Subtitle Format Parsers and Exporters
//!
//! Supports parsing and exporting subtitles in:
//! - SRT (SubRip)
//! - VTT (WebVTT)
//!
//! Parsing is tolerant: a malformed block is dropped and parsing continues
//! with the next one. The parsers never fail; worst case the store is empty.
//!
//! # Example
//!
//! ```rust
//! use mediaplayer_core::captions::{parse_subtitles, export_vtt};
//!
//! let store = parse_subtitles("1\n00:00:01,000 --> 00:00:04,000\nHello\n");
//! assert_eq!(store.len(), 1);
//! assert!(export_vtt(&store).starts_with("WEBVTT"));
//! ```

use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::debug;

use super::{SubtitleCue, SubtitleCueStore, LINE_SEPARATOR};
use crate::TimeMs;

// =============================================================================
// Format Detection
// =============================================================================

/// Text subtitle format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubtitleFormat {
    Srt,
    WebVtt,
}

impl SubtitleFormat {
    /// Sniffs the format from content. Remote sources often carry no usable
    /// extension, so the file name is never consulted.
    pub fn detect(content: &str) -> Self {
        let body = content.trim_start_matches('\u{feff}').trim_start();
        if body.starts_with("WEBVTT") {
            Self::WebVtt
        } else {
            Self::Srt
        }
    }
}

impl std::fmt::Display for SubtitleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubtitleFormat::Srt => write!(f, "srt"),
            SubtitleFormat::WebVtt => write!(f, "vtt"),
        }
    }
}

/// Parses SRT or WebVTT content, chosen by [`SubtitleFormat::detect`].
pub fn parse_subtitles(content: &str) -> SubtitleCueStore {
    match SubtitleFormat::detect(content) {
        SubtitleFormat::Srt => parse_srt(content),
        SubtitleFormat::WebVtt => parse_vtt(content),
    }
}

// =============================================================================
// Shared Helpers
// =============================================================================

/// Strips a BOM and normalizes CRLF / CR line endings to LF
fn normalize_newlines(content: &str) -> String {
    content
        .trim_start_matches('\u{feff}')
        .replace("\r\n", "\n")
        .replace('\r', "\n")
}

/// Groups lines into runs of non-blank lines
fn split_blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in content.split('\n') {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

fn to_ms(hours: &str, minutes: &str, seconds: &str, millis: &str) -> Option<TimeMs> {
    let hours: u64 = hours.parse().ok()?;
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }
    // "5" means 500ms, "05" means 50ms
    let millis: u64 = format!("{:0<3}", millis).parse().ok()?;

    hours
        .checked_mul(3_600_000)?
        .checked_add(minutes * 60_000 + seconds * 1_000 + millis)
}

fn checked_window(start: TimeMs, end: TimeMs) -> Option<(TimeMs, TimeMs)> {
    (start <= end).then_some((start, end))
}

// =============================================================================
// SRT Format
// =============================================================================

fn srt_timing_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(\d+):(\d{1,2}):(\d{1,2})[,.](\d{1,3})\s*-->\s*(\d+):(\d{1,2}):(\d{1,2})[,.](\d{1,3})(?:\s.*)?$",
        )
        .expect("SRT timing pattern is valid")
    })
}

/// Parses an SRT timing line (e.g. "00:00:01,000 --> 00:00:04,000").
///
/// Trailing position hints after the end timestamp are ignored.
pub fn parse_srt_timing(line: &str) -> Option<(TimeMs, TimeMs)> {
    let caps = srt_timing_regex().captures(line)?;
    let start = to_ms(&caps[1], &caps[2], &caps[3], &caps[4])?;
    let end = to_ms(&caps[5], &caps[6], &caps[7], &caps[8])?;
    checked_window(start, end)
}

fn parse_srt_index(line: &str) -> Option<u32> {
    line.trim().parse::<u32>().ok().filter(|n| *n > 0)
}

/// Splits a block where a new "index + timing" pair starts without the
/// usual blank separator line.
fn recover_srt_blocks<'a>(block: &[&'a str]) -> Vec<Vec<&'a str>> {
    let mut parts = Vec::new();
    let mut start = 0;

    for i in 1..block.len().saturating_sub(1) {
        if i > start + 1
            && parse_srt_index(block[i]).is_some()
            && parse_srt_timing(block[i + 1]).is_some()
        {
            parts.push(block[start..i].to_vec());
            start = i;
        }
    }
    parts.push(block[start..].to_vec());

    parts
}

fn parse_srt_block(block: &[&str]) -> Option<SubtitleCue> {
    let (index_line, rest) = block.split_first()?;
    let Some(index) = parse_srt_index(index_line) else {
        debug!("Dropping SRT block: bad sequence number {:?}", index_line);
        return None;
    };

    let (timing_line, text_lines) = rest.split_first()?;
    let Some((start, end)) = parse_srt_timing(timing_line) else {
        debug!("Dropping SRT cue {}: bad timing line {:?}", index, timing_line);
        return None;
    };

    let text = text_lines
        .iter()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join(LINE_SEPARATOR);
    if text.trim().is_empty() {
        debug!("Dropping SRT cue {}: no text", index);
        return None;
    }

    Some(SubtitleCue {
        index,
        start_time: start,
        end_time: end,
        text,
    })
}

/// Parses SRT (SubRip) content into a cue store
///
/// # SRT Format
///
/// ```text
/// 1
/// 00:00:01,000 --> 00:00:04,000
/// First caption text
///
/// 2
/// 00:00:05,500 --> 00:00:08,000
/// Second caption text
/// with multiple lines
/// ```
///
/// Blocks with a missing or non-positive sequence number, or an unparsable
/// timing line, are skipped. Sequence numbers are not checked for order or
/// uniqueness.
pub fn parse_srt(content: &str) -> SubtitleCueStore {
    let normalized = normalize_newlines(content);
    let mut cues = Vec::new();
    let mut dropped = 0usize;

    for block in split_blocks(&normalized) {
        for part in recover_srt_blocks(&block) {
            match parse_srt_block(&part) {
                Some(cue) => cues.push(cue),
                None => dropped += 1,
            }
        }
    }

    if dropped > 0 {
        debug!("SRT parse kept {} cues, dropped {} blocks", cues.len(), dropped);
    }

    SubtitleCueStore::from(cues)
}

/// Formats milliseconds as an SRT timestamp (00:00:00,000)
pub fn format_srt_timestamp(ms: TimeMs) -> String {
    let (hours, mins, secs, millis) = split_ms(ms);
    format!("{:02}:{:02}:{:02},{:03}", hours, mins, secs, millis)
}

fn split_ms(ms: TimeMs) -> (u64, u64, u64, u64) {
    let millis = ms % 1000;
    let total_secs = ms / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;
    (hours, mins, secs, millis)
}

/// Exports a cue store to SRT, numbering cues from 1
pub fn export_srt(store: &SubtitleCueStore) -> String {
    let mut output = String::new();

    for (i, cue) in store.iter().enumerate() {
        output.push_str(&format!("{}\n", i + 1));
        output.push_str(&format!(
            "{} --> {}\n",
            format_srt_timestamp(cue.start_time),
            format_srt_timestamp(cue.end_time)
        ));
        output.push_str(&cue.text);
        output.push_str("\n\n");
    }

    output.trim_end().to_string()
}

// =============================================================================
// VTT Format
// =============================================================================

fn vtt_timing_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(\d+):)?(\d{1,2}):(\d{2})\.(\d{3})\s*-->\s*(?:(\d+):)?(\d{1,2}):(\d{2})\.(\d{3})(?:\s.*)?$",
        )
        .expect("VTT timing pattern is valid")
    })
}

fn vtt_timestamp(caps: &Captures<'_>, offset: usize) -> Option<TimeMs> {
    let hours = caps.get(offset).map_or("0", |m| m.as_str());
    to_ms(
        hours,
        &caps[offset + 1],
        &caps[offset + 2],
        &caps[offset + 3],
    )
}

/// Parses a VTT timing line (e.g. "00:01.000 --> 00:04.000 align:start").
///
/// Cue settings after the end timestamp are ignored.
pub fn parse_vtt_timing(line: &str) -> Option<(TimeMs, TimeMs)> {
    let caps = vtt_timing_regex().captures(line)?;
    let start = vtt_timestamp(&caps, 1)?;
    let end = vtt_timestamp(&caps, 5)?;
    checked_window(start, end)
}

/// Strips VTT markup tags and decodes the common character references
fn clean_vtt_text(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;

    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }

    result
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

fn is_vtt_metadata_block(first_line: &str) -> bool {
    let first = first_line.trim_start();
    first.starts_with("WEBVTT")
        || first == "NOTE"
        || first.starts_with("NOTE ")
        || first == "STYLE"
        || first == "REGION"
}

fn parse_vtt_block(block: &[&str], ordinal: u32) -> Option<SubtitleCue> {
    let (first, rest) = block.split_first()?;

    // The cue identifier line is optional
    let (identifier, timing_line, text_lines) = if first.contains("-->") {
        (None, *first, rest)
    } else {
        let (timing, text) = rest.split_first()?;
        (Some(first.trim()), *timing, text)
    };

    let Some((start, end)) = parse_vtt_timing(timing_line) else {
        debug!("Dropping VTT block: bad timing line {:?}", timing_line);
        return None;
    };

    let text = text_lines
        .iter()
        .map(|l| clean_vtt_text(l.trim_end()))
        .collect::<Vec<_>>()
        .join(LINE_SEPARATOR);
    if text.trim().is_empty() {
        debug!("Dropping VTT cue at {}ms: no text", start);
        return None;
    }

    let index = identifier
        .and_then(|id| id.parse::<u32>().ok())
        .unwrap_or(ordinal);

    Some(SubtitleCue {
        index,
        start_time: start,
        end_time: end,
        text,
    })
}

/// Parses WebVTT content into a cue store
///
/// # VTT Format
///
/// ```text
/// WEBVTT
///
/// 00:00:01.000 --> 00:00:04.000
/// First caption text
///
/// intro
/// 00:05.500 --> 00:08.000 line:90%
/// <v Narrator>Second caption text</v>
/// ```
///
/// The header, `NOTE`, `STYLE` and `REGION` blocks are skipped. Cues without
/// a numeric identifier are numbered by their position in the output.
pub fn parse_vtt(content: &str) -> SubtitleCueStore {
    let normalized = normalize_newlines(content);
    let mut cues = Vec::new();
    let mut dropped = 0usize;

    for block in split_blocks(&normalized) {
        if block.first().is_some_and(|l| is_vtt_metadata_block(l)) {
            continue;
        }
        let ordinal = cues.len() as u32 + 1;
        match parse_vtt_block(&block, ordinal) {
            Some(cue) => cues.push(cue),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("VTT parse kept {} cues, dropped {} blocks", cues.len(), dropped);
    }

    SubtitleCueStore::from(cues)
}

/// Formats milliseconds as a VTT timestamp (00:00:00.000)
pub fn format_vtt_timestamp(ms: TimeMs) -> String {
    let (hours, mins, secs, millis) = split_ms(ms);
    format!("{:02}:{:02}:{:02}.{:03}", hours, mins, secs, millis)
}

/// Exports a cue store to WebVTT
pub fn export_vtt(store: &SubtitleCueStore) -> String {
    let mut output = String::from("WEBVTT\n\n");

    for cue in store {
        output.push_str(&format!(
            "{} --> {}\n",
            format_vtt_timestamp(cue.start_time),
            format_vtt_timestamp(cue.end_time)
        ));
        output.push_str(&cue.text);
        output.push_str("\n\n");
    }

    output.trim_end().to_string()
}

// =============================================================================
// Tests
// =============================================================================
