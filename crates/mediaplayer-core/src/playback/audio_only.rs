//! Audio-Only Engine
//!
//! Portable reference backend. It runs a wall-clock transport (play, pause,
//! seek, loop, stop) without any native media stack. Local WAV files are
//! probed with `hound` for duration, channel layout and a per-channel level
//! envelope; other local files and remote streams play with unknown duration.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use super::{BackendKind, EngineCallback, EngineEvent, EngineFactory, MediaEngine, MediaSource};
use crate::{AudioLevels, EngineError, EngineResult, TimeMs};

/// Level envelope resolution
pub const LEVEL_WINDOW_MS: u64 = 50;

// =============================================================================
// WAV Probe
// =============================================================================

/// What the engine learned from a WAV header and its samples
#[derive(Clone, Debug)]
struct WavProbe {
    channels: u16,
    sample_rate: u32,
    duration_ms: TimeMs,
    /// RMS level per [`LEVEL_WINDOW_MS`] window
    envelope: Vec<AudioLevels>,
}

impl WavProbe {
    fn level_at(&self, position_ms: TimeMs) -> AudioLevels {
        let idx = (position_ms / LEVEL_WINDOW_MS) as usize;
        self.envelope.get(idx).copied().unwrap_or_default()
    }
}

fn is_wav_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("wave"))
}

fn probe_wav(path: &Path) -> Result<WavProbe, hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return Err(hound::Error::FormatError("zero sample rate or channels"));
    }

    let frames = reader.duration() as u64;
    let duration_ms = frames * 1000 / spec.sample_rate as u64;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().filter_map(Result::ok).collect(),
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .filter_map(Result::ok)
                .map(|s| s as f32 / scale)
                .collect()
        }
    };

    let envelope = level_envelope(&samples, spec.channels as usize, spec.sample_rate);

    Ok(WavProbe {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        duration_ms,
        envelope,
    })
}

/// Windowed RMS per channel. Mono feeds both sides; channels past the
/// second are ignored.
fn level_envelope(samples: &[f32], channels: usize, sample_rate: u32) -> Vec<AudioLevels> {
    let frames_per_window = ((sample_rate as u64 * LEVEL_WINDOW_MS / 1000) as usize).max(1);
    let right_channel = if channels >= 2 { 1 } else { 0 };

    samples
        .chunks(frames_per_window * channels)
        .map(|window| {
            let mut sum_l = 0.0f64;
            let mut sum_r = 0.0f64;
            let mut n = 0usize;
            for frame in window.chunks_exact(channels) {
                sum_l += (frame[0] as f64).powi(2);
                sum_r += (frame[right_channel] as f64).powi(2);
                n += 1;
            }
            if n == 0 {
                return AudioLevels::default();
            }
            AudioLevels::new(
                (sum_l / n as f64).sqrt() as f32,
                (sum_r / n as f64).sqrt() as f32,
            )
        })
        .collect()
}

// =============================================================================
// Transport
// =============================================================================

#[derive(Default)]
struct Transport {
    source: Option<MediaSource>,
    probe: Option<WavProbe>,
    /// Position at the last anchor point
    anchor_ms: TimeMs,
    /// Set while playing
    started_at: Option<Instant>,
    stopped: bool,
    volume: f32,
    looping: bool,
}

impl Transport {
    fn duration_ms(&self) -> Option<TimeMs> {
        self.probe.as_ref().map(|p| p.duration_ms)
    }

    fn raw_position(&self) -> TimeMs {
        let elapsed = self
            .started_at
            .map_or(0, |t| t.elapsed().as_millis() as TimeMs);
        self.anchor_ms + elapsed
    }

    fn position(&self) -> TimeMs {
        let pos = self.raw_position();
        match self.duration_ms() {
            Some(0) => 0,
            Some(d) if self.looping => pos % d,
            Some(d) => pos.min(d),
            None => pos,
        }
    }

    /// True once a non-looping timed source has played to the end
    fn reached_end(&self) -> bool {
        match self.duration_ms() {
            Some(d) => self.started_at.is_some() && !self.looping && self.raw_position() >= d,
            None => false,
        }
    }

    fn freeze(&mut self) {
        self.anchor_ms = self.position();
        self.started_at = None;
    }
}

/// Audio-only engine handle
pub struct AudioOnlyEngine {
    transport: Mutex<Transport>,
    callback: Mutex<Option<Arc<dyn EngineCallback>>>,
}

impl AudioOnlyEngine {
    pub fn new() -> Self {
        Self {
            transport: Mutex::new(Transport {
                volume: 1.0,
                ..Default::default()
            }),
            callback: Mutex::new(None),
        }
    }

    fn transport(&self) -> MutexGuard<'_, Transport> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callback(&self) -> Option<Arc<dyn EngineCallback>> {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(cb) = self.callback() {
            cb.on_event(event);
        }
    }

    fn emit_metadata(&self, key: &str, value: &str) {
        if let Some(cb) = self.callback() {
            cb.on_metadata(key, value);
        }
    }

    /// Parks the transport at the end of the media once it has run out
    fn settle(&self) {
        let ended = {
            let mut t = self.transport();
            if t.reached_end() {
                t.freeze();
                true
            } else {
                false
            }
        };
        if ended {
            debug!("Audio-only engine reached end of media");
            self.emit(EngineEvent::Paused);
        }
    }

    async fn resolve(source: &MediaSource) -> EngineResult<Option<WavProbe>> {
        let path = match source {
            MediaSource::Remote(_) => return Ok(None),
            MediaSource::Local(path) => path.clone(),
        };

        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(EngineError::Source(format!(
                "Not a file: {}",
                path.display()
            )));
        }

        if !is_wav_path(&path) {
            return Ok(None);
        }

        let probe = tokio::task::spawn_blocking(move || probe_wav(&path))
            .await
            .map_err(|e| EngineError::Other(format!("WAV probe task failed: {}", e)))?;

        match probe {
            Ok(probe) => Ok(Some(probe)),
            Err(hound::Error::IoError(e)) => Err(e.into()),
            Err(e) => Err(EngineError::Codec(format!("Unreadable WAV: {}", e))),
        }
    }
}

impl Default for AudioOnlyEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for AudioOnlyEngine {
    async fn open(&self, source: &MediaSource, autoplay: bool) -> EngineResult<()> {
        self.emit(EngineEvent::Connecting);

        let probe = Self::resolve(source).await?;

        if let Some(p) = &probe {
            self.emit_metadata("duration", &p.duration_ms.to_string());
            self.emit_metadata("audioChannels", &p.channels.to_string());
            self.emit_metadata("audioSampleRate", &p.sample_rate.to_string());
            self.emit_metadata("mimeType", "audio/wav");
        }
        if let MediaSource::Local(path) = source {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                self.emit_metadata("title", stem);
            }
        }

        {
            let mut t = self.transport();
            t.source = Some(source.clone());
            t.probe = probe;
            t.anchor_ms = 0;
            t.stopped = false;
            t.started_at = autoplay.then(Instant::now);
        }

        self.emit(if autoplay {
            EngineEvent::Playing
        } else {
            EngineEvent::Paused
        });
        Ok(())
    }

    fn play(&self) -> EngineResult<()> {
        {
            let mut t = self.transport();
            if t.source.is_none() {
                return Err(EngineError::Other("No media loaded".to_string()));
            }
            if t.started_at.is_some() {
                return Ok(());
            }
            let at_end = t.duration_ms().is_some_and(|d| t.anchor_ms >= d);
            if t.stopped || at_end {
                t.anchor_ms = 0;
            }
            t.stopped = false;
            t.started_at = Some(Instant::now());
        }
        self.emit(EngineEvent::Playing);
        Ok(())
    }

    fn pause(&self) -> EngineResult<()> {
        {
            let mut t = self.transport();
            if t.source.is_none() || t.stopped {
                return Ok(());
            }
            t.freeze();
        }
        self.emit(EngineEvent::Paused);
        Ok(())
    }

    fn stop(&self) -> EngineResult<()> {
        {
            let mut t = self.transport();
            if t.source.is_none() {
                return Ok(());
            }
            t.started_at = None;
            t.anchor_ms = 0;
            t.stopped = true;
        }
        self.emit(EngineEvent::Stopped);
        Ok(())
    }

    fn seek_to(&self, position_ms: TimeMs) -> EngineResult<()> {
        let mut t = self.transport();
        if t.source.is_none() {
            return Err(EngineError::Other("No media loaded".to_string()));
        }
        let target = match t.duration_ms() {
            Some(d) => position_ms.min(d),
            None => position_ms,
        };
        t.anchor_ms = target;
        if t.started_at.is_some() {
            t.started_at = Some(Instant::now());
        }
        Ok(())
    }

    fn set_volume(&self, volume: f32) -> EngineResult<()> {
        self.transport().volume = volume;
        Ok(())
    }

    fn set_looping(&self, looping: bool) -> EngineResult<()> {
        let mut t = self.transport();
        if looping != t.looping {
            // Re-anchor so the wrap point is computed from the current position
            let pos = t.position();
            t.looping = looping;
            t.anchor_ms = pos;
            if t.started_at.is_some() {
                t.started_at = Some(Instant::now());
            }
        }
        Ok(())
    }

    fn position_ms(&self) -> EngineResult<TimeMs> {
        self.settle();
        let t = self.transport();
        if t.source.is_none() {
            return Err(EngineError::Other("No media loaded".to_string()));
        }
        Ok(t.position())
    }

    fn duration_ms(&self) -> EngineResult<Option<TimeMs>> {
        let t = self.transport();
        if t.source.is_none() {
            return Err(EngineError::Other("No media loaded".to_string()));
        }
        Ok(t.duration_ms())
    }

    fn is_empty(&self) -> bool {
        let t = self.transport();
        t.source.is_none() || t.stopped
    }

    fn is_paused(&self) -> bool {
        self.settle();
        self.transport().started_at.is_none()
    }

    fn audio_levels(&self) -> Option<AudioLevels> {
        self.settle();
        let t = self.transport();
        let probe = t.probe.as_ref()?;
        if t.started_at.is_none() {
            return Some(AudioLevels::default());
        }
        Some(probe.level_at(t.position()).scaled(t.volume))
    }

    fn set_callback(&self, callback: Option<Arc<dyn EngineCallback>>) {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn close(&self) {
        self.set_callback(None);
        let mut t = self.transport();
        let volume = t.volume;
        *t = Transport {
            volume,
            ..Default::default()
        };
    }
}

/// Factory for [`AudioOnlyEngine`] handles
#[derive(Clone, Copy, Debug, Default)]
pub struct AudioOnlyFactory;

impl EngineFactory for AudioOnlyFactory {
    fn kind(&self) -> BackendKind {
        BackendKind::AudioOnly
    }

    fn create_engine(&self) -> EngineResult<Arc<dyn MediaEngine>> {
        Ok(Arc::new(AudioOnlyEngine::new()))
    }
}
