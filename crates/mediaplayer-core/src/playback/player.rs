//! Media Player
//!
//! The normalized playback state model every backend is driven through.
//!
//! ```text
//! Idle --open ok--> Buffering --playable--> Playing/Paused --stop/release--> Idle
//! Idle --open fails--> Idle + error
//! ```
//!
//! Mutating calls are expected from one control context (the UI thread).
//! Opening a source and loading subtitles run on the tokio runtime; a newer
//! request supersedes an older one and the older result is discarded.
//! Engine callbacks may arrive from any thread, so state sits behind a mutex.
//! The engine and the error listener are always invoked with the lock released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{EngineCallback, EngineEvent, EngineFactory, MediaEngine, MediaSource};
use crate::captions::{parse_subtitles, SubtitleCue, SubtitleCueStore, SubtitleTrack};
use crate::loader::SubtitleLoader;
use crate::settings::PlayerSettings;
use crate::{AudioLevels, PlaybackState, PlayerError, PlayerId, TimeMs, VideoMetadata};

/// Single-slot error listener
pub type ErrorListener = Arc<dyn Fn(&PlayerError) + Send + Sync>;

// =============================================================================
// Tickets
// =============================================================================

/// Result of an `open` request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Source is playable; holds the state it settled in
    Ready(PlaybackState),
    /// Engine or source failure, already reported to the listener
    Failed(PlayerError),
    /// A newer `open`, `stop` or `release` took over
    Superseded,
    /// The player was released before the request
    Released,
}

/// Awaitable handle for an `open` request. Dropping it is fine.
#[derive(Debug)]
pub struct OpenTicket {
    rx: oneshot::Receiver<OpenOutcome>,
}

impl OpenTicket {
    fn resolved(outcome: OpenOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { rx }
    }

    /// Waits for the request to settle
    pub async fn wait(self) -> OpenOutcome {
        // A dropped sender means the task was aborted by a newer request
        self.rx.await.unwrap_or(OpenOutcome::Superseded)
    }
}

/// Result of a subtitle track selection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubtitleOutcome {
    /// Store installed with this many cues (zero means unavailable)
    Loaded(usize),
    /// The track was already selected
    AlreadySelected,
    /// Another selection or `disable_subtitles` took over
    Superseded,
    Released,
}

/// Awaitable handle for a subtitle load
#[derive(Debug)]
pub struct SubtitleTicket {
    rx: oneshot::Receiver<SubtitleOutcome>,
}

impl SubtitleTicket {
    fn resolved(outcome: SubtitleOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { rx }
    }

    pub async fn wait(self) -> SubtitleOutcome {
        self.rx.await.unwrap_or(SubtitleOutcome::Superseded)
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct PlayerInner {
    engine: Option<Arc<dyn MediaEngine>>,
    source: Option<MediaSource>,
    state: PlaybackState,
    last_raw_event: Option<EngineEvent>,
    volume: f32,
    looping: bool,
    fullscreen: bool,
    /// Last requested play/pause intent, applied when an open completes
    play_intent: bool,
    metadata: VideoMetadata,
    last_error: Option<PlayerError>,
    /// Bumped by every open, stop-during-open and release
    open_generation: u64,
    open_task: Option<JoinHandle<()>>,
    opening: bool,
    subtitle_track: Option<SubtitleTrack>,
    subtitles: Option<Arc<SubtitleCueStore>>,
    subtitle_generation: u64,
    subtitle_task: Option<JoinHandle<()>>,
    released: bool,
}

struct Shared {
    id: PlayerId,
    inner: Mutex<PlayerInner>,
    listener: Mutex<Option<ErrorListener>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PlayerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resets to Idle, records the error and notifies the listener once
    fn report_error(&self, error: PlayerError) {
        {
            let mut inner = self.lock();
            if inner.released {
                return;
            }
            inner.state = PlaybackState::Idle;
            inner.last_error = Some(error.clone());
        }
        warn!("Player {} error ({}): {}", self.id, error.kind(), error.message());

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener(&error);
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.lock();
        !inner.released && inner.open_generation == generation
    }
}

/// Routes engine callbacks of one open generation into the shared state
struct CallbackBridge {
    shared: Weak<Shared>,
    generation: u64,
}

impl EngineCallback for CallbackBridge {
    fn on_event(&self, event: EngineEvent) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared.lock();
        if inner.released || inner.open_generation != self.generation {
            return;
        }
        inner.last_raw_event = Some(event);
        inner.state = match event {
            EngineEvent::Connecting => PlaybackState::Buffering,
            EngineEvent::Playing => PlaybackState::Playing,
            EngineEvent::Paused => PlaybackState::Paused,
            EngineEvent::Stopped => PlaybackState::Idle,
        };
    }

    fn on_metadata(&self, key: &str, value: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared.lock();
        if inner.released || inner.open_generation != self.generation {
            return;
        }
        if !inner.metadata.apply(key, value) {
            debug!("Ignoring metadata {}={:?}", key, value);
        }
    }

    fn on_error(&self, message: &str) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if !shared.is_current(self.generation) {
            debug!("Suppressing error from superseded engine: {}", message);
            return;
        }
        shared.report_error(PlayerError::classify(message));
    }
}

// =============================================================================
// Media Player
// =============================================================================

/// One playback session over one engine handle at a time
pub struct MediaPlayer {
    shared: Arc<Shared>,
    factory: Arc<dyn EngineFactory>,
    loader: Arc<dyn SubtitleLoader>,
}

impl MediaPlayer {
    /// Creates a player with full volume and looping off
    pub fn new(factory: Arc<dyn EngineFactory>, loader: Arc<dyn SubtitleLoader>) -> Self {
        let id = ulid::Ulid::new().to_string();
        debug!("Created player {} on {} backend", id, factory.kind());

        Self {
            shared: Arc::new(Shared {
                id,
                inner: Mutex::new(PlayerInner {
                    engine: None,
                    source: None,
                    state: PlaybackState::Idle,
                    last_raw_event: None,
                    volume: 1.0,
                    looping: false,
                    fullscreen: false,
                    play_intent: true,
                    metadata: VideoMetadata::new(),
                    last_error: None,
                    open_generation: 0,
                    open_task: None,
                    opening: false,
                    subtitle_track: None,
                    subtitles: None,
                    subtitle_generation: 0,
                    subtitle_task: None,
                    released: false,
                }),
                listener: Mutex::new(None),
            }),
            factory,
            loader,
        }
    }

    /// Creates a player seeded with the persisted volume and loop settings
    pub fn with_settings(
        factory: Arc<dyn EngineFactory>,
        loader: Arc<dyn SubtitleLoader>,
        settings: &PlayerSettings,
    ) -> Self {
        let player = Self::new(factory, loader);
        player.set_volume(settings.default_volume);
        player.set_looping(settings.loop_playback);
        player
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    fn engine(&self) -> Option<Arc<dyn MediaEngine>> {
        let inner = self.shared.lock();
        if inner.released {
            return None;
        }
        inner.engine.clone()
    }

    // -------------------------------------------------------------------------
    // Error Listener
    // -------------------------------------------------------------------------

    /// Installs the error listener, replacing any previous one.
    /// Past errors are not replayed.
    pub fn set_error_listener<F>(&self, listener: F)
    where
        F: Fn(&PlayerError) + Send + Sync + 'static,
    {
        *self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
    }

    pub fn clear_error_listener(&self) {
        *self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    // -------------------------------------------------------------------------
    // Open
    // -------------------------------------------------------------------------

    /// Starts opening `source` in the background and returns immediately.
    ///
    /// Any in-flight open is cancelled and its result discarded. Failures go
    /// to the error listener; this never fails synchronously.
    pub fn open(&self, source: &str) -> OpenTicket {
        let classified = MediaSource::classify(source);
        let runtime = tokio::runtime::Handle::try_current();

        // Supersede the previous open even when this one fails immediately
        let (generation, previous_task, previous_engine) = {
            let mut inner = self.shared.lock();
            if inner.released {
                return OpenTicket::resolved(OpenOutcome::Released);
            }
            inner.open_generation += 1;
            inner.source = classified.as_ref().ok().cloned();
            inner.state = PlaybackState::Buffering;
            inner.last_raw_event = None;
            inner.metadata = VideoMetadata::new();
            inner.last_error = None;
            inner.opening = classified.is_ok() && runtime.is_ok();
            (
                inner.open_generation,
                inner.open_task.take(),
                inner.engine.take(),
            )
        };

        if let Some(task) = previous_task {
            debug!("Player {} superseding in-flight open", self.shared.id);
            task.abort();
        }
        if let Some(engine) = previous_engine {
            engine.set_callback(None);
            engine.close();
        }

        let media = match classified {
            Ok(media) => media,
            Err(e) => {
                let error = PlayerError::SourceError(e.to_string());
                self.shared.report_error(error.clone());
                return OpenTicket::resolved(OpenOutcome::Failed(error));
            }
        };

        let runtime = match runtime {
            Ok(handle) => handle,
            Err(e) => {
                let error = PlayerError::UnknownError(format!("No async runtime: {}", e));
                self.shared.report_error(error.clone());
                return OpenTicket::resolved(OpenOutcome::Failed(error));
            }
        };

        info!("Player {} opening {}", self.shared.id, media);

        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        let factory = self.factory.clone();
        let task = runtime.spawn(async move {
            let outcome = run_open(shared, factory, media, generation).await;
            let _ = tx.send(outcome);
        });

        {
            let mut inner = self.shared.lock();
            if inner.open_generation == generation && !inner.released {
                inner.open_task = Some(task);
            }
        }

        OpenTicket { rx }
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    /// Resumes playback. No-op with nothing loaded.
    pub fn play(&self) {
        let engine = {
            let mut inner = self.shared.lock();
            if inner.released || inner.source.is_none() {
                return;
            }
            inner.play_intent = true;
            if inner.opening {
                // Applied when the open completes
                return;
            }
            match inner.engine.clone() {
                Some(engine) => engine,
                None => return,
            }
        };

        match engine.play() {
            Ok(()) => self.settle_state(PlaybackState::Playing, EngineEvent::Playing),
            Err(e) => self.shared.report_error(e.into()),
        }
    }

    /// Pauses playback. Always safe to call.
    pub fn pause(&self) {
        let engine = {
            let mut inner = self.shared.lock();
            if inner.released {
                return;
            }
            inner.play_intent = false;
            if inner.opening {
                return;
            }
            match inner.engine.clone() {
                Some(engine) => engine,
                None => return,
            }
        };

        match engine.pause() {
            Ok(()) => self.settle_state(PlaybackState::Paused, EngineEvent::Paused),
            Err(e) => self.shared.report_error(e.into()),
        }
    }

    /// Stops playback and ends in Idle. Cancels an in-flight open.
    pub fn stop(&self) {
        let (engine, cancelled_task, was_opening) = {
            let mut inner = self.shared.lock();
            if inner.released {
                return;
            }
            inner.play_intent = false;
            let was_opening = inner.opening;
            let mut cancelled_task = None;
            let engine = if was_opening {
                inner.open_generation += 1;
                inner.opening = false;
                cancelled_task = inner.open_task.take();
                inner.engine.take()
            } else {
                inner.engine.clone()
            };
            inner.state = PlaybackState::Idle;
            inner.last_raw_event = Some(EngineEvent::Stopped);
            (engine, cancelled_task, was_opening)
        };

        if let Some(task) = cancelled_task {
            task.abort();
        }

        let Some(engine) = engine else {
            return;
        };
        if was_opening {
            debug!("Player {} stop cancelled an in-flight open", self.shared.id);
            engine.set_callback(None);
            engine.close();
            return;
        }
        if let Err(e) = engine.stop() {
            self.shared.report_error(e.into());
        }
        self.settle_state(PlaybackState::Idle, EngineEvent::Stopped);
    }

    /// Best-effort seek; failures go to the error listener
    pub fn seek_to(&self, position_ms: TimeMs) {
        let Some(engine) = self.engine() else {
            return;
        };
        if let Err(e) = engine.seek_to(position_ms) {
            self.shared.report_error(e.into());
        }
    }

    /// Records the state implied by a successful transport call. Engines that
    /// report through their callback have already done the same.
    fn settle_state(&self, state: PlaybackState, event: EngineEvent) {
        let mut inner = self.shared.lock();
        if inner.released {
            return;
        }
        inner.state = state;
        inner.last_raw_event = Some(event);
    }

    // -------------------------------------------------------------------------
    // Volume / Loop / Fullscreen
    // -------------------------------------------------------------------------

    /// Sets the volume, clamped to `[0.0, 1.0]`. The value survives engine
    /// handle recreation.
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let engine = {
            let mut inner = self.shared.lock();
            if inner.released {
                return;
            }
            inner.volume = volume;
            inner.engine.clone()
        };

        if let Some(engine) = engine {
            if let Err(e) = engine.set_volume(volume) {
                self.shared.report_error(e.into());
            }
        }
    }

    pub fn volume(&self) -> f32 {
        self.shared.lock().volume
    }

    /// Sets looping. Like volume, reapplied to every new engine handle.
    pub fn set_looping(&self, looping: bool) {
        let engine = {
            let mut inner = self.shared.lock();
            if inner.released {
                return;
            }
            inner.looping = looping;
            inner.engine.clone()
        };

        if let Some(engine) = engine {
            if let Err(e) = engine.set_looping(looping) {
                self.shared.report_error(e.into());
            }
        }
    }

    pub fn is_looping(&self) -> bool {
        self.shared.lock().looping
    }

    pub fn set_fullscreen(&self, fullscreen: bool) {
        let mut inner = self.shared.lock();
        if !inner.released {
            inner.fullscreen = fullscreen;
        }
    }

    /// Flips fullscreen and returns the new value
    pub fn toggle_fullscreen(&self) -> bool {
        let mut inner = self.shared.lock();
        if !inner.released {
            inner.fullscreen = !inner.fullscreen;
        }
        inner.fullscreen
    }

    pub fn is_fullscreen(&self) -> bool {
        self.shared.lock().fullscreen
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Last known state as set by events and API calls
    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    /// State derived from the engine.
    ///
    /// `None` without an engine handle. A cached `Connecting` event reports
    /// Buffering until a definitive event arrives; otherwise the engine is
    /// queried live.
    pub fn current_player_state(&self) -> Option<PlaybackState> {
        let (engine, last_raw_event) = {
            let inner = self.shared.lock();
            if inner.released {
                return None;
            }
            (inner.engine.clone()?, inner.last_raw_event)
        };

        if last_raw_event == Some(EngineEvent::Connecting) {
            return Some(PlaybackState::Buffering);
        }
        if engine.is_empty() {
            Some(PlaybackState::Idle)
        } else if engine.is_paused() {
            Some(PlaybackState::Paused)
        } else {
            Some(PlaybackState::Playing)
        }
    }

    /// Current position, or `None` without a usable engine
    pub fn current_position(&self) -> Option<TimeMs> {
        self.engine()?.position_ms().ok()
    }

    /// Duration, or `None` if unknown or without a usable engine
    pub fn current_duration(&self) -> Option<TimeMs> {
        self.engine()?.duration_ms().ok().flatten()
    }

    pub fn audio_levels(&self) -> Option<AudioLevels> {
        self.engine()?.audio_levels()
    }

    pub fn metadata(&self) -> VideoMetadata {
        self.shared.lock().metadata.clone()
    }

    pub fn last_error(&self) -> Option<PlayerError> {
        self.shared.lock().last_error.clone()
    }

    pub fn source(&self) -> Option<MediaSource> {
        let inner = self.shared.lock();
        if inner.released {
            return None;
        }
        inner.source.clone()
    }

    pub fn is_released(&self) -> bool {
        self.shared.lock().released
    }

    // -------------------------------------------------------------------------
    // Subtitles
    // -------------------------------------------------------------------------

    /// Selects a subtitle track: fetches, parses and installs it in the
    /// background, replacing the previous store. Re-selecting the current
    /// track is a no-op. Load failures leave subtitles unavailable without
    /// raising a player error.
    pub fn select_subtitle_track(&self, track: &SubtitleTrack) -> SubtitleTicket {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Cannot load subtitles without an async runtime: {}", e);
                return SubtitleTicket::resolved(SubtitleOutcome::Loaded(0));
            }
        };

        let (generation, previous_task) = {
            let mut inner = self.shared.lock();
            if inner.released {
                return SubtitleTicket::resolved(SubtitleOutcome::Released);
            }
            if inner.subtitle_track.as_ref() == Some(track) {
                return SubtitleTicket::resolved(SubtitleOutcome::AlreadySelected);
            }
            inner.subtitle_generation += 1;
            inner.subtitle_track = Some(track.clone());
            inner.subtitles = None;
            (inner.subtitle_generation, inner.subtitle_task.take())
        };

        if let Some(task) = previous_task {
            task.abort();
        }

        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        let loader = self.loader.clone();
        let track = track.clone();
        let task = runtime.spawn(async move {
            let content = loader.load_subtitle_content(&track.src).await;
            let store = parse_subtitles(&content);
            let count = store.len();

            let outcome = {
                let mut inner = shared.lock();
                if inner.released {
                    SubtitleOutcome::Released
                } else if inner.subtitle_generation != generation {
                    SubtitleOutcome::Superseded
                } else {
                    inner.subtitles = Some(Arc::new(store));
                    inner.subtitle_task = None;
                    SubtitleOutcome::Loaded(count)
                }
            };

            if outcome == SubtitleOutcome::Loaded(count) {
                if count == 0 {
                    warn!("No subtitle cues available from {}", track.src);
                } else {
                    info!("Loaded {} subtitle cues ({})", count, track.label);
                }
            }
            let _ = tx.send(outcome);
        });

        {
            let mut inner = self.shared.lock();
            if inner.subtitle_generation == generation && inner.subtitles.is_none() {
                inner.subtitle_task = Some(task);
            }
        }

        SubtitleTicket { rx }
    }

    /// Drops the current subtitle track and store
    pub fn disable_subtitles(&self) {
        let task = {
            let mut inner = self.shared.lock();
            inner.subtitle_generation += 1;
            inner.subtitle_track = None;
            inner.subtitles = None;
            inner.subtitle_task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn selected_subtitle_track(&self) -> Option<SubtitleTrack> {
        self.shared.lock().subtitle_track.clone()
    }

    /// The installed cue store, for renderers that query it directly
    pub fn subtitle_store(&self) -> Option<Arc<SubtitleCueStore>> {
        self.shared.lock().subtitles.clone()
    }

    /// Cues active at `position_ms`; empty when subtitles are off
    pub fn get_active_cues(&self, position_ms: TimeMs) -> Vec<SubtitleCue> {
        match self.subtitle_store() {
            Some(store) => store
                .get_active_cues(position_ms)
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Cues active at the current playback position
    pub fn active_subtitles(&self) -> Vec<SubtitleCue> {
        match self.current_position() {
            Some(position) => self.get_active_cues(position),
            None => Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Release
    // -------------------------------------------------------------------------

    /// Cancels background work, detaches the callback, closes the engine and
    /// marks the player released. Idempotent.
    pub fn release(&self) {
        let (open_task, subtitle_task, engine) = {
            let mut inner = self.shared.lock();
            if inner.released {
                return;
            }
            inner.released = true;
            inner.open_generation += 1;
            inner.subtitle_generation += 1;
            inner.opening = false;
            inner.state = PlaybackState::Idle;
            inner.last_raw_event = None;
            inner.source = None;
            inner.subtitle_track = None;
            inner.subtitles = None;
            (
                inner.open_task.take(),
                inner.subtitle_task.take(),
                inner.engine.take(),
            )
        };

        if let Some(task) = open_task {
            task.abort();
        }
        if let Some(task) = subtitle_task {
            task.abort();
        }
        if let Some(engine) = engine {
            engine.set_callback(None);
            engine.close();
        }
        self.clear_error_listener();

        info!("Player {} released", self.shared.id);
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// Open Task
// =============================================================================

async fn run_open(
    shared: Arc<Shared>,
    factory: Arc<dyn EngineFactory>,
    media: MediaSource,
    generation: u64,
) -> OpenOutcome {
    let engine = match factory.create_engine() {
        Ok(engine) => engine,
        Err(e) => return fail_open(&shared, generation, None, e.into()),
    };

    // Publish the handle and apply buffered settings in one critical section
    let autoplay = {
        let mut inner = shared.lock();
        if inner.released || inner.open_generation != generation {
            drop(inner);
            engine.close();
            return OpenOutcome::Superseded;
        }
        if let Err(e) = engine.set_volume(inner.volume) {
            warn!("Failed to apply volume to new engine: {}", e);
        }
        if let Err(e) = engine.set_looping(inner.looping) {
            warn!("Failed to apply looping to new engine: {}", e);
        }
        engine.set_callback(Some(Arc::new(CallbackBridge {
            shared: Arc::downgrade(&shared),
            generation,
        })));
        inner.engine = Some(engine.clone());
        inner.play_intent
    };

    let result = engine.open(&media, autoplay).await;

    if let Err(e) = result {
        return fail_open(&shared, generation, Some(engine), e.into());
    }

    // Reconcile with play/pause calls made while opening. Whoever superseded
    // this open owns the engine now and closes it.
    let intent = {
        let mut inner = shared.lock();
        if inner.released || inner.open_generation != generation {
            drop(inner);
            debug!("Discarding result of superseded open for {}", media);
            return OpenOutcome::Superseded;
        }
        inner.opening = false;
        inner.open_task = None;
        inner.play_intent
    };
    let reconcile = if intent == autoplay {
        Ok(())
    } else if intent {
        engine.play()
    } else {
        engine.pause()
    };
    if let Err(e) = reconcile {
        warn!("Failed to apply play intent after open: {}", e);
    }

    let (state, event) = if intent {
        (PlaybackState::Playing, EngineEvent::Playing)
    } else {
        (PlaybackState::Paused, EngineEvent::Paused)
    };
    {
        let mut inner = shared.lock();
        if inner.released || inner.open_generation != generation {
            return OpenOutcome::Superseded;
        }
        inner.state = state;
        inner.last_raw_event = Some(event);
    }

    info!("Opened {} ({})", media, state);
    OpenOutcome::Ready(state)
}

fn fail_open(
    shared: &Shared,
    generation: u64,
    engine: Option<Arc<dyn MediaEngine>>,
    error: PlayerError,
) -> OpenOutcome {
    {
        let mut inner = shared.lock();
        if inner.released || inner.open_generation != generation {
            return OpenOutcome::Superseded;
        }
        inner.opening = false;
        inner.open_task = None;
        inner.engine = None;
        inner.last_raw_event = None;
    }
    if let Some(engine) = engine {
        engine.set_callback(None);
        engine.close();
    }

    shared.report_error(error.clone());
    OpenOutcome::Failed(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::BackendKind;
    use crate::{EngineError, EngineResult};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct ScriptState {
        loaded: bool,
        paused: bool,
        position: TimeMs,
        volume: Option<f32>,
        looping: bool,
        closed: bool,
    }

    /// Engine whose open can be held on a gate and made to fail
    #[derive(Default)]
    struct ScriptedEngine {
        gate: Option<Arc<Notify>>,
        open_error: Option<EngineError>,
        seek_error: Option<EngineError>,
        state: Mutex<ScriptState>,
        callback: Mutex<Option<Arc<dyn EngineCallback>>>,
    }

    impl ScriptedEngine {
        fn gated(gate: &Arc<Notify>) -> Self {
            Self {
                gate: Some(gate.clone()),
                ..Default::default()
            }
        }

        fn state(&self) -> MutexGuard<'_, ScriptState> {
            self.state.lock().unwrap()
        }

        fn callback(&self) -> Option<Arc<dyn EngineCallback>> {
            self.callback.lock().unwrap().clone()
        }

        fn emit(&self, event: EngineEvent) {
            if let Some(cb) = self.callback() {
                cb.on_event(event);
            }
        }

        /// Simulates an asynchronous native failure
        fn fail(&self, message: &str) {
            if let Some(cb) = self.callback() {
                cb.on_error(message);
            }
        }
    }

    #[async_trait]
    impl MediaEngine for ScriptedEngine {
        async fn open(&self, _source: &MediaSource, autoplay: bool) -> EngineResult<()> {
            self.emit(EngineEvent::Connecting);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(e) = &self.open_error {
                return Err(e.clone());
            }
            {
                let mut state = self.state();
                state.loaded = true;
                state.paused = !autoplay;
            }
            if let Some(cb) = self.callback() {
                cb.on_metadata("duration", "5000");
            }
            self.emit(if autoplay {
                EngineEvent::Playing
            } else {
                EngineEvent::Paused
            });
            Ok(())
        }

        fn play(&self) -> EngineResult<()> {
            self.state().paused = false;
            self.emit(EngineEvent::Playing);
            Ok(())
        }

        fn pause(&self) -> EngineResult<()> {
            self.state().paused = true;
            self.emit(EngineEvent::Paused);
            Ok(())
        }

        fn stop(&self) -> EngineResult<()> {
            self.state().loaded = false;
            self.emit(EngineEvent::Stopped);
            Ok(())
        }

        fn seek_to(&self, position_ms: TimeMs) -> EngineResult<()> {
            if let Some(e) = &self.seek_error {
                return Err(e.clone());
            }
            self.state().position = position_ms;
            Ok(())
        }

        fn set_volume(&self, volume: f32) -> EngineResult<()> {
            self.state().volume = Some(volume);
            Ok(())
        }

        fn set_looping(&self, looping: bool) -> EngineResult<()> {
            self.state().looping = looping;
            Ok(())
        }

        fn position_ms(&self) -> EngineResult<TimeMs> {
            Ok(self.state().position)
        }

        fn duration_ms(&self) -> EngineResult<Option<TimeMs>> {
            Ok(Some(5000))
        }

        fn is_empty(&self) -> bool {
            !self.state().loaded
        }

        fn is_paused(&self) -> bool {
            self.state().paused
        }

        fn set_callback(&self, callback: Option<Arc<dyn EngineCallback>>) {
            *self.callback.lock().unwrap() = callback;
        }

        fn close(&self) {
            let mut state = self.state();
            state.loaded = false;
            state.closed = true;
        }
    }

    /// Hands out pre-built engines in order
    #[derive(Default)]
    struct ScriptedFactory {
        engines: Mutex<VecDeque<Arc<ScriptedEngine>>>,
    }

    impl ScriptedFactory {
        fn with(engines: &[Arc<ScriptedEngine>]) -> Arc<Self> {
            Arc::new(Self {
                engines: Mutex::new(engines.iter().cloned().collect()),
            })
        }
    }

    impl EngineFactory for ScriptedFactory {
        fn kind(&self) -> BackendKind {
            BackendKind::AudioOnly
        }

        fn create_engine(&self) -> EngineResult<Arc<dyn MediaEngine>> {
            let engine = self
                .engines
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| EngineError::Other("no engine scripted".to_string()))?;
            let engine: Arc<dyn MediaEngine> = engine;
            Ok(engine)
        }
    }

    #[derive(Default)]
    struct MockLoader {
        files: HashMap<String, String>,
    }

    #[async_trait]
    impl SubtitleLoader for MockLoader {
        async fn load_subtitle_content(&self, src: &str) -> String {
            self.files.get(src).cloned().unwrap_or_default()
        }
    }

    const SRT: &str = "1\n00:00:01,000 --> 00:00:02,000\nHello\n\n2\n00:00:03,000 --> 00:00:04,000\nWorld\n";

    fn player_with(engines: &[Arc<ScriptedEngine>]) -> MediaPlayer {
        let mut files = HashMap::new();
        files.insert("subs.srt".to_string(), SRT.to_string());
        files.insert("other.srt".to_string(), SRT.to_string());
        MediaPlayer::new(ScriptedFactory::with(engines), Arc::new(MockLoader { files }))
    }

    fn collect_errors(player: &MediaPlayer) -> Arc<Mutex<Vec<PlayerError>>> {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        player.set_error_listener(move |e| sink.lock().unwrap().push(e.clone()));
        errors
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_connecting_is_sticky_until_ready() {
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(ScriptedEngine::gated(&gate));
        let player = player_with(&[engine.clone()]);

        assert_eq!(player.current_player_state(), None);
        let ticket = player.open("clip.mp4");
        assert_eq!(player.state(), PlaybackState::Buffering);

        wait_until(|| player.current_player_state() == Some(PlaybackState::Buffering)).await;

        gate.notify_one();
        assert_eq!(ticket.wait().await, OpenOutcome::Ready(PlaybackState::Playing));
        assert_eq!(player.current_player_state(), Some(PlaybackState::Playing));
        assert_eq!(player.state(), PlaybackState::Playing);
        assert_eq!(player.metadata().duration, Some(5000));
        assert_eq!(player.current_duration(), Some(5000));
    }

    #[tokio::test]
    async fn test_newer_open_supersedes_and_suppresses_errors() {
        let gate = Arc::new(Notify::new());
        let first = Arc::new(ScriptedEngine {
            gate: Some(gate.clone()),
            open_error: Some(EngineError::Network("connection timed out".to_string())),
            ..Default::default()
        });
        let second = Arc::new(ScriptedEngine::default());
        let player = player_with(&[first.clone(), second.clone()]);
        let errors = collect_errors(&player);

        let stale = player.open("a.mp4");
        wait_until(|| player.current_player_state() == Some(PlaybackState::Buffering)).await;

        let fresh = player.open("b.mp4");
        assert!(first.state().closed);
        gate.notify_one();
        first.fail("connection reset");

        assert_eq!(stale.wait().await, OpenOutcome::Superseded);
        assert_eq!(fresh.wait().await, OpenOutcome::Ready(PlaybackState::Playing));
        assert!(errors.lock().unwrap().is_empty());
        assert_eq!(
            player.source(),
            Some(MediaSource::Local(std::path::PathBuf::from("b.mp4")))
        );
    }

    #[tokio::test]
    async fn test_open_failure_reports_once_and_idles() {
        let engine = Arc::new(ScriptedEngine {
            open_error: Some(EngineError::Codec("unsupported codec".to_string())),
            ..Default::default()
        });
        let player = player_with(&[engine.clone()]);
        let errors = collect_errors(&player);

        let outcome = player.open("clip.mkv").wait().await;
        let expected = PlayerError::CodecError("unsupported codec".to_string());

        assert_eq!(outcome, OpenOutcome::Failed(expected.clone()));
        assert_eq!(*errors.lock().unwrap(), vec![expected.clone()]);
        assert_eq!(player.state(), PlaybackState::Idle);
        assert_eq!(player.current_player_state(), None);
        assert_eq!(player.last_error(), Some(expected));
        assert!(engine.state().closed);
    }

    #[tokio::test]
    async fn test_invalid_source_is_reported_as_source_error() {
        let player = player_with(&[]);
        let errors = collect_errors(&player);

        let outcome = player.open("   ").wait().await;
        assert!(matches!(
            outcome,
            OpenOutcome::Failed(PlayerError::SourceError(_))
        ));
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(player.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_invalid_open_supersedes_in_flight_open() {
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(ScriptedEngine::gated(&gate));
        let player = player_with(&[engine.clone()]);
        let errors = collect_errors(&player);

        let stale = player.open("a.mp4");
        wait_until(|| player.current_player_state() == Some(PlaybackState::Buffering)).await;

        let outcome = player.open("   ").wait().await;
        assert!(matches!(
            outcome,
            OpenOutcome::Failed(PlayerError::SourceError(_))
        ));
        assert!(engine.state().closed);

        gate.notify_one();
        assert_eq!(stale.wait().await, OpenOutcome::Superseded);
        assert_eq!(player.state(), PlaybackState::Idle);
        assert_eq!(player.current_player_state(), None);
        assert_eq!(player.source(), None);
        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_volume_is_clamped_and_survives_new_engines() {
        let first = Arc::new(ScriptedEngine::default());
        let second = Arc::new(ScriptedEngine::default());
        let player = player_with(&[first.clone(), second.clone()]);

        player.set_volume(-0.1);
        assert_eq!(player.volume(), 0.0);
        player.set_volume(1.5);
        assert_eq!(player.volume(), 1.0);
        player.set_volume(f32::NAN);
        assert_eq!(player.volume(), 0.0);

        player.set_volume(0.4);
        player.set_looping(true);
        player.open("a.wav").wait().await;
        assert_eq!(first.state().volume, Some(0.4));
        assert!(first.state().looping);

        player.open("b.wav").wait().await;
        assert!(first.state().closed);
        assert_eq!(second.state().volume, Some(0.4));
        assert!(second.state().looping);

        player.set_volume(0.6);
        assert_eq!(second.state().volume, Some(0.6));
    }

    #[tokio::test]
    async fn test_pause_while_opening_is_honored() {
        let engine = Arc::new(ScriptedEngine::default());
        let player = player_with(&[engine.clone()]);

        let ticket = player.open("clip.mp4");
        player.pause();

        assert_eq!(ticket.wait().await, OpenOutcome::Ready(PlaybackState::Paused));
        assert!(engine.state().paused);
        assert_eq!(player.current_player_state(), Some(PlaybackState::Paused));

        player.play();
        assert_eq!(player.state(), PlaybackState::Playing);
        assert_eq!(player.current_player_state(), Some(PlaybackState::Playing));
    }

    #[tokio::test]
    async fn test_transport_without_media_is_noop() {
        let player = player_with(&[]);
        player.play();
        player.pause();
        player.seek_to(1000);
        player.stop();

        assert_eq!(player.state(), PlaybackState::Idle);
        assert_eq!(player.current_position(), None);
        assert_eq!(player.current_duration(), None);
        assert_eq!(player.audio_levels(), None);
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_open() {
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(ScriptedEngine::gated(&gate));
        let player = player_with(&[engine.clone()]);
        let errors = collect_errors(&player);

        let ticket = player.open("clip.mp4");
        wait_until(|| player.current_player_state() == Some(PlaybackState::Buffering)).await;

        player.stop();
        assert_eq!(player.state(), PlaybackState::Idle);
        assert!(engine.state().closed);
        assert_eq!(ticket.wait().await, OpenOutcome::Superseded);
        assert!(errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_after_playing_ends_idle() {
        let engine = Arc::new(ScriptedEngine::default());
        let player = player_with(&[engine.clone()]);
        player.open("clip.mp4").wait().await;

        player.stop();
        assert_eq!(player.state(), PlaybackState::Idle);
        assert_eq!(player.current_player_state(), Some(PlaybackState::Idle));
        assert!(!engine.state().closed);
    }

    #[tokio::test]
    async fn test_error_listener_last_wins_without_replay() {
        let engine = Arc::new(ScriptedEngine {
            seek_error: Some(EngineError::Network("connection reset".to_string())),
            ..Default::default()
        });
        let player = player_with(&[engine.clone()]);
        player.open("https://example.com/live.m3u8").wait().await;

        player.seek_to(1000);
        assert!(matches!(
            player.last_error(),
            Some(PlayerError::NetworkError(_))
        ));

        let first = collect_errors(&player);
        let second = collect_errors(&player);
        assert!(second.lock().unwrap().is_empty());

        player.seek_to(2000);
        engine.fail("decoder crashed");

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(
            *second.lock().unwrap(),
            vec![
                PlayerError::NetworkError("connection reset".to_string()),
                PlayerError::CodecError("decoder crashed".to_string()),
            ]
        );
        assert_eq!(player.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_disables_player() {
        let engine = Arc::new(ScriptedEngine::default());
        let player = player_with(&[engine.clone()]);
        let errors = collect_errors(&player);
        player.open("clip.mp4").wait().await;

        player.release();
        assert!(player.is_released());
        assert!(engine.state().closed);

        player.play();
        player.seek_to(100);
        player.set_volume(0.2);
        engine.fail("network down");
        assert_eq!(player.current_position(), None);
        assert_eq!(player.current_player_state(), None);
        assert_eq!(player.source(), None);
        assert!(errors.lock().unwrap().is_empty());

        assert_eq!(player.open("other.mp4").wait().await, OpenOutcome::Released);
        let track = SubtitleTrack::new("English", "en", "subs.srt");
        assert_eq!(
            player.select_subtitle_track(&track).wait().await,
            SubtitleOutcome::Released
        );

        player.release();
    }

    #[tokio::test]
    async fn test_drop_closes_engine() {
        let engine = Arc::new(ScriptedEngine::default());
        let player = player_with(&[engine.clone()]);
        player.open("clip.mp4").wait().await;

        drop(player);
        assert!(engine.state().closed);
    }

    #[tokio::test]
    async fn test_subtitle_selection_and_lookup() {
        let engine = Arc::new(ScriptedEngine::default());
        let player = player_with(&[engine.clone()]);
        player.open("clip.mp4").wait().await;

        let track = SubtitleTrack::new("English", "en", "subs.srt");
        assert_eq!(
            player.select_subtitle_track(&track).wait().await,
            SubtitleOutcome::Loaded(2)
        );
        assert_eq!(
            player.select_subtitle_track(&track).wait().await,
            SubtitleOutcome::AlreadySelected
        );
        assert_eq!(player.selected_subtitle_track(), Some(track));

        let active = player.get_active_cues(1500);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].text, "Hello");
        assert!(player.get_active_cues(2500).is_empty());

        player.seek_to(3500);
        let active = player.active_subtitles();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].text, "World");

        player.disable_subtitles();
        assert!(player.subtitle_store().is_none());
        assert!(player.get_active_cues(1500).is_empty());
        assert_eq!(player.selected_subtitle_track(), None);
    }

    #[tokio::test]
    async fn test_subtitle_load_failure_is_silent() {
        let player = player_with(&[]);
        let errors = collect_errors(&player);

        let track = SubtitleTrack::new("Missing", "de", "missing.vtt");
        assert_eq!(
            player.select_subtitle_track(&track).wait().await,
            SubtitleOutcome::Loaded(0)
        );
        assert!(player.get_active_cues(1500).is_empty());
        assert!(errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_newer_subtitle_selection_wins() {
        let player = player_with(&[]);

        let english = SubtitleTrack::new("English", "en", "subs.srt");
        let other = english.with_src("other.srt").with_label("Commentary");

        let stale = player.select_subtitle_track(&english);
        let fresh = player.select_subtitle_track(&other);

        assert_eq!(stale.wait().await, SubtitleOutcome::Superseded);
        assert_eq!(fresh.wait().await, SubtitleOutcome::Loaded(2));
        assert_eq!(player.selected_subtitle_track(), Some(other));
    }

    #[tokio::test]
    async fn test_with_settings_seeds_volume_and_loop() {
        let settings = PlayerSettings {
            default_volume: 0.25,
            loop_playback: true,
            ..Default::default()
        };
        let player = MediaPlayer::with_settings(
            ScriptedFactory::with(&[]),
            Arc::new(MockLoader::default()),
            &settings,
        );

        assert_eq!(player.volume(), 0.25);
        assert!(player.is_looping());
        assert!(player.toggle_fullscreen());
        assert!(player.is_fullscreen());
        assert!(!player.toggle_fullscreen());
    }
}
