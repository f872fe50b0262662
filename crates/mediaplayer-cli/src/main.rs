//! MediaPlayer CLI
//!
//! Subtitle tooling and headless audio playback on top of `mediaplayer-core`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use mediaplayer_core::captions::{
    export_srt, export_vtt, format_srt_timestamp, parse_subtitles, SubtitleCue, SubtitleCueStore,
    SubtitleFormat, SubtitleTrack,
};
use mediaplayer_core::loader::{DefaultSubtitleLoader, SubtitleLoader, SubtitleLocation};
use mediaplayer_core::playback::{
    AudioOnlyFactory, BackendRegistry, MediaPlayer, OpenOutcome, OpenTicket, SubtitleOutcome,
};
use mediaplayer_core::settings::{PlayerSettings, SettingsManager};
use mediaplayer_core::timecode::{format_millis, format_seconds, parse_to_ms};
use mediaplayer_core::{AudioLevels, CoreError, PlaybackState, PlayerError, TimeMs, VideoMetadata};

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Status refresh interval during `play`
const TICK_MS: u64 = 500;

#[derive(Parser)]
#[command(name = "mediaplayer")]
#[command(about = "MediaPlayer - subtitle tooling and headless audio playback", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write a daily rolling log file into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert between seconds and MM:SS / HH:MM:SS
    Time {
        #[command(subcommand)]
        action: TimeAction,
    },

    /// Print the cues of a subtitle file
    Cues {
        /// Subtitle path or URL
        src: String,

        /// Only cues active at this time (MM:SS or HH:MM:SS)
        #[arg(long)]
        at: Option<String>,
    },

    /// Convert a subtitle file to another format
    Convert {
        /// Subtitle path or URL
        src: String,

        /// Target format
        #[arg(long, value_enum)]
        to: TargetFormat,
    },

    /// Open a media source and print its metadata
    Probe {
        /// Media path or URL
        source: String,
    },

    /// Play a media source headlessly
    Play {
        /// Media path or URL
        source: String,

        /// Subtitle path or URL to show alongside
        #[arg(long)]
        subtitles: Option<String>,

        /// Volume (0.0 - 1.0)
        #[arg(long)]
        volume: Option<f32>,

        /// Loop playback
        #[arg(long = "loop")]
        looping: bool,

        /// Stop after this many seconds
        #[arg(long = "for")]
        duration_secs: Option<u64>,
    },

    /// Show or reset persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum TimeAction {
    /// Format a number of seconds
    Format {
        #[arg(allow_hyphen_values = true)]
        seconds: f64,
    },
    /// Parse MM:SS or HH:MM:SS into milliseconds
    Parse { text: String },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetFormat {
    Srt,
    Vtt,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("No config directory available; pass --config")]
    NoConfigDir,

    #[error("No subtitle cues found in {0}")]
    NoCues(String),

    #[error("Playback failed: {0}")]
    Playback(#[from] PlayerError),

    #[error("Open of {0} was interrupted")]
    Interrupted(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProbeReport<'a> {
    source: &'a str,
    state: PlaybackState,
    duration_ms: Option<TimeMs>,
    metadata: VideoMetadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackStatus {
    state: PlaybackState,
    position_ms: Option<TimeMs>,
    duration_ms: Option<TimeMs>,
    levels: Option<AudioLevels>,
    subtitles: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_dir.as_deref());

    match cli.command {
        Commands::Time { action } => match action {
            TimeAction::Format { seconds } => cmd_time_format(seconds, cli.json)?,
            TimeAction::Parse { text } => cmd_time_parse(&text, cli.json)?,
        },
        Commands::Cues { src, at } => {
            let settings = load_settings(cli.config);
            cmd_cues(&src, at.as_deref(), &settings, cli.json).await?;
        }
        Commands::Convert { src, to } => {
            let settings = load_settings(cli.config);
            cmd_convert(&src, to, &settings, cli.json).await?;
        }
        Commands::Probe { source } => {
            let settings = load_settings(cli.config);
            cmd_probe(&source, &settings, cli.json).await?;
        }
        Commands::Play {
            source,
            subtitles,
            volume,
            looping,
            duration_secs,
        } => {
            let settings = load_settings(cli.config);
            info!("Playing {}", source);
            cmd_play(
                &source,
                subtitles.as_deref(),
                volume,
                looping,
                duration_secs,
                &settings,
                cli.json,
            )
            .await?;
        }
        Commands::Settings { action } => {
            let manager = settings_manager(cli.config)?;
            cmd_settings(&manager, action, cli.json)?;
        }
    }

    Ok(())
}

fn init_logging(log_dir: Option<&Path>) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // stdout carries command output; logs go to stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = log_dir.and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Cannot create log directory {}: {}", dir.display(), e);
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(dir, "mediaplayer.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn settings_manager(config: Option<PathBuf>) -> Result<SettingsManager, CliError> {
    let dir = config
        .or_else(|| dirs::config_dir().map(|d| d.join("mediaplayer")))
        .ok_or(CliError::NoConfigDir)?;
    Ok(SettingsManager::new(dir))
}

fn load_settings(config: Option<PathBuf>) -> PlayerSettings {
    match settings_manager(config) {
        Ok(manager) => manager.load(),
        Err(_) => PlayerSettings::default(),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// time
// =============================================================================

fn cmd_time_format(seconds: f64, json: bool) -> anyhow::Result<()> {
    let text = format_seconds(seconds);
    if json {
        print_json(&serde_json::json!({ "seconds": seconds, "text": text }))
    } else {
        println!("{}", text);
        Ok(())
    }
}

fn cmd_time_parse(text: &str, json: bool) -> anyhow::Result<()> {
    let ms = parse_to_ms(text);
    if json {
        print_json(&serde_json::json!({ "text": text, "milliseconds": ms }))
    } else {
        println!("{}", ms);
        Ok(())
    }
}

// =============================================================================
// cues / convert
// =============================================================================

async fn load_store(src: &str, settings: &PlayerSettings) -> anyhow::Result<SubtitleCueStore> {
    if let Some(SubtitleLocation::Local(path)) = SubtitleLocation::resolve(src) {
        if !path.exists() {
            return Err(CoreError::SourceNotFound(path.display().to_string()).into());
        }
    }

    let loader = DefaultSubtitleLoader::new(settings.subtitles.fetch_timeout_secs);
    let content = loader.load_subtitle_content(src).await;
    let store = parse_subtitles(&content);
    info!(
        "Parsed {} cues from {} ({})",
        store.len(),
        src,
        SubtitleFormat::detect(&content)
    );
    Ok(store)
}

async fn cmd_cues(
    src: &str,
    at: Option<&str>,
    settings: &PlayerSettings,
    json: bool,
) -> anyhow::Result<()> {
    let store = load_store(src, settings).await?;
    let position = at.map(parse_to_ms);
    let cues: Vec<&SubtitleCue> = match position {
        Some(position) => store.get_active_cues(position),
        None => store.iter().collect(),
    };

    if json {
        return print_json(&cues);
    }

    // Show what a viewer would see at that moment
    if let Some(position) = position {
        if let Some(text) = store.active_text(position) {
            println!("{}", text);
        }
        return Ok(());
    }

    for cue in &cues {
        println!(
            "{:>4}  {} --> {}  {}",
            cue.index,
            format_srt_timestamp(cue.start_time),
            format_srt_timestamp(cue.end_time),
            cue.lines().collect::<Vec<_>>().join(" / ")
        );
    }
    if let Some(last_end) = store.last_end_ms() {
        println!("{} cues, last ends at {}", cues.len(), format_millis(last_end));
    }
    Ok(())
}

async fn cmd_convert(
    src: &str,
    to: TargetFormat,
    settings: &PlayerSettings,
    json: bool,
) -> anyhow::Result<()> {
    let store = load_store(src, settings).await?;
    if store.is_empty() {
        return Err(CliError::NoCues(src.to_string()).into());
    }

    let (format, content) = match to {
        TargetFormat::Srt => (SubtitleFormat::Srt, export_srt(&store)),
        TargetFormat::Vtt => (SubtitleFormat::WebVtt, export_vtt(&store)),
    };

    if json {
        print_json(&serde_json::json!({
            "format": format.to_string(),
            "cues": store.len(),
            "lastEndMs": store.last_end_ms(),
            "content": content,
        }))
    } else {
        print!("{}", content);
        Ok(())
    }
}

// =============================================================================
// probe / play
// =============================================================================

fn build_player(settings: &PlayerSettings) -> MediaPlayer {
    let loader = Arc::new(DefaultSubtitleLoader::new(
        settings.subtitles.fetch_timeout_secs,
    ));
    let registry = BackendRegistry::new();
    let factory = registry.resolve_or_audio_only(settings.backend_kind());
    MediaPlayer::with_settings(factory, loader, settings)
}

async fn settle_open(ticket: OpenTicket, source: &str) -> Result<PlaybackState, CliError> {
    match ticket.wait().await {
        OpenOutcome::Ready(state) => Ok(state),
        OpenOutcome::Failed(e) => Err(CliError::Playback(e)),
        OpenOutcome::Superseded | OpenOutcome::Released => {
            Err(CliError::Interrupted(source.to_string()))
        }
    }
}

async fn cmd_probe(source: &str, settings: &PlayerSettings, json: bool) -> anyhow::Result<()> {
    let loader = Arc::new(DefaultSubtitleLoader::new(
        settings.subtitles.fetch_timeout_secs,
    ));
    let player = MediaPlayer::new(Arc::new(AudioOnlyFactory), loader);

    let ticket = player.open(source);
    player.pause();
    let state = settle_open(ticket, source).await?;

    let report = ProbeReport {
        source,
        state,
        duration_ms: player.current_duration(),
        metadata: player.metadata(),
    };
    player.release();

    if json {
        return print_json(&report);
    }

    let meta = &report.metadata;
    println!("Source:      {}", report.source);
    println!(
        "Duration:    {}",
        report
            .duration_ms
            .map(format_millis)
            .unwrap_or_else(|| "unknown".to_string())
    );
    if let Some(title) = &meta.title {
        println!("Title:       {}", title);
    }
    if let Some(mime) = &meta.mime_type {
        println!("MIME type:   {}", mime);
    }
    if let Some(channels) = meta.audio_channels {
        println!("Channels:    {}", channels);
    }
    if let Some(rate) = meta.audio_sample_rate {
        println!("Sample rate: {} Hz", rate);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_play(
    source: &str,
    subtitles: Option<&str>,
    volume: Option<f32>,
    looping: bool,
    duration_secs: Option<u64>,
    settings: &PlayerSettings,
    json: bool,
) -> anyhow::Result<()> {
    let player = build_player(settings);
    player.set_error_listener(|e| error!("Playback error ({}): {}", e.kind(), e.message()));
    if let Some(volume) = volume {
        player.set_volume(volume);
    }
    if looping {
        player.set_looping(true);
    }

    settle_open(player.open(source), source).await?;

    if let Some(src) = subtitles.filter(|_| settings.subtitles.enabled) {
        let track = SubtitleTrack::new("External", &settings.subtitles.preferred_language, src);
        if let SubtitleOutcome::Loaded(0) = player.select_subtitle_track(&track).wait().await {
            eprintln!("No subtitle cues available from {}", src);
        }
    }

    let deadline = duration_secs.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }

        let state = player.current_player_state().unwrap_or(PlaybackState::Idle);
        let status = PlaybackStatus {
            state,
            position_ms: player.current_position(),
            duration_ms: player.current_duration(),
            levels: if settings.audio_levels.enabled {
                player.audio_levels()
            } else {
                None
            },
            subtitles: player
                .active_subtitles()
                .into_iter()
                .map(|cue| cue.text)
                .collect(),
        };
        print_status(&status, json)?;

        if matches!(state, PlaybackState::Idle | PlaybackState::Paused) {
            break;
        }
        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            break;
        }
    }

    player.stop();
    player.release();
    Ok(())
}

fn print_status(status: &PlaybackStatus, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(status)?);
        return Ok(());
    }

    let position = status.position_ms.map(format_millis).unwrap_or_default();
    let duration = status
        .duration_ms
        .map(format_millis)
        .unwrap_or_else(|| "--:--".to_string());
    let levels = status
        .levels
        .map(|l| format!("  L {:.2} R {:.2}", l.left, l.right))
        .unwrap_or_default();
    let text = status.subtitles.join(" / ");

    println!(
        "[{:<9}] {} / {}{}  {}",
        status.state.to_string(),
        position,
        duration,
        levels,
        text
    );
    Ok(())
}

// =============================================================================
// settings
// =============================================================================

fn cmd_settings(manager: &SettingsManager, action: SettingsAction, json: bool) -> anyhow::Result<()> {
    let settings = match action {
        SettingsAction::Show => manager.load(),
        SettingsAction::Reset => manager.reset()?,
    };

    if !json {
        println!("# {}", manager.settings_path().display());
    }
    print_json(&settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_play_flags() {
        let cli = Cli::try_parse_from([
            "mediaplayer",
            "--json",
            "play",
            "song.wav",
            "--subtitles",
            "song.srt",
            "--volume",
            "0.5",
            "--loop",
            "--for",
            "3",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Commands::Play {
                source,
                subtitles,
                volume,
                looping,
                duration_secs,
            } => {
                assert_eq!(source, "song.wav");
                assert_eq!(subtitles.as_deref(), Some("song.srt"));
                assert_eq!(volume, Some(0.5));
                assert!(looping);
                assert_eq!(duration_secs, Some(3));
            }
            _ => panic!("expected play command"),
        }
    }

    #[test]
    fn test_time_format_accepts_negative_seconds() {
        let cli = Cli::try_parse_from(["mediaplayer", "time", "format", "-5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Time {
                action: TimeAction::Format { seconds }
            } if seconds == -5.0
        ));
    }

    #[test]
    fn test_settings_manager_uses_config_flag() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let manager = settings_manager(Some(temp_dir.path().to_path_buf())).unwrap();
        assert_eq!(
            manager.settings_path(),
            &temp_dir.path().join("settings.json")
        );
    }
}
