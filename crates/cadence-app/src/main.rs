//! # Cadence
//!
//! Headless player for the cadence engine: plays one file through the
//! default audio output, logging playback events until it finishes.

mod cli;

use anyhow::{Context, Result};
use cadence_core::{validate_speed, PlayerConfig};
use cadence_engine::{PlaybackState, Player, PlayerEvent};
use cli::{Command, Options};
use std::process::ExitCode;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=info,cadence_engine=info".into()),
        )
        .init();

    let options = match cli::parse(std::env::args().skip(1)) {
        Ok(Command::Play(options)) => options,
        Ok(Command::Help) => {
            println!("{}", cli::USAGE);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("error: {e}\n\n{}", cli::USAGE);
            return ExitCode::from(2);
        }
    };

    match run(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(options: &Options) -> Result<PlayerConfig> {
    let mut config = match &options.config {
        Some(path) => PlayerConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => PlayerConfig::load().context("loading config")?,
    };
    if let Some(speed) = options.speed {
        validate_speed(speed)?;
        config.speed = speed;
    }
    Ok(config)
}

fn run(options: &Options) -> Result<()> {
    info!("Starting Cadence v{}", env!("CARGO_PKG_VERSION"));
    let config = load_config(options)?;
    let player = Player::with_defaults(config);
    let events = player.events();

    let info = player
        .load_file(&options.file)
        .with_context(|| format!("opening {}", options.file.display()))?;
    info!(
        "{}: {:.1} s{}",
        options.file.display(),
        info.duration_ms as f64 / 1000.0,
        if info.video.is_some() { ", with video" } else { "" }
    );

    player.play()?;
    if let Some(target) = options.seek_ms {
        let report = player.seek(target)?;
        info!("Seeked to {} ms", report.target_ms);
    }

    let mut last_second = -1;
    for event in &events {
        match event {
            PlayerEvent::PositionChanged(ms) => {
                if ms / 1000 != last_second {
                    last_second = ms / 1000;
                    debug!("Position {}:{:02}", last_second / 60, last_second % 60);
                }
            }
            PlayerEvent::FrameReady(frame) => {
                trace!("Frame {} ms ({}x{})", frame.pts_ms, frame.width, frame.height);
            }
            PlayerEvent::VideoDimensionsChanged(d) => info!("Video {}x{}", d.width, d.height),
            PlayerEvent::StateChanged(state) => debug!("State {state}"),
            PlayerEvent::SpeedChanged(speed) => info!("Speed {speed}x"),
            PlayerEvent::DurationChanged(ms) => debug!("Duration {ms} ms"),
            PlayerEvent::Error(message) => warn!("{message}"),
            PlayerEvent::PlaybackFinished => {
                info!("Playback finished");
                break;
            }
        }
        if player.state() == PlaybackState::Stopped {
            break;
        }
    }

    if let Some(stats) = player.stats() {
        info!(
            "Audio: {} packets decoded, {} chunks written, {} decode errors",
            stats.audio.packets_decoded, stats.audio.chunks_written, stats.audio.decode_errors
        );
        if let Some(video) = stats.video {
            info!("Video: {} frames presented", video.frames_presented);
        }
    }
    player.stop()?;
    Ok(())
}
