//! Player façade: file lifecycle, transport controls and queries.
//!
//! Control calls are serialized by one mutex over the loaded file. Locks are
//! always taken in the order control, session, audio pipeline.

use crate::audio_worker::{AudioPipeline, AudioStats, AudioWorker};
use crate::backend::{default_backend, MediaSession, SharedBackend};
use crate::clock::{shared_clock, SharedClock};
use crate::dispatch::{
    DispatchWorker, Dispatcher, Presentation, Session, SharedPresentation, SharedSession,
};
use crate::events::{Notifier, PlaybackState, PlayerEvent};
use crate::output::{default_output, SharedOutput};
use crate::queue::QueueStats;
use crate::seek::{perform_seek, SeekReport, SeekTargets};
use crate::video::{VideoStage, VideoStats};
use cadence_core::{validate_speed, Dimensions, Error, MediaInfo, PlayerConfig, Result, RgbFrame};
use crossbeam_channel::{unbounded, Receiver};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Snapshot of pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStats {
    pub clock_ms: i64,
    pub audio: AudioStats,
    pub audio_packets: QueueStats,
    pub audio_chunks: QueueStats,
    pub video: Option<VideoStats>,
    pub video_packets: Option<QueueStats>,
}

/// Workers of the loaded file.
struct Loaded {
    info: MediaInfo,
    audio: AudioWorker,
    dispatch: DispatchWorker,
}

/// Audio-clocked media player.
pub struct Player {
    config: PlayerConfig,
    backend: SharedBackend,
    output: SharedOutput,
    clock: SharedClock,
    session: SharedSession,
    presentation: SharedPresentation,
    loaded: Mutex<Option<Loaded>>,
    state: RwLock<PlaybackState>,
    speed: RwLock<f64>,
    notifier: Notifier,
    events: Receiver<PlayerEvent>,
}

impl Player {
    pub fn new(config: PlayerConfig, backend: SharedBackend, output: SharedOutput) -> Self {
        let (tx, events) = unbounded();
        let speed = config.speed;
        info!(
            "Player created: backend {}, output {}",
            backend.name(),
            output.name()
        );
        Self {
            config,
            backend,
            output,
            clock: shared_clock(),
            session: Arc::default(),
            presentation: Arc::default(),
            loaded: Mutex::new(None),
            state: RwLock::new(PlaybackState::Stopped),
            speed: RwLock::new(speed),
            notifier: Notifier::new(tx),
            events,
        }
    }

    /// Player with the best backend and output compiled in.
    pub fn with_defaults(config: PlayerConfig) -> Self {
        let output = default_output(config.virtual_sink_capacity_ms);
        Self::new(config, default_backend(), output)
    }

    pub const fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Open `path` and get ready to play it. Anything already loaded is
    /// stopped first.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<MediaInfo> {
        let path = path.as_ref();
        let mut loaded = self.loaded.lock();
        self.teardown(&mut loaded);

        info!("Loading {}", path.display());
        let MediaSession {
            info,
            demuxer,
            audio,
            video,
        } = self.backend.open(path)?;

        let sink = self.output.open(&audio.format().packed())?;
        self.clock.reset(0);
        *self.presentation.write() = Presentation {
            dimensions: info.dimensions,
            ..Presentation::default()
        };

        let speed = *self.speed.read();
        let config = PlayerConfig {
            speed,
            ..self.config.clone()
        };
        let pipeline = AudioPipeline::new(
            audio,
            sink,
            info.audio.time_base,
            self.clock.clone(),
            &config,
        );
        if !pipeline.has_filter_graph() {
            self.notifier.emit(PlayerEvent::Error(format!(
                "No audio filter graph for {} at {speed}x",
                path.display()
            )));
        }
        let audio = AudioWorker::spawn(pipeline, Duration::from_millis(config.audio_period_ms))?;

        let video = match (video, info.video.as_ref()) {
            (Some(parts), Some(stream)) => Some(VideoStage::new(parts, stream.time_base)),
            (Some(_), None) => {
                warn!("Video decoder without a video stream, ignoring it");
                None
            }
            _ => None,
        };
        *self.session.lock() = Some(Session::new(demuxer, info.clone(), video));

        let dispatcher = Dispatcher {
            session: self.session.clone(),
            audio_packets: audio.packets(),
            audio_end: audio.end_of_stream(),
            clock: self.clock.clone(),
            presentation: self.presentation.clone(),
            notifier: self.notifier.clone(),
        };
        let dispatch = match DispatchWorker::spawn(
            dispatcher,
            Duration::from_millis(config.dispatch_period_ms),
        ) {
            Ok(dispatch) => dispatch,
            Err(e) => {
                *self.session.lock() = None;
                return Err(e);
            }
        };

        *loaded = Some(Loaded {
            info: info.clone(),
            audio,
            dispatch,
        });

        info!(
            "Loaded {}: {} ms, audio {} Hz/{}ch{}",
            path.display(),
            info.duration_ms,
            info.audio_format.sample_rate,
            info.audio_format.channels,
            info.dimensions
                .map(|d| format!(", video {}x{}", d.width, d.height))
                .unwrap_or_default()
        );
        self.notifier
            .emit(PlayerEvent::DurationChanged(info.duration_ms));
        self.set_state(PlaybackState::Ready);
        Ok(info)
    }

    /// Start or resume playback.
    pub fn play(&self) -> Result<()> {
        let loaded = self.loaded.lock();
        let Some(loaded) = loaded.as_ref() else {
            return Err(Error::InvalidState("stopped".to_string()));
        };
        match self.state() {
            PlaybackState::Running => Ok(()),
            _ => {
                loaded.audio.resume();
                loaded.dispatch.resume();
                self.set_state(PlaybackState::Running);
                Ok(())
            }
        }
    }

    /// Toggle between running and paused. Does nothing before playback
    /// has started.
    pub fn pause(&self) -> Result<()> {
        let loaded = self.loaded.lock();
        let Some(loaded) = loaded.as_ref() else {
            return Ok(());
        };
        match self.state() {
            PlaybackState::Running => {
                loaded.dispatch.pause();
                // Wait out a tick that was already running.
                drop(self.session.lock());
                loaded.audio.pause();
                self.set_state(PlaybackState::Paused);
            }
            PlaybackState::Paused => {
                loaded.audio.resume();
                loaded.dispatch.resume();
                self.set_state(PlaybackState::Running);
            }
            PlaybackState::Ready | PlaybackState::Stopped => {}
        }
        Ok(())
    }

    /// Stop playback and release the file.
    pub fn stop(&self) -> Result<()> {
        let mut loaded = self.loaded.lock();
        self.teardown(&mut loaded);
        Ok(())
    }

    fn teardown(&self, loaded: &mut Option<Loaded>) {
        let Some(mut current) = loaded.take() else {
            return;
        };
        current.dispatch.stop();
        current.audio.stop();
        if let Some(mut session) = self.session.lock().take() {
            if let Some(video) = session.video.as_mut() {
                video.flush();
            }
        }
        drop(current);

        self.clock.reset(0);
        *self.presentation.write() = Presentation::default();
        debug!("Playback torn down");
        self.notifier.emit(PlayerEvent::PositionChanged(0));
        self.notifier.emit(PlayerEvent::DurationChanged(0));
        self.set_state(PlaybackState::Stopped);
    }

    /// Jump to `position_ms`. Playback runs afterwards; if the container
    /// cannot be repositioned the player is left paused.
    pub fn seek(&self, position_ms: i64) -> Result<SeekReport> {
        let loaded = self.loaded.lock();
        let Some(current) = loaded.as_ref() else {
            return Err(Error::InvalidState("stopped".to_string()));
        };
        let state = self.state();
        if !matches!(state, PlaybackState::Running | PlaybackState::Paused) {
            return Err(Error::InvalidState(state.to_string()));
        }

        let targets = SeekTargets {
            session: &self.session,
            dispatch: &current.dispatch,
            audio: &current.audio,
            clock: &self.clock,
            presentation: &self.presentation,
            notifier: &self.notifier,
        };
        match perform_seek(&targets, position_ms) {
            Ok(report) => {
                self.set_state(PlaybackState::Running);
                Ok(report)
            }
            Err(e) => {
                self.notifier.emit(PlayerEvent::Error(e.to_string()));
                self.set_state(PlaybackState::Paused);
                Err(e)
            }
        }
    }

    /// Change the playback speed. Without a loaded file the factor is kept
    /// for the next one.
    pub fn set_speed(&self, factor: f64) -> Result<()> {
        validate_speed(factor)?;
        let loaded = self.loaded.lock();
        if let Some(current) = loaded.as_ref() {
            if let Err(e) = current.audio.set_speed(factor) {
                self.notifier.emit(PlayerEvent::Error(e.to_string()));
                return Err(e);
            }
        }
        *self.speed.write() = factor;
        debug!("Speed set to {factor}x");
        self.notifier.emit(PlayerEvent::SpeedChanged(factor));
        Ok(())
    }

    fn set_state(&self, next: PlaybackState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            debug!("State {previous} -> {next}");
            self.notifier.emit(PlayerEvent::StateChanged(next));
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.read()
    }

    /// Presentation position in milliseconds.
    pub fn position(&self) -> i64 {
        self.presentation.read().position_ms
    }

    /// Duration of the loaded file in milliseconds (0 when nothing is loaded).
    pub fn duration(&self) -> i64 {
        self.loaded
            .lock()
            .as_ref()
            .map_or(0, |current| current.info.duration_ms)
    }

    pub fn speed(&self) -> f64 {
        *self.speed.read()
    }

    pub fn video_dimensions(&self) -> Option<Dimensions> {
        self.presentation.read().dimensions
    }

    /// Most recently presented frame.
    pub fn current_frame(&self) -> Option<Arc<RgbFrame>> {
        self.presentation.read().frame.clone()
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.loaded
            .lock()
            .as_ref()
            .map(|current| current.info.clone())
    }

    /// Receiver for player events. Every clone competes for the same events.
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events.clone()
    }

    pub fn try_recv_event(&self) -> Option<PlayerEvent> {
        self.events.try_recv().ok()
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<PlayerEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Pipeline counters, when a file is loaded.
    pub fn stats(&self) -> Option<PlayerStats> {
        let loaded = self.loaded.lock();
        let current = loaded.as_ref()?;
        let (video, video_packets) = self
            .session
            .lock()
            .as_ref()
            .and_then(|s| s.video.as_ref())
            .map_or((None, None), |v| (Some(v.stats()), Some(v.queue().stats())));

        Some(PlayerStats {
            clock_ms: self.clock.now_ms(),
            audio: current.audio.stats(),
            audio_packets: current.audio.packets().stats(),
            audio_chunks: current.audio.chunks().stats(),
            video,
            video_packets,
        })
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let mut loaded = self.loaded.lock();
        self.teardown(&mut loaded);
    }
}
