//! Dispatch loop: reads container packets and routes them to the pipelines.
//!
//! Every tick reads at most one packet, hands it to the video queue or the
//! audio worker, then gives the video stage one chance to present a frame.
//! The tick holds the session lock for its whole duration and never touches
//! the audio pipeline lock.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::audio_worker::SharedEndOfStream;
use crate::backend::Demuxer;
use crate::clock::SharedClock;
use crate::events::{Notifier, PlayerEvent};
use crate::pacer::{Pacer, PacerState, SharedPacer};
use crate::queue::SharedQueue;
use crate::video::{VideoOutcome, VideoStage};
use cadence_core::{Dimensions, Error, MediaInfo, Packet, Result, RgbFrame};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Consecutive read failures after which the container counts as exhausted.
const MAX_READ_ERRORS: u32 = 32;

/// Per-file state owned by the dispatch loop.
pub struct Session {
    pub demuxer: Box<dyn Demuxer>,
    pub info: MediaInfo,
    pub video: Option<VideoStage>,
    exhausted: bool,
    read_errors: u32,
    finished: bool,
    last_reported_ms: Option<i64>,
}

impl Session {
    pub fn new(demuxer: Box<dyn Demuxer>, info: MediaInfo, video: Option<VideoStage>) -> Self {
        Self {
            demuxer,
            info,
            video,
            exhausted: false,
            read_errors: 0,
            finished: false,
            last_reported_ms: None,
        }
    }

    /// Whether the demuxer has run out of packets.
    pub const fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Forget end-of-stream state after the read position moved.
    pub fn rewind(&mut self) {
        self.exhausted = false;
        self.read_errors = 0;
        self.finished = false;
        self.last_reported_ms = None;
    }
}

/// The loaded session, if any.
pub type SharedSession = Arc<Mutex<Option<Session>>>;

/// What the player currently shows.
#[derive(Debug, Clone, Default)]
pub struct Presentation {
    pub position_ms: i64,
    pub frame: Option<Arc<RgbFrame>>,
    pub dimensions: Option<Dimensions>,
}

pub type SharedPresentation = Arc<RwLock<Presentation>>;

/// Everything a dispatch tick works with.
pub struct Dispatcher {
    pub session: SharedSession,
    pub audio_packets: SharedQueue<Packet>,
    pub audio_end: SharedEndOfStream,
    pub clock: SharedClock,
    pub presentation: SharedPresentation,
    pub notifier: Notifier,
}

impl Dispatcher {
    /// One dispatch cycle.
    pub fn tick(&self) {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return;
        };

        if !session.exhausted {
            self.read(session);
        }
        self.drive_video(session);
        self.report(session);
    }

    fn read(&self, session: &mut Session) {
        match session.demuxer.read_packet() {
            Ok(Some(packet)) => {
                session.read_errors = 0;
                self.route(session, packet);
            }
            Ok(None) => {
                debug!("Container exhausted");
                session.exhausted = true;
                self.audio_end.mark_input_ended();
            }
            Err(e) => {
                session.read_errors += 1;
                warn!("Packet read failed: {e}");
                if session.read_errors >= MAX_READ_ERRORS {
                    warn!("Giving up after {MAX_READ_ERRORS} read failures");
                    session.exhausted = true;
                    self.audio_end.mark_input_ended();
                }
            }
        }
    }

    fn route(&self, session: &Session, packet: Packet) {
        let index = packet.stream_index;
        match &session.video {
            Some(video) if session.info.video.as_ref().is_some_and(|v| v.index == index) => {
                video.push(packet);
            }
            _ if index == session.info.audio.index => self.audio_packets.push(packet),
            _ => trace!("Dropping packet of stream {index}"),
        }
    }

    fn drive_video(&self, session: &mut Session) {
        let Some(video) = session.video.as_mut() else {
            return;
        };
        if let VideoOutcome::Presented {
            frame,
            position_ms,
            dimensions_changed,
        } = video.step(self.clock.now_ms())
        {
            let dimensions = Dimensions::new(frame.width, frame.height);
            {
                let mut presentation = self.presentation.write();
                presentation.position_ms = position_ms;
                presentation.frame = Some(frame.clone());
                presentation.dimensions = Some(dimensions);
            }
            if dimensions_changed {
                self.notifier
                    .emit(PlayerEvent::VideoDimensionsChanged(dimensions));
            }
            self.notifier.emit(PlayerEvent::PositionChanged(position_ms));
            self.notifier.emit(PlayerEvent::FrameReady(frame));
            session.last_reported_ms = Some(position_ms);
        }
    }

    fn report(&self, session: &mut Session) {
        if session.video.is_none() {
            let now = self.clock.now_ms();
            if session.last_reported_ms != Some(now) {
                self.presentation.write().position_ms = now;
                self.notifier.emit(PlayerEvent::PositionChanged(now));
                session.last_reported_ms = Some(now);
            }
        }

        if session.exhausted && !session.finished {
            let video_done = session.video.as_ref().map_or(true, |v| v.queue().is_empty());
            // Played out means decoded, filtered and drained from the sink.
            if video_done && self.audio_packets.is_empty() && self.audio_end.is_played_out() {
                session.finished = true;
                info!("Playback finished");
                self.notifier.emit(PlayerEvent::PlaybackFinished);
            }
        }
    }
}

/// Runs a [`Dispatcher`] on its own thread. Starts paused.
pub struct DispatchWorker {
    pacer: SharedPacer,
    thread: Option<JoinHandle<()>>,
}

impl DispatchWorker {
    pub fn spawn(dispatcher: Dispatcher, period: Duration) -> Result<Self> {
        let pacer = Arc::new(Pacer::new(period, PacerState::Paused));
        let worker_pacer = pacer.clone();
        let thread = std::thread::Builder::new()
            .name("cadence-dispatch".to_string())
            .spawn(move || {
                debug!("Dispatch loop started");
                let mut deadline = Instant::now();
                while worker_pacer.wait_next(&mut deadline) {
                    dispatcher.tick();
                }
                debug!("Dispatch loop exited");
            })
            .map_err(|e| Error::Internal(format!("Failed to spawn dispatch loop: {e}")))?;

        Ok(Self {
            pacer,
            thread: Some(thread),
        })
    }

    /// Stop ticking. A tick already running finishes first; callers that
    /// need it done take the session lock afterwards.
    pub fn pause(&self) {
        self.pacer.pause();
    }

    pub fn resume(&self) {
        self.pacer.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pacer.is_paused()
    }

    pub fn stop(&mut self) {
        self.pacer.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Dispatch loop panicked");
            }
            debug!("Dispatch loop stopped");
        }
    }
}

impl Drop for DispatchWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
