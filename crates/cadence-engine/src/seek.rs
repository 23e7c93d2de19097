//! Seek coordination: flush every stage, reposition, reset the clock.

use crate::audio_worker::AudioWorker;
use crate::clock::Clock;
use crate::dispatch::{DispatchWorker, SharedPresentation, SharedSession};
use crate::events::{Notifier, PlayerEvent};
use cadence_core::{Error, Result};
use tracing::{debug, info, warn};

/// What a completed seek did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekReport {
    /// Target after clamping to the file.
    pub target_ms: i64,
    /// Position the container landed on (at or before the target).
    pub landed_ms: i64,
    pub audio_packets_dropped: usize,
    pub video_packets_dropped: usize,
}

/// Clamp a seek target into `[0, duration]`. An unknown (zero) duration
/// only clamps below.
pub const fn clamp_target(target_ms: i64, duration_ms: i64) -> i64 {
    let target = if target_ms < 0 { 0 } else { target_ms };
    if duration_ms > 0 && target > duration_ms {
        duration_ms
    } else {
        target
    }
}

/// The stages a seek has to coordinate.
pub struct SeekTargets<'a> {
    pub session: &'a SharedSession,
    pub dispatch: &'a DispatchWorker,
    pub audio: &'a AudioWorker,
    pub clock: &'a Clock,
    pub presentation: &'a SharedPresentation,
    pub notifier: &'a Notifier,
}

/// Move playback to `target_ms`.
///
/// Both workers are paused and every queue is drained before the container
/// is repositioned. On success the clock is set to the target, the new
/// position is announced and both workers resume. When the container cannot be repositioned the workers stay
/// paused and [`Error::Seek`] is returned.
pub fn perform_seek(targets: &SeekTargets<'_>, target_ms: i64) -> Result<SeekReport> {
    targets.dispatch.pause();
    let mut guard = targets.session.lock();
    let Some(session) = guard.as_mut() else {
        return Err(Error::InvalidState("stopped".to_string()));
    };
    let target_ms = clamp_target(target_ms, session.info.duration_ms);
    debug!("Seeking to {target_ms} ms");

    targets.audio.pause();
    let audio_packets_dropped = targets.audio.flush();
    let video_packets_dropped = session.video.as_mut().map_or(0, |v| v.flush());

    let landed_ms = match session.demuxer.seek(target_ms) {
        Ok(landed) => landed,
        Err(e) => {
            warn!("Seek to {target_ms} ms failed: {e}");
            return Err(match e {
                Error::Seek(_) => e,
                other => Error::Seek(other.to_string()),
            });
        }
    };

    session.rewind();
    targets.clock.reset(target_ms);
    targets.presentation.write().position_ms = target_ms;
    drop(guard);
    targets
        .notifier
        .emit(PlayerEvent::PositionChanged(target_ms));

    targets.audio.resume();
    targets.dispatch.resume();

    info!("Seeked to {target_ms} ms (container at {landed_ms} ms)");
    Ok(SeekReport {
        target_ms,
        landed_ms,
        audio_packets_dropped,
        video_packets_dropped,
    })
}
