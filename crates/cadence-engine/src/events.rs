//! Player state and outgoing notifications.

use cadence_core::{Dimensions, RgbFrame};
use crossbeam_channel::Sender;
use std::sync::Arc;
use tracing::trace;

/// Playback state of the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Nothing loaded.
    #[default]
    Stopped,
    /// A file is loaded and playback has not started.
    Ready,
    Running,
    Paused,
}

impl PlaybackState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Events emitted by the player.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Playback state changed.
    StateChanged(PlaybackState),
    /// Duration of the loaded file, in milliseconds.
    DurationChanged(i64),
    /// Presentation position, in milliseconds.
    PositionChanged(i64),
    /// The presented picture size changed.
    VideoDimensionsChanged(Dimensions),
    /// A new frame is ready for presentation.
    FrameReady(Arc<RgbFrame>),
    /// The active speed factor changed.
    SpeedChanged(f64),
    /// All streams have been played out.
    PlaybackFinished,
    /// A user-visible failure.
    Error(String),
}

/// Sending half of the event channel.
///
/// Nobody listening is not an error: events are simply dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<PlayerEvent>,
}

impl Notifier {
    pub const fn new(tx: Sender<PlayerEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: PlayerEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event dropped, receiver gone");
        }
    }
}
