//! # cadence-engine
//!
//! Audio-clocked audio/video playback pipeline for Cadence.
//!
//! Features:
//! - Dispatch loop routing container packets to the audio and video paths
//! - Audio worker publishing the master clock from sink progress
//! - Clock-gated video presentation
//! - Pitch-preserving speed changes through a rebuildable filter graph
//! - Seek with full flush and clock reset

pub mod audio_worker;
pub mod backend;
pub mod clock;
pub mod dispatch;
pub mod events;
pub mod filter;
pub mod output;
pub mod pacer;
pub mod player;
pub mod queue;
pub mod seek;
pub mod video;

#[cfg(test)]
mod testing;

pub use audio_worker::{AudioPipeline, AudioStats, AudioWorker, EndOfStream, SharedEndOfStream};
pub use backend::{default_backend, MediaBackend, MediaSession, SharedBackend};
pub use clock::{Clock, ClockCalibration, SharedClock};
pub use events::{PlaybackState, PlayerEvent};
pub use filter::{FilterGraph, FilterGraphManager};
pub use output::{default_output, AudioSink, OutputProvider, SharedOutput, VirtualOutput};
pub use player::{Player, PlayerStats};
pub use queue::{Queue, QueueStats, SharedQueue};
pub use seek::SeekReport;
