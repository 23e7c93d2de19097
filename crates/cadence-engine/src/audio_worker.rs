//! Audio worker: decode, tempo filter, sink output and clock publication.
//!
//! Everything the worker touches lives in one [`AudioPipeline`] behind a
//! single mutex. Each cycle and each speed change hold that mutex, so a
//! filter graph is never swapped out from under a cycle in progress.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::backend::AudioDecoder;
use crate::clock::{ClockCalibration, SharedClock};
use crate::filter::{FilterGraph, FilterGraphManager};
use crate::output::AudioSink;
use crate::pacer::{Pacer, PacerState, SharedPacer};
use crate::queue::{shared_queue, SharedQueue};
use cadence_core::{
    AudioFrame, DecodeError, DecodedAudioChunk, Error, Packet, PlayerConfig, Rational, Result,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Counters kept by the audio pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioStats {
    pub packets_decoded: u64,
    pub decode_errors: u64,
    pub frames_dropped: u64,
    pub chunks_produced: u64,
    pub chunks_written: u64,
}

/// End-of-input handshake between the dispatch loop and the audio worker.
///
/// The dispatch loop marks the input ended once the container is exhausted.
/// The worker then runs out the filter and marks the stream played out when
/// the sink has nothing left to play.
#[derive(Debug, Default)]
pub struct EndOfStream {
    input_ended: AtomicBool,
    played_out: AtomicBool,
}

pub type SharedEndOfStream = Arc<EndOfStream>;

impl EndOfStream {
    pub fn mark_input_ended(&self) {
        self.input_ended.store(true, Ordering::Release);
    }

    pub fn input_ended(&self) -> bool {
        self.input_ended.load(Ordering::Acquire)
    }

    /// Every sample of the stream has left the sink.
    pub fn is_played_out(&self) -> bool {
        self.played_out.load(Ordering::Acquire)
    }

    fn mark_played_out(&self) {
        self.played_out.store(true, Ordering::Release);
    }

    fn reset(&self) {
        self.input_ended.store(false, Ordering::Release);
        self.played_out.store(false, Ordering::Release);
    }
}

/// State of the audio path for one loaded file.
pub struct AudioPipeline {
    decoder: Box<dyn AudioDecoder>,
    filters: FilterGraphManager,
    sink: Box<dyn AudioSink>,
    packets: SharedQueue<Packet>,
    chunks: SharedQueue<DecodedAudioChunk>,
    clock: SharedClock,
    calibration: ClockCalibration,
    /// Sink backlog at which output waits for playback to catch up.
    sink_target_bytes: usize,
    end: SharedEndOfStream,
    /// The filter has been run out for the current end of input.
    filter_drained: bool,
    /// Time base of the audio stream's packets.
    time_base: Rational,
    last_pts_ms: Option<i64>,
    /// Duration of everything in `chunks`.
    buffered_ms: i64,
    decode_burst: usize,
    low_watermark_ms: i64,
    high_watermark_ms: i64,
    paused: bool,
    stats: AudioStats,
}

impl AudioPipeline {
    /// Assemble a pipeline and build its first filter graph at `config.speed`.
    ///
    /// A graph that cannot be built leaves the pipeline without one; it then
    /// consumes packets without producing audio until a later speed change
    /// succeeds.
    pub fn new(
        decoder: Box<dyn AudioDecoder>,
        sink: Box<dyn AudioSink>,
        time_base: Rational,
        clock: SharedClock,
        config: &PlayerConfig,
    ) -> Self {
        let mut filters = FilterGraphManager::new(decoder.format());
        let sink_target_bytes = usize::try_from(config.sink_target_ms)
            .unwrap_or(usize::MAX)
            .saturating_mul(sink.format().byte_rate())
            / 1000;
        if let Err(e) = filters.set_speed(config.speed) {
            warn!("Starting without a filter graph: {e}");
        }

        Self {
            decoder,
            filters,
            sink,
            packets: shared_queue(),
            chunks: shared_queue(),
            clock,
            calibration: ClockCalibration::new(config.clock_lead_ms),
            sink_target_bytes: sink_target_bytes.max(1),
            end: Arc::default(),
            filter_drained: false,
            time_base,
            last_pts_ms: None,
            buffered_ms: 0,
            decode_burst: config.decode_burst.max(1),
            low_watermark_ms: config.low_watermark_ms,
            high_watermark_ms: config.high_watermark_ms,
            paused: true,
            stats: AudioStats::default(),
        }
    }

    /// Inbound packet queue, fed by the dispatch loop.
    pub fn packets(&self) -> SharedQueue<Packet> {
        self.packets.clone()
    }

    /// Filtered audio waiting for the sink.
    pub fn chunks(&self) -> SharedQueue<DecodedAudioChunk> {
        self.chunks.clone()
    }

    /// End-of-input state shared with the dispatch loop.
    pub fn end_of_stream(&self) -> SharedEndOfStream {
        self.end.clone()
    }

    pub const fn stats(&self) -> AudioStats {
        self.stats
    }

    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    pub const fn speed(&self) -> f64 {
        self.filters.factor()
    }

    pub const fn has_filter_graph(&self) -> bool {
        self.filters.is_active()
    }

    /// Number of graphs built so far.
    pub const fn graph_generation(&self) -> u64 {
        self.filters.generation()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        self.sink.set_paused(paused);
    }

    /// Rebuild the filter graph for `factor`. The previous graph stays
    /// active when the build fails.
    pub fn set_speed(&mut self, factor: f64) -> Result<()> {
        self.filters.set_speed(factor)
    }

    /// One worker cycle: feed the sink, then decode.
    pub fn cycle(&mut self) {
        if self.paused {
            return;
        }
        self.output();
        self.decode();
        self.finish_stream();
    }

    /// Hand the head chunk to the sink if it fits, and publish the clock.
    ///
    /// The sink is kept near `sink_target_bytes`: the projection counts its
    /// backlog on top of the chunk's own timestamp, so a deep sink would
    /// push the clock well ahead of what is audible.
    fn output(&mut self) {
        let Some(size) = self.chunks.peek_map(DecodedAudioChunk::byte_len) else {
            return;
        };
        let backlog = self.sink.backlog_bytes();
        // An empty sink always takes the chunk, even one larger than it.
        if backlog > 0 && (backlog >= self.sink_target_bytes || self.sink.bytes_free() < size) {
            trace!("Sink holds {backlog} bytes, waiting");
            return;
        }
        let Some(chunk) = self.chunks.pop() else {
            return;
        };
        self.buffered_ms -= chunk.duration_ms;

        let projected = self
            .calibration
            .project(&chunk, backlog, self.filters.factor());
        let now = self.clock.advance_to(projected);

        let written = self.sink.write(&chunk.data);
        if written < size {
            warn!("Sink took {written} of {size} bytes");
        }
        self.stats.chunks_written += 1;
        trace!("Audio chunk at {} ms written, clock {now} ms", chunk.pts_ms);
    }

    fn decode(&mut self) {
        let budget = if self.buffered_ms < self.low_watermark_ms {
            self.decode_burst
        } else if self.buffered_ms < self.high_watermark_ms {
            1
        } else {
            trace!("{} ms buffered, not decoding", self.buffered_ms);
            0
        };
        for _ in 0..budget {
            let Some(packet) = self.packets.pop() else {
                break;
            };
            self.decode_packet(&packet);
        }
    }

    fn decode_packet(&mut self, packet: &Packet) {
        if let Err(e) = self.decoder.send_packet(packet) {
            self.stats.decode_errors += 1;
            warn!("Dropping audio packet: {e}");
            return;
        }
        self.stats.packets_decoded += 1;

        let fallback_ms = packet.presentation_ms(self.time_base);
        loop {
            match self.decoder.receive_frame() {
                Ok(frame) => self.filter_frame(&frame, fallback_ms),
                Err(DecodeError::Again | DecodeError::EndOfStream) => break,
                Err(e) => {
                    self.stats.decode_errors += 1;
                    warn!("Audio decode failed: {e}");
                    break;
                }
            }
        }
    }

    /// Push one decoded frame through the graph and queue what comes out.
    fn filter_frame(&mut self, frame: &AudioFrame, fallback_ms: i64) {
        let pts_ms = frame
            .pts
            .map_or(fallback_ms, |pts| frame.format.time_base.ts_to_ms(pts));

        let Some(graph) = self.filters.graph_mut() else {
            self.stats.frames_dropped += 1;
            trace!("No filter graph, dropping frame at {pts_ms} ms");
            return;
        };
        if let Err(e) = graph.push_frame(frame) {
            self.stats.frames_dropped += 1;
            warn!("Filter rejected frame at {pts_ms} ms: {e}");
            return;
        }
        self.queue_filtered(pts_ms);
    }

    /// Queue every frame waiting in the graph's sink, stamped `pts_ms`.
    fn queue_filtered(&mut self, pts_ms: i64) {
        while let Some(filtered) = self.filters.graph_mut().and_then(FilterGraph::pull_frame) {
            if !filtered.has_data() {
                self.stats.frames_dropped += 1;
                continue;
            }
            // Timestamps never run backwards within the queue.
            let pts_ms = self.last_pts_ms.map_or(pts_ms, |last| pts_ms.max(last));
            self.last_pts_ms = Some(pts_ms);

            let chunk = DecodedAudioChunk {
                duration_ms: filtered.duration_ms(),
                samples: filtered.samples,
                data: filtered.planes[0].clone(),
                pts_ms,
            };
            self.buffered_ms += chunk.duration_ms;
            self.stats.chunks_produced += 1;
            self.chunks.push(chunk);
        }
    }

    /// Once the input has ended and every packet is decoded, run out the
    /// filter, then report the stream played out when the sink is empty.
    fn finish_stream(&mut self) {
        if !self.end.input_ended() || !self.packets.is_empty() {
            return;
        }
        if !self.filter_drained {
            self.filter_drained = true;
            if let Some(graph) = self.filters.graph_mut() {
                graph.drain();
                self.queue_filtered(self.last_pts_ms.unwrap_or(0));
            }
            debug!("End of audio input, {} ms left to play", self.buffered_ms);
        }
        if !self.end.is_played_out() && self.chunks.is_empty() && self.sink.backlog_bytes() == 0 {
            debug!("Audio played out");
            self.end.mark_played_out();
        }
    }

    /// Drop every queued packet and chunk, decoder and filter state, and the
    /// sink's backlog. Returns the number of packets discarded.
    pub fn flush(&mut self) -> usize {
        let packets = self.packets.clear();
        let chunks = self.chunks.clear();
        self.buffered_ms = 0;
        self.last_pts_ms = None;
        self.filter_drained = false;
        self.end.reset();

        self.decoder.flush();
        if self.filters.is_active() {
            if let Err(e) = self.filters.reset() {
                warn!("Filter reset failed: {e}");
            }
        }
        self.sink.clear();

        debug!("Audio pipeline flushed ({packets} packets, {chunks} chunks)");
        packets
    }
}

/// Shared handle to a pipeline.
pub type SharedPipeline = Arc<Mutex<AudioPipeline>>;

/// Runs an [`AudioPipeline`] on its own thread at a fixed period.
///
/// The worker starts paused.
pub struct AudioWorker {
    pipeline: SharedPipeline,
    packets: SharedQueue<Packet>,
    chunks: SharedQueue<DecodedAudioChunk>,
    end: SharedEndOfStream,
    pacer: SharedPacer,
    thread: Option<JoinHandle<()>>,
}

impl AudioWorker {
    pub fn spawn(pipeline: AudioPipeline, period: Duration) -> Result<Self> {
        let packets = pipeline.packets();
        let chunks = pipeline.chunks();
        let end = pipeline.end_of_stream();
        let pipeline = Arc::new(Mutex::new(pipeline));
        let pacer = Arc::new(Pacer::new(period, PacerState::Paused));

        let worker_pipeline = pipeline.clone();
        let worker_pacer = pacer.clone();
        let thread = std::thread::Builder::new()
            .name("cadence-audio".to_string())
            .spawn(move || {
                debug!("Audio worker started");
                let mut deadline = Instant::now();
                while worker_pacer.wait_next(&mut deadline) {
                    worker_pipeline.lock().cycle();
                }
                debug!("Audio worker exited");
            })
            .map_err(|e| Error::Internal(format!("Failed to spawn audio worker: {e}")))?;

        info!("Audio worker running every {} ms", period.as_millis());
        Ok(Self {
            pipeline,
            packets,
            chunks,
            end,
            pacer,
            thread: Some(thread),
        })
    }

    /// Stop doing work. Once this returns no cycle makes progress.
    pub fn pause(&self) {
        self.pacer.pause();
        self.pipeline.lock().set_paused(true);
    }

    pub fn resume(&self) {
        self.pipeline.lock().set_paused(false);
        self.pacer.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pipeline.lock().is_paused()
    }

    /// Discard all buffered audio. See [`AudioPipeline::flush`].
    pub fn flush(&self) -> usize {
        self.pipeline.lock().flush()
    }

    pub fn set_speed(&self, factor: f64) -> Result<()> {
        self.pipeline.lock().set_speed(factor)
    }

    pub fn speed(&self) -> f64 {
        self.pipeline.lock().speed()
    }

    pub fn stats(&self) -> AudioStats {
        self.pipeline.lock().stats()
    }

    pub fn packets(&self) -> SharedQueue<Packet> {
        self.packets.clone()
    }

    pub fn chunks(&self) -> SharedQueue<DecodedAudioChunk> {
        self.chunks.clone()
    }

    pub fn end_of_stream(&self) -> SharedEndOfStream {
        self.end.clone()
    }

    /// Nothing left to decode or play out of the queues.
    pub fn is_drained(&self) -> bool {
        self.packets.is_empty() && self.chunks.is_empty()
    }

    /// Lock the pipeline directly.
    pub fn pipeline(&self) -> &SharedPipeline {
        &self.pipeline
    }

    /// Stop the thread, wait for it, then discard everything it held.
    pub fn stop(&mut self) {
        self.pacer.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio worker panicked");
            }
            self.pipeline.lock().flush();
            debug!("Audio worker stopped");
        }
    }
}

impl Drop for AudioWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
