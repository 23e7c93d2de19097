//! Speed-change filter graph and its lifecycle.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

mod graph;
mod sample;
mod tempo;

pub use graph::FilterGraph;
pub use sample::{from_planar_f32, to_planar_f32};
pub use tempo::Tempo;

use cadence_core::{AudioFormat, Result};
use tracing::{debug, info, warn};

/// Owns the active filter graph for one audio stream.
///
/// A replacement graph is fully built before the current one is torn down,
/// so a failed rebuild leaves the previous graph (or none) in place.
pub struct FilterGraphManager {
    source: AudioFormat,
    factor: f64,
    graph: Option<FilterGraph>,
    generation: u64,
}

impl FilterGraphManager {
    /// Manager for `source` with no graph yet.
    pub const fn new(source: AudioFormat) -> Self {
        Self {
            source,
            factor: 1.0,
            graph: None,
            generation: 0,
        }
    }

    /// Rebuild the graph for a new speed factor.
    pub fn set_speed(&mut self, factor: f64) -> Result<()> {
        match FilterGraph::build(&self.source, factor) {
            Ok(graph) => {
                info!("Filter graph configured: {}", graph.description());
                self.graph = Some(graph);
                self.factor = factor;
                self.generation += 1;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to build filter graph at {factor}x: {e}");
                Err(e)
            }
        }
    }

    /// Rebuild at the current factor, discarding buffered filter state.
    pub fn reset(&mut self) -> Result<()> {
        debug!("Resetting filter graph at {}x", self.factor);
        self.set_speed(self.factor)
    }

    /// Factor of the active graph, or the last requested one if none exists.
    pub const fn factor(&self) -> f64 {
        self.factor
    }

    pub const fn is_active(&self) -> bool {
        self.graph.is_some()
    }

    /// Number of successful (re)builds.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub const fn source_format(&self) -> &AudioFormat {
        &self.source
    }

    pub fn graph_mut(&mut self) -> Option<&mut FilterGraph> {
        self.graph.as_mut()
    }
}
