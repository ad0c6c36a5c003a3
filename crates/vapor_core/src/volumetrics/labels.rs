//! Render graph labels for the volumetric fog pipeline.

use bevy::render::render_graph::RenderLabel;

/// Labels for volumetric fog nodes in the render graph.
#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub enum VolumetricsLabel {
    /// The whole fog pass: clear, realtime sampling, baked sampling,
    /// compositing and blending, repeated per eye. One node owns all of it
    /// because every stage shares the frame-transient fog buffers.
    FogPass,
}
