//! Plugin wiring the volumetric fog pipeline into the render graph.

use bevy::core_pipeline::core_3d::graph::{Core3d, Node3d};
use bevy::prelude::*;
use bevy::render::{
    extract_component::ExtractComponentPlugin,
    extract_resource::ExtractResourcePlugin,
    render_graph::{RenderGraphExt, ViewNodeRunner},
    ExtractSchedule, Render, RenderApp, RenderSystems,
};

use super::bake::{handle_bake_requests, init_bake_gpu, BakeVolumes};
use super::extract::{extract_baked_volumes, extract_fog_lights, extract_fog_time};
use super::fog_node::FogPassNode;
use super::labels::VolumetricsLabel;
use super::pipeline::{init_fog_fallbacks, init_fog_noise_texture, init_fog_pipelines};
use super::prepare::{
    prepare_baked_volumes, prepare_fog_lights, prepare_fog_textures, prepare_fog_uniforms,
};
use super::probe::IndirectProbes;
use super::settings::{StereoEyes, VolumetricsCamera, VolumetricsProfile};
use super::shadow::FogShadowSources;

/// Plugin that enables grid-based volumetric fog.
///
/// ## Usage
///
/// ```rust,ignore
/// app.add_plugins(VolumetricsPlugin);
///
/// // Mark cameras for fog rendering
/// commands.spawn((
///     Camera3d::default(),
///     VolumetricsCamera::default(),
/// ));
/// ```
pub struct VolumetricsPlugin;

impl Plugin for VolumetricsPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<VolumetricsProfile>();
        app.init_resource::<IndirectProbes>();
        app.add_message::<BakeVolumes>();

        app.add_plugins(ExtractComponentPlugin::<VolumetricsCamera>::default());
        app.add_plugins(ExtractComponentPlugin::<StereoEyes>::default());
        app.add_plugins(ExtractResourcePlugin::<VolumetricsProfile>::default());

        // Baking runs in the main app; the direct pass shares the renderer's
        // device.
        app.add_systems(Startup, init_bake_gpu);
        app.add_systems(Update, handle_bake_requests);

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            warn!("RenderApp not found - volumetric fog disabled");
            return;
        };

        render_app.init_resource::<FogShadowSources>();

        render_app.add_systems(
            ExtractSchedule,
            (extract_fog_lights, extract_baked_volumes, extract_fog_time),
        );

        render_app.add_systems(
            Render,
            (
                init_fog_pipelines.in_set(RenderSystems::Prepare),
                init_fog_noise_texture.in_set(RenderSystems::Prepare),
                init_fog_fallbacks.in_set(RenderSystems::Prepare),
            ),
        );

        render_app.add_systems(
            Render,
            (
                prepare_fog_textures.in_set(RenderSystems::PrepareResources),
                prepare_fog_uniforms.in_set(RenderSystems::PrepareResources),
                prepare_fog_lights.in_set(RenderSystems::PrepareResources),
                prepare_baked_volumes.in_set(RenderSystems::PrepareResources),
            ),
        );

        render_app.add_render_graph_node::<ViewNodeRunner<FogPassNode>>(
            Core3d,
            VolumetricsLabel::FogPass,
        );

        // Fog blends over the finished main pass, ahead of tonemapping.
        render_app.add_render_graph_edges(
            Core3d,
            (
                Node3d::EndMainPass,
                VolumetricsLabel::FogPass,
                Node3d::Tonemapping,
            ),
        );
    }
}
