//! The fog pass render graph node.
//!
//! One node owns the whole per-frame pipeline because every stage reads or
//! writes the frame-transient fog textures: clear, realtime light sampling,
//! baked volume sampling, depth-aware compositing, and the final dithered
//! blend onto the view target. The full sequence repeats per eye.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    render_asset::RenderAssets,
    render_graph::{NodeRunError, RenderGraphContext, ViewNode},
    render_resource::{
        BindGroupEntry, BindingResource, Buffer, CachedPipelineState,
        ComputePassDescriptor, LoadOp, Operations, PipelineCache, RenderPassColorAttachment,
        RenderPassDescriptor, StoreOp, TextureView,
    },
    renderer::RenderContext,
    texture::GpuImage,
    view::{Msaa, ViewDepthTexture, ViewTarget},
};

use super::pipeline::{FogFallbacks, FogNoiseTexture, VolumetricsPipelines, COMPOSITE_TILE_SIZE, SAMPLE_TILE_SIZE};
use super::prepare::{
    FogLightsBuffer, FogMainLightBuffer, PreparedBakedVolumes, ViewFogTextures, ViewFogUniforms,
};
use super::settings::{DepthResolve, VolumetricsCamera, VolumetricsProfile};
use super::shadow::FogShadowSources;

/// Render graph node running the volumetric fog pipeline for one camera.
#[derive(Default)]
pub struct FogPassNode;

impl ViewNode for FogPassNode {
    type ViewQuery = (
        &'static ExtractedCamera,
        &'static ViewTarget,
        &'static ViewDepthTexture,
        &'static Msaa,
        &'static VolumetricsCamera,
        &'static ViewFogTextures,
        &'static ViewFogUniforms,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (camera, target, depth, msaa, fog_camera, textures, uniforms): bevy::ecs::query::QueryItem<
            'w,
            '_,
            Self::ViewQuery,
        >,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let profile = world.resource::<VolumetricsProfile>();
        if !profile.is_active() {
            return Ok(());
        }

        let Some(pipelines) = world.get_resource::<VolumetricsPipelines>() else {
            return Ok(());
        };
        // These are created during prepare on the very first frame; their
        // absence here is a broken setup, not warm-up.
        let (Some(fallbacks), Some(noise)) = (
            world.get_resource::<FogFallbacks>(),
            world.get_resource::<FogNoiseTexture>(),
        ) else {
            error_once!("Fog noise or fallback resources missing, refusing fog pass");
            return Ok(());
        };
        let (Some(lights), Some(main_light)) = (
            world.get_resource::<FogLightsBuffer>(),
            world.get_resource::<FogMainLightBuffer>(),
        ) else {
            return Ok(());
        };

        let pipeline_cache = world.resource::<PipelineCache>();
        let multisampled = msaa.samples() > 1;
        let ms_index = multisampled as usize;
        let hdr_index = (target.main_texture_format() == ViewTarget::TEXTURE_FORMAT_HDR) as usize;
        let resolve = DepthResolve::from_sample_count(msaa.samples());

        let composite_id =
            pipelines.composite_pipelines[ms_index][fog_camera.quality.variant_index()];
        let blend_id = pipelines.blend_pipelines[hdr_index][resolve.variant_index()];

        // A failed compile is a configuration error and the whole pass is
        // refused; still-compiling pipelines skip the frame silently.
        for state in [
            pipeline_cache.get_compute_pipeline_state(pipelines.clear_pipeline),
            pipeline_cache.get_compute_pipeline_state(pipelines.main_light_pipeline),
            pipeline_cache.get_compute_pipeline_state(pipelines.additional_lights_pipeline),
            pipeline_cache.get_compute_pipeline_state(pipelines.baked_pipeline),
            pipeline_cache.get_compute_pipeline_state(composite_id),
            pipeline_cache.get_render_pipeline_state(blend_id),
        ] {
            if let CachedPipelineState::Err(err) = state {
                error!("Fog pipeline failed to compile, skipping fog pass: {}", err);
                return Ok(());
            }
        }
        let (
            Some(clear_pipeline),
            Some(main_pipeline),
            Some(additional_pipeline),
            Some(baked_pipeline),
            Some(composite_pipeline),
            Some(blend_pipeline),
        ) = (
            pipeline_cache.get_compute_pipeline(pipelines.clear_pipeline),
            pipeline_cache.get_compute_pipeline(pipelines.main_light_pipeline),
            pipeline_cache.get_compute_pipeline(pipelines.additional_lights_pipeline),
            pipeline_cache.get_compute_pipeline(pipelines.baked_pipeline),
            pipeline_cache.get_compute_pipeline(composite_id),
            pipeline_cache.get_render_pipeline(blend_id),
        )
        else {
            return Ok(());
        };

        let shadow_sources = world.get_resource::<FogShadowSources>();
        let (main_shadow_map, main_shadow_uniform): (&TextureView, &Buffer) = shadow_sources
            .and_then(|s| s.main.as_ref())
            .map(|main| (&main.shadow_map, &main.uniform))
            .unwrap_or((&fallbacks.shadow_map, &fallbacks.main_shadow));
        let (shadow_atlas, shadow_slices): (&TextureView, &Buffer) = shadow_sources
            .and_then(|s| s.additional.as_ref())
            .map(|additional| (&additional.shadow_atlas, &additional.slices))
            .unwrap_or((&fallbacks.shadow_map, &fallbacks.shadow_slices));

        let gpu_images = world.resource::<RenderAssets<GpuImage>>();
        let baked_volumes = world.get_resource::<PreparedBakedVolumes>();
        let render_device = render_context.render_device().clone();

        let sample_tiles = |n: u32| n.div_ceil(SAMPLE_TILE_SIZE);
        let composite_tiles = |n: u32| n.div_ceil(COMPOSITE_TILE_SIZE);

        for eye_uniform in &uniforms.eyes {
            let sample_bind_group = render_device.create_bind_group(
                "fog_sample_bind_group",
                &pipelines.sample_layout,
                &[
                    BindGroupEntry {
                        binding: 0,
                        resource: eye_uniform.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: BindingResource::TextureView(&textures.fog.default_view),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: main_light.buffer.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 3,
                        resource: main_shadow_uniform.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 4,
                        resource: BindingResource::TextureView(main_shadow_map),
                    },
                    BindGroupEntry {
                        binding: 5,
                        resource: BindingResource::Sampler(&pipelines.shadow_sampler),
                    },
                    BindGroupEntry {
                        binding: 6,
                        resource: lights.buffer.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 7,
                        resource: shadow_slices.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 8,
                        resource: BindingResource::TextureView(shadow_atlas),
                    },
                ],
            );

            // Clear must precede every accumulation dispatch.
            {
                let mut pass =
                    render_context
                        .command_encoder()
                        .begin_compute_pass(&ComputePassDescriptor {
                            label: Some("fog_sample_pass"),
                            timestamp_writes: None,
                        });
                pass.set_bind_group(0, &sample_bind_group, &[]);

                pass.set_pipeline(clear_pipeline);
                pass.dispatch_workgroups(
                    sample_tiles(textures.width),
                    sample_tiles(textures.height),
                    sample_tiles(textures.depth),
                );

                if fog_camera.render_realtime {
                    if main_light.present {
                        pass.set_pipeline(main_pipeline);
                        pass.dispatch_workgroups(
                            sample_tiles(textures.width),
                            sample_tiles(textures.height),
                            sample_tiles(textures.depth),
                        );
                    }
                    if lights.count > 0 {
                        pass.set_pipeline(additional_pipeline);
                        pass.dispatch_workgroups(
                            sample_tiles(textures.width),
                            sample_tiles(textures.height),
                            sample_tiles(textures.depth),
                        );
                    }
                }
            }

            if fog_camera.render_baked {
                if let Some(baked_volumes) = baked_volumes {
                    for (volume_uniform, image) in &baked_volumes.volumes {
                        // Volumes whose texture has not reached the GPU yet
                        // are skipped, not errors.
                        let Some(gpu_image) = gpu_images.get(image) else {
                            continue;
                        };
                        let bind_group = render_device.create_bind_group(
                            "fog_baked_bind_group",
                            &pipelines.baked_layout,
                            &[
                                BindGroupEntry {
                                    binding: 0,
                                    resource: eye_uniform.as_entire_binding(),
                                },
                                BindGroupEntry {
                                    binding: 1,
                                    resource: BindingResource::TextureView(
                                        &textures.fog.default_view,
                                    ),
                                },
                                BindGroupEntry {
                                    binding: 2,
                                    resource: volume_uniform.as_entire_binding(),
                                },
                                BindGroupEntry {
                                    binding: 3,
                                    resource: BindingResource::TextureView(&gpu_image.texture_view),
                                },
                                BindGroupEntry {
                                    binding: 4,
                                    resource: BindingResource::Sampler(&pipelines.fog_sampler),
                                },
                            ],
                        );

                        let mut pass = render_context.command_encoder().begin_compute_pass(
                            &ComputePassDescriptor {
                                label: Some("fog_baked_pass"),
                                timestamp_writes: None,
                            },
                        );
                        pass.set_pipeline(baked_pipeline);
                        pass.set_bind_group(0, &bind_group, &[]);
                        pass.dispatch_workgroups(
                            sample_tiles(textures.width),
                            sample_tiles(textures.height),
                            sample_tiles(textures.depth),
                        );
                    }
                }
            }

            // Collapse the fog buffer against scene depth. One invocation
            // per pixel column, not per voxel.
            let composite_layout = if multisampled {
                &pipelines.composite_layout_ms
            } else {
                &pipelines.composite_layout
            };
            let composite_bind_group = render_device.create_bind_group(
                "fog_composite_bind_group",
                composite_layout,
                &[
                    BindGroupEntry {
                        binding: 0,
                        resource: eye_uniform.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: BindingResource::TextureView(&textures.fog.default_view),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: BindingResource::Sampler(&pipelines.fog_sampler),
                    },
                    BindGroupEntry {
                        binding: 3,
                        resource: BindingResource::TextureView(&textures.composite.default_view),
                    },
                    BindGroupEntry {
                        binding: 4,
                        resource: BindingResource::TextureView(depth.view()),
                    },
                ],
            );
            {
                let mut pass =
                    render_context
                        .command_encoder()
                        .begin_compute_pass(&ComputePassDescriptor {
                            label: Some("fog_composite_pass"),
                            timestamp_writes: None,
                        });
                pass.set_pipeline(composite_pipeline);
                pass.set_bind_group(0, &composite_bind_group, &[]);
                pass.dispatch_workgroups(
                    composite_tiles(textures.width),
                    composite_tiles(textures.height),
                    1,
                );
            }

            // Dithered blend onto the color target.
            let blend_layout = if multisampled {
                &pipelines.blend_layout_ms
            } else {
                &pipelines.blend_layout
            };
            let blend_bind_group = render_device.create_bind_group(
                "fog_blend_bind_group",
                blend_layout,
                &[
                    BindGroupEntry {
                        binding: 0,
                        resource: eye_uniform.as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: BindingResource::TextureView(&textures.composite.default_view),
                    },
                    BindGroupEntry {
                        binding: 2,
                        resource: BindingResource::Sampler(&pipelines.fog_sampler),
                    },
                    BindGroupEntry {
                        binding: 3,
                        resource: BindingResource::TextureView(&noise.view),
                    },
                    BindGroupEntry {
                        binding: 4,
                        resource: BindingResource::Sampler(&pipelines.noise_sampler),
                    },
                    BindGroupEntry {
                        binding: 5,
                        resource: BindingResource::TextureView(depth.view()),
                    },
                ],
            );

            let mut render_pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
                label: Some("fog_blend_pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: target.main_texture_view(),
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Load,
                        store: StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(viewport) = &camera.viewport {
                render_pass.set_camera_viewport(viewport);
            }

            render_pass.set_render_pipeline(blend_pipeline);
            render_pass.set_bind_group(0, &blend_bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        Ok(())
    }
}
