//! Per-frame resource preparation for the fog pass: transient textures,
//! camera/pass uniforms, and the light table upload.

use bevy::prelude::*;
use bevy::render::{
    camera::ExtractedCamera,
    render_resource::{
        Buffer, BufferInitDescriptor, BufferUsages, Extent3d, TextureDescriptor,
        TextureDimension, TextureUsages,
    },
    renderer::RenderDevice,
    texture::{CachedTexture, TextureCache},
    view::ExtractedView,
};

use super::extract::{ExtractedBakedVolumes, FogFrameLights, FogFrameTime};
use super::light::FogLightsStorage;
use super::pipeline::{FOG_FORMAT, NOISE_TEXTURE_SIZE};
use super::settings::{StereoEyes, VolumetricsCamera, VolumetricsProfile};

/// Frame-transient fog textures for one camera: the working 3D buffer and
/// the 2D composite. Acquired from the texture cache every frame and handed
/// back when the frame ends.
#[derive(Component)]
pub struct ViewFogTextures {
    pub fog: CachedTexture,
    pub composite: CachedTexture,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Per-eye camera/pass uniform.
/// Must match the struct in the fog shaders.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FogCameraUniform {
    pub world_from_view: [[f32; 4]; 4],
    pub view_from_world: [[f32; 4]; 4],
    pub clip_from_view: [[f32; 4]; 4],
    pub view_from_clip: [[f32; 4]; 4],
    /// Fog buffer dimensions (xyz), far distance (w).
    pub buffer_size: [f32; 4],
    /// x = realtime density, y = baked density, z = time, w = eye index.
    pub pass_data: [f32; 4],
    /// Output pixel size (xy), dither noise tiling scale (zw).
    pub screen_size: [f32; 4],
}

/// Inputs for one eye's [`FogCameraUniform`].
pub struct EyeContext {
    pub world_from_view: Mat4,
    pub clip_from_view: Mat4,
    pub eye_index: u32,
}

/// Build the uniform for one eye.
pub fn camera_uniform(
    eye: &EyeContext,
    buffer_size: UVec3,
    far: f32,
    profile: &VolumetricsProfile,
    time: f32,
    screen_size: Vec2,
    noise_size: f32,
) -> FogCameraUniform {
    FogCameraUniform {
        world_from_view: eye.world_from_view.to_cols_array_2d(),
        view_from_world: eye.world_from_view.inverse().to_cols_array_2d(),
        clip_from_view: eye.clip_from_view.to_cols_array_2d(),
        view_from_clip: eye.clip_from_view.inverse().to_cols_array_2d(),
        buffer_size: [
            buffer_size.x as f32,
            buffer_size.y as f32,
            buffer_size.z as f32,
            far,
        ],
        pass_data: [
            profile.realtime_density,
            profile.baked_density,
            time,
            eye.eye_index as f32,
        ],
        screen_size: [
            screen_size.x,
            screen_size.y,
            screen_size.x / noise_size,
            screen_size.y / noise_size,
        ],
    }
}

/// Per-view uniform buffers, one per active eye.
#[derive(Component)]
pub struct ViewFogUniforms {
    pub eyes: Vec<Buffer>,
}

/// This frame's fog light table.
#[derive(Resource)]
pub struct FogLightsBuffer {
    pub buffer: Buffer,
    pub count: u32,
}

/// Main light uniform for the single-light kernel.
/// Must match the struct in volumetric_realtime.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuMainFogLight {
    /// Negated light direction (xyz), w = 1 if shadows are enabled.
    pub direction: [f32; 4],
    /// Fog color (rgb), w = 1 if the main light participates.
    pub color: [f32; 4],
}

#[derive(Resource)]
pub struct FogMainLightBuffer {
    pub buffer: Buffer,
    pub present: bool,
}

/// One baked volume's kernel uniform.
/// Must match the struct in volumetric_baked.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuBakedVolume {
    /// World to unit-cube-local. Positions inside the volume land in
    /// [-1,1] on every axis.
    pub local_from_world: [[f32; 4]; 4],
}

/// Baked volumes ready for sampling this frame.
#[derive(Resource, Default)]
pub struct PreparedBakedVolumes {
    pub volumes: Vec<(Buffer, Handle<Image>)>,
}

/// Allocate the frame's fog and composite textures for each fog camera.
pub fn prepare_fog_textures(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    mut texture_cache: ResMut<TextureCache>,
    views: Query<(Entity, &VolumetricsCamera), With<ExtractedView>>,
) {
    for (entity, camera) in views.iter() {
        let width = camera.resolution.max(1);
        let height = camera.resolution.max(1);
        let depth = camera.quality.depth();

        let fog = texture_cache.get(
            &render_device,
            TextureDescriptor {
                label: Some("fog_buffer"),
                size: Extent3d {
                    width,
                    height,
                    depth_or_array_layers: depth,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D3,
                format: FOG_FORMAT,
                usage: TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
        );

        let composite = texture_cache.get(
            &render_device,
            TextureDescriptor {
                label: Some("fog_composite"),
                size: Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: FOG_FORMAT,
                usage: TextureUsages::STORAGE_BINDING | TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            },
        );

        commands.entity(entity).insert(ViewFogTextures {
            fog,
            composite,
            width,
            height,
            depth,
        });
    }
}

/// Write the per-eye camera uniforms. With a [`StereoEyes`] component the
/// second eye gets its own buffer; otherwise only one eye exists.
pub fn prepare_fog_uniforms(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    profile: Res<VolumetricsProfile>,
    time: Res<FogFrameTime>,
    views: Query<(
        Entity,
        &ExtractedView,
        &ExtractedCamera,
        &VolumetricsCamera,
        Option<&StereoEyes>,
    )>,
) {
    for (entity, view, camera, fog_camera, stereo) in views.iter() {
        let Some(viewport) = camera.physical_viewport_size else {
            continue;
        };
        let screen_size = Vec2::new(viewport.x as f32, viewport.y as f32);
        let buffer_size = UVec3::new(
            fog_camera.resolution,
            fog_camera.resolution,
            fog_camera.quality.depth(),
        );

        let mut eye_contexts = vec![EyeContext {
            world_from_view: view.world_from_view.to_matrix(),
            clip_from_view: view.clip_from_view,
            eye_index: 0,
        }];
        if let Some(stereo) = stereo {
            eye_contexts.push(EyeContext {
                world_from_view: stereo.world_from_view,
                clip_from_view: stereo.clip_from_view,
                eye_index: 1,
            });
        }

        let eyes = eye_contexts
            .iter()
            .map(|eye| {
                let uniform = camera_uniform(
                    eye,
                    buffer_size,
                    fog_camera.far,
                    &profile,
                    time.elapsed_seconds,
                    screen_size,
                    NOISE_TEXTURE_SIZE as f32,
                );
                render_device.create_buffer_with_data(&BufferInitDescriptor {
                    label: Some("fog_camera_uniform"),
                    contents: bytemuck::bytes_of(&uniform),
                    usage: BufferUsages::UNIFORM,
                })
            })
            .collect();

        commands.entity(entity).insert(ViewFogUniforms { eyes });
    }
}

/// Upload the fog light table and the main light uniform.
pub fn prepare_fog_lights(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    frame_lights: Option<Res<FogFrameLights>>,
) {
    let mut storage = FogLightsStorage::default();
    let mut main = GpuMainFogLight {
        direction: [0.0; 4],
        color: [0.0; 4],
    };

    if let Some(frame) = &frame_lights {
        if let Some(main_light) = &frame.main {
            let dir = -main_light.direction;
            main.direction = [
                dir.x,
                dir.y,
                dir.z,
                if main_light.shadows_enabled { 1.0 } else { 0.0 },
            ];
            main.color = [
                main_light.fog_color.x,
                main_light.fog_color.y,
                main_light.fog_color.z,
                1.0,
            ];
        }

        storage = FogLightsStorage::build(&frame.lights);
    }

    let count = storage.header.count[0];

    let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some("fog_lights_storage"),
        contents: &storage.to_bytes(),
        usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
    });
    commands.insert_resource(FogLightsBuffer { buffer, count });

    let present = main.color[3] > 0.0;
    let main_buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some("fog_main_light"),
        contents: bytemuck::bytes_of(&main),
        usage: BufferUsages::UNIFORM,
    });
    commands.insert_resource(FogMainLightBuffer {
        buffer: main_buffer,
        present,
    });

    if count > 0 {
        debug!("Prepared {} fog lights", count);
    }
}

/// Build each baked volume's world-to-local uniform.
pub fn prepare_baked_volumes(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    extracted: Option<Res<ExtractedBakedVolumes>>,
) {
    let mut prepared = PreparedBakedVolumes::default();

    if let Some(extracted) = extracted {
        for volume in &extracted.volumes {
            let world_from_unit = volume.world_from_local
                * Mat4::from_translation(volume.bounds_center)
                * Mat4::from_scale(volume.bounds_size * 0.5);
            let uniform = GpuBakedVolume {
                local_from_world: world_from_unit.inverse().to_cols_array_2d(),
            };
            let buffer = render_device.create_buffer_with_data(&BufferInitDescriptor {
                label: Some("fog_baked_volume"),
                contents: bytemuck::bytes_of(&uniform),
                usage: BufferUsages::UNIFORM,
            });
            prepared.volumes.push((buffer, volume.image.clone()));
        }
    }

    commands.insert_resource(prepared);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_sizes() {
        assert_eq!(std::mem::size_of::<FogCameraUniform>(), 4 * 64 + 3 * 16);
        assert_eq!(std::mem::size_of::<GpuMainFogLight>(), 32);
        assert_eq!(std::mem::size_of::<GpuBakedVolume>(), 64);
    }

    fn test_profile() -> VolumetricsProfile {
        VolumetricsProfile {
            realtime_density: 0.8,
            baked_density: 0.3,
        }
    }

    #[test]
    fn stereo_eyes_differ_only_by_transform_and_index() {
        let left = EyeContext {
            world_from_view: Mat4::from_translation(Vec3::new(-0.03, 0.0, 0.0)),
            clip_from_view: Mat4::perspective_infinite_reverse_rh(1.0, 1.0, 0.1),
            eye_index: 0,
        };
        let right = EyeContext {
            world_from_view: Mat4::from_translation(Vec3::new(0.03, 0.0, 0.0)),
            clip_from_view: left.clip_from_view,
            eye_index: 1,
        };

        let size = UVec3::new(128, 128, 64);
        let screen = Vec2::new(1920.0, 1080.0);
        let a = camera_uniform(&left, size, 100.0, &test_profile(), 2.5, screen, 64.0);
        let b = camera_uniform(&right, size, 100.0, &test_profile(), 2.5, screen, 64.0);

        assert_eq!(a.pass_data[3], 0.0);
        assert_eq!(b.pass_data[3], 1.0);
        // Everything except the matrices and eye index matches.
        assert_eq!(a.buffer_size, b.buffer_size);
        assert_eq!(a.screen_size, b.screen_size);
        assert_eq!(a.pass_data[..3], b.pass_data[..3]);
        assert_ne!(a.world_from_view, b.world_from_view);
    }

    #[test]
    fn pass_data_carries_profile_densities_and_time() {
        let eye = EyeContext {
            world_from_view: Mat4::IDENTITY,
            clip_from_view: Mat4::IDENTITY,
            eye_index: 0,
        };
        let uniform = camera_uniform(
            &eye,
            UVec3::splat(16),
            50.0,
            &test_profile(),
            7.25,
            Vec2::splat(512.0),
            64.0,
        );
        assert_eq!(uniform.pass_data[0], 0.8);
        assert_eq!(uniform.pass_data[1], 0.3);
        assert_eq!(uniform.pass_data[2], 7.25);
        assert_eq!(uniform.buffer_size, [16.0, 16.0, 16.0, 50.0]);
        assert_eq!(uniform.screen_size[2], 8.0);
    }
}
