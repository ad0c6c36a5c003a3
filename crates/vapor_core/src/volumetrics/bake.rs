//! The bake engine: fills a [`BakedVolume`]'s radiance texture on demand.
//!
//! A bake always starts from an opaque-black texture, runs the indirect
//! pass first (CPU probe-field sampling, one color per grid cell), then the
//! direct pass (GPU per-light raymarch, one depth slice at a time, read back
//! and accumulated additively on top). The finished texture is published as
//! a fresh `Image` asset handle, so a frame already sampling the previous
//! bake keeps its old texture until the swap.
//!
//! Baking is synchronous and can take a while for large grids; it is meant
//! to be triggered from tooling, not every frame.

use bevy::asset::RenderAssetUsages;
use bevy::prelude::*;
use bevy::render::{
    render_resource::{
        BindGroupEntry, BindGroupLayout, BindGroupLayoutEntry, BindingResource, BindingType,
        Buffer, BufferBindingType, BufferDescriptor, BufferUsages, Extent3d, ShaderStages,
        StorageTextureAccess, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
        TextureViewDimension,
    },
    renderer::{RenderDevice, RenderQueue},
};
use half::f16;

use super::light::{ClassifiedLight, GpuFogLight, SceneLightKind};
use super::probe::{IndirectProbes, RadianceField};
use super::volume::BakedVolume;
use super::volume_io::BakedVolumeData;

/// Thread-group size of the bake kernel along X and Y.
/// Must match @workgroup_size in volumetric_baker.wgsl.
const BAKE_TILE_SIZE: u32 = 8;

/// Marks a light as static input to the direct bake pass. The light's
/// parameters live here rather than on a renderer light component so bakes
/// are reproducible regardless of what the realtime renderer does with the
/// scene's lights.
#[derive(Component, Clone)]
pub struct BakedLight {
    /// Linear RGB color.
    pub color: Color,
    /// Multiplier applied on top of the kernel's attenuation result.
    pub intensity: f32,
    /// Falloff range for punctual lights.
    pub range: f32,
    /// Full inner and outer cone angles in radians. `None` bakes the light
    /// as a point light.
    pub spot_angles: Option<(f32, f32)>,
    /// Bake as a directional light, ignoring position and range.
    pub directional: bool,
}

impl Default for BakedLight {
    fn default() -> Self {
        Self {
            color: Color::WHITE,
            intensity: 1.0,
            range: 10.0,
            spot_angles: None,
            directional: false,
        }
    }
}

/// Request a bake of every registered volume, or a single one.
#[derive(Message)]
pub struct BakeVolumes {
    /// Bake only this volume when set.
    pub target: Option<Entity>,
}

impl BakeVolumes {
    pub fn all() -> Self {
        Self { target: None }
    }
}

/// Errors that can occur during a bake.
#[derive(Debug)]
pub enum BakeError {
    /// A grid axis has zero cells
    ZeroResolution,
    /// Direct pass requested but no GPU pipeline is available
    GpuUnavailable,
    /// Slice readback failed
    Readback(String),
}

impl std::fmt::Display for BakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BakeError::ZeroResolution => write!(f, "volume resolution has a zero axis"),
            BakeError::GpuUnavailable => {
                write!(f, "direct bake pass requires a GPU device")
            }
            BakeError::Readback(msg) => write!(f, "slice readback failed: {}", msg),
        }
    }
}

impl std::error::Error for BakeError {}

/// Per-slice uniform data for the bake kernel.
/// Must match the struct in volumetric_baker.wgsl.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct BakeUniforms {
    /// Unit-cube-local to world. Cell deltas in [-1,1] cover the volume
    /// bounds.
    bake_matrix: [[f32; 4]; 4],
    light_position: [f32; 4],
    light_attenuation: [f32; 4],
    light_spot_direction: [f32; 4],
    /// x = slice index, y = slice count, zw unused.
    slice_data: [f32; 4],
}

/// GPU resources for the direct bake pass, created once at startup.
#[derive(Resource)]
pub struct BakeGpu {
    pipeline: wgpu::ComputePipeline,
    layout: BindGroupLayout,
    uniform_buffer: Buffer,
}

/// Build the bake compute pipeline. Runs in the main app; the direct pass
/// shares the renderer's device.
pub fn init_bake_gpu(
    mut commands: Commands,
    render_device: Option<Res<RenderDevice>>,
    existing: Option<Res<BakeGpu>>,
) {
    if existing.is_some() {
        return;
    }
    let Some(render_device) = render_device else {
        warn!("No render device, direct bake pass unavailable");
        return;
    };

    let layout = render_device.create_bind_group_layout(
        "bake_layout",
        &[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::StorageTexture {
                    access: StorageTextureAccess::WriteOnly,
                    format: TextureFormat::Rgba16Float,
                    view_dimension: TextureViewDimension::D2,
                },
                count: None,
            },
        ],
    );

    let device = render_device.wgpu_device();
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("volumetric_baker"),
        source: wgpu::ShaderSource::Wgsl(
            include_str!("../../../../assets/shaders/volumetric_baker.wgsl").into(),
        ),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("bake_pipeline_layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some("bake_pipeline"),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some("cs_main"),
        compilation_options: Default::default(),
        cache: None,
    });

    let uniform_buffer = render_device.create_buffer(&BufferDescriptor {
        label: Some("bake_uniforms"),
        size: std::mem::size_of::<BakeUniforms>() as u64,
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    commands.insert_resource(BakeGpu {
        pipeline,
        layout,
        uniform_buffer,
    });

    info!("Bake pipeline initialized");
}

/// Run the bake message queue: for each request, bake the targeted volumes
/// and publish fresh texture handles.
pub fn handle_bake_requests(
    mut requests: MessageReader<BakeVolumes>,
    mut volumes: Query<(Entity, &GlobalTransform, &mut BakedVolume)>,
    lights: Query<(&GlobalTransform, &BakedLight)>,
    probes: Res<IndirectProbes>,
    bake_gpu: Option<Res<BakeGpu>>,
    render_device: Option<Res<RenderDevice>>,
    render_queue: Option<Res<RenderQueue>>,
    mut images: ResMut<Assets<Image>>,
) {
    let targets: Vec<Option<Entity>> = requests.read().map(|r| r.target).collect();
    if targets.is_empty() {
        return;
    }

    let bake_lights: Vec<(GlobalTransform, BakedLight)> = lights
        .iter()
        .map(|(transform, light)| (*transform, light.clone()))
        .collect();

    for (entity, transform, mut volume) in volumes.iter_mut() {
        let requested = targets
            .iter()
            .any(|t| t.is_none() || *t == Some(entity));
        if !requested {
            continue;
        }

        let gpu = match (&bake_gpu, &render_device, &render_queue) {
            (Some(gpu), Some(device), Some(queue)) => Some((gpu.as_ref(), device.as_ref(), queue.as_ref())),
            _ => None,
        };

        let started = std::time::Instant::now();
        match bake_volume(
            &volume,
            &transform.to_matrix(),
            &bake_lights,
            probes.field.as_ref(),
            gpu,
        ) {
            Ok(data) => {
                let image = volume_image(&data);
                volume.buffer = Some(images.add(image));
                info!(
                    "Baked volume {:?} ({}x{}x{}) in {:.2}s",
                    entity,
                    data.width,
                    data.height,
                    data.depth,
                    started.elapsed().as_secs_f32()
                );
            }
            Err(err) => {
                error!("Bake failed for volume {:?}: {}", entity, err);
            }
        }
    }
}

/// Bake one volume to CPU texture data. Clears, then runs the enabled
/// passes in fixed order: indirect first, direct second.
pub fn bake_volume(
    volume: &BakedVolume,
    local_to_world: &Mat4,
    lights: &[(GlobalTransform, BakedLight)],
    field: &dyn RadianceField,
    gpu: Option<(&BakeGpu, &RenderDevice, &RenderQueue)>,
) -> Result<BakedVolumeData, BakeError> {
    let res = volume.resolution;
    if res.x == 0 || res.y == 0 || res.z == 0 {
        return Err(BakeError::ZeroResolution);
    }

    let mut data = BakedVolumeData::cleared(res.x, res.y, res.z);

    if volume.bake_indirect {
        bake_indirect_pass(volume, local_to_world, field, &mut data);
    }

    if volume.bake_direct {
        let (gpu, device, queue) = gpu.ok_or(BakeError::GpuUnavailable)?;
        for (transform, light) in lights {
            bake_direct_light(volume, local_to_world, transform, light, gpu, device, queue, &mut data)?;
        }
    }

    Ok(data)
}

/// CPU probe-field pass: evaluate the configured direction set at every
/// cell and store the reduced color.
pub fn bake_indirect_pass(
    volume: &BakedVolume,
    local_to_world: &Mat4,
    field: &dyn RadianceField,
    data: &mut BakedVolumeData,
) {
    let directions = volume.shape.directions();
    let mut colors = vec![Vec3::ZERO; directions.len()];

    for z in 0..volume.resolution.z {
        for y in 0..volume.resolution.y {
            for x in 0..volume.resolution.x {
                let point = volume.cell_world_position(UVec3::new(x, y, z), local_to_world);
                let probe = field.probe_at(point);
                for (slot, dir) in colors.iter_mut().zip(&directions) {
                    *slot = probe.evaluate(*dir);
                }
                let color = volume.process_colors(&colors);
                data.set(x, y, z, [color.x, color.y, color.z, 1.0]);
            }
        }
    }
}

/// GPU direct pass for one light: dispatch the bake kernel per depth slice,
/// read the slice back, and accumulate `slice * color * intensity`.
#[allow(clippy::too_many_arguments)]
fn bake_direct_light(
    volume: &BakedVolume,
    local_to_world: &Mat4,
    light_transform: &GlobalTransform,
    light: &BakedLight,
    gpu: &BakeGpu,
    render_device: &RenderDevice,
    render_queue: &RenderQueue,
    data: &mut BakedVolumeData,
) -> Result<(), BakeError> {
    let (width, height, depth) = (volume.resolution.x, volume.resolution.y, volume.resolution.z);

    let slice_texture = render_device.create_texture(&TextureDescriptor {
        label: Some("bake_slice"),
        size: Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TextureFormat::Rgba16Float,
        usage: TextureUsages::STORAGE_BINDING | TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let slice_view = slice_texture.create_view(&Default::default());

    // Readback rows must be 256-byte aligned.
    let row_bytes = width * 8;
    let padded_row_bytes = (row_bytes + 255) & !255;
    let readback = render_device.create_buffer(&BufferDescriptor {
        label: Some("bake_readback"),
        size: (padded_row_bytes * height) as u64,
        usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let bind_group = render_device.create_bind_group(
        "bake_bind_group",
        &gpu.layout,
        &[
            BindGroupEntry {
                binding: 0,
                resource: gpu.uniform_buffer.as_entire_binding(),
            },
            BindGroupEntry {
                binding: 1,
                resource: BindingResource::TextureView(&slice_view),
            },
        ],
    );

    let packed = pack_bake_light(light_transform, light);
    let bake_matrix = *local_to_world
        * Mat4::from_translation(volume.bounds_center)
        * Mat4::from_scale(volume.bounds_size * 0.5);

    let light_color = light.color.to_linear();
    let light_scale = Vec3::new(light_color.red, light_color.green, light_color.blue) * light.intensity;

    let tiles_x = width.div_ceil(BAKE_TILE_SIZE);
    let tiles_y = height.div_ceil(BAKE_TILE_SIZE);

    for slice in 0..depth {
        let uniforms = BakeUniforms {
            bake_matrix: bake_matrix.to_cols_array_2d(),
            light_position: packed.position,
            light_attenuation: packed.attenuation,
            light_spot_direction: packed.spot_direction,
            slice_data: [slice as f32, depth as f32, 0.0, 0.0],
        };
        render_queue.write_buffer(&gpu.uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let mut encoder = render_device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("bake_slice_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("bake_slice_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&gpu.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(tiles_x, tiles_y, 1);
        }
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &slice_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        render_queue.submit(std::iter::once(encoder.finish()));

        // Synchronous readback: the accumulate below is read-modify-write on
        // CPU texture data, so slices must land in order.
        let slice_data = {
            let buffer_slice = readback.slice(..);
            let (tx, rx) = std::sync::mpsc::channel();
            buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
                tx.send(result).ok();
            });
            let _ = render_device.wgpu_device().poll(wgpu::PollType::wait());

            match rx.recv() {
                Ok(Ok(())) => {
                    let mapped = buffer_slice.get_mapped_range();
                    let bytes = mapped.to_vec();
                    drop(mapped);
                    readback.unmap();
                    bytes
                }
                Ok(Err(err)) => return Err(BakeError::Readback(err.to_string())),
                Err(_) => return Err(BakeError::Readback("map callback dropped".to_string())),
            }
        };

        for y in 0..height {
            let row_start = (y * padded_row_bytes) as usize;
            let row: &[f16] =
                bytemuck::cast_slice(&slice_data[row_start..row_start + row_bytes as usize]);
            for x in 0..width {
                let texel = &row[(x * 4) as usize..];
                let rgb = Vec3::new(texel[0].to_f32(), texel[1].to_f32(), texel[2].to_f32());
                let contribution = rgb * light_scale;
                data.accumulate_rgb(x, y, slice, [contribution.x, contribution.y, contribution.z]);
            }
        }
    }

    Ok(())
}

/// Pack a baked light's kernel parameters, reusing the realtime light
/// packing with a unit fog color (the light's color is applied CPU-side
/// during accumulation).
fn pack_bake_light(transform: &GlobalTransform, light: &BakedLight) -> GpuFogLight {
    let kind = if light.directional {
        SceneLightKind::Directional
    } else if light.spot_angles.is_some() {
        SceneLightKind::Spot
    } else {
        SceneLightKind::Point
    };

    GpuFogLight::pack(&ClassifiedLight {
        scene_index: 0,
        kind,
        position: transform.translation(),
        direction: *transform.forward(),
        fog_color: Vec3::ONE,
        range: light.range,
        spot_angles: light.spot_angles,
    })
}

/// Wrap baked texel data in a 3D image asset ready for sampling.
///
/// The main-world copy is retained so the texel data stays readable for
/// persistence after extraction.
pub fn volume_image(data: &BakedVolumeData) -> Image {
    let mut image = Image::new(
        Extent3d {
            width: data.width,
            height: data.height,
            depth_or_array_layers: data.depth,
        },
        TextureDimension::D3,
        data.as_bytes().to_vec(),
        TextureFormat::Rgba16Float,
        RenderAssetUsages::MAIN_WORLD | RenderAssetUsages::RENDER_WORLD,
    );
    image.texture_descriptor.usage = TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST;
    image.sampler = bevy::image::ImageSampler::linear();
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volumetrics::probe::UniformRadianceField;
    use crate::volumetrics::volume::{SampleAggregation, SampleShape};

    fn indirect_only_volume() -> BakedVolume {
        BakedVolume {
            resolution: UVec3::splat(16),
            shape: SampleShape::Axes,
            aggregation: SampleAggregation::Mean,
            bake_indirect: true,
            bake_direct: false,
            ..default()
        }
    }

    #[test]
    fn bake_uniforms_size() {
        assert_eq!(std::mem::size_of::<BakeUniforms>(), 128);
    }

    #[test]
    fn indirect_bake_populates_every_cell() {
        let volume = indirect_only_volume();
        let field = UniformRadianceField::ambient(Vec3::splat(0.5));

        let data = bake_volume(&volume, &Mat4::IDENTITY, &[], &field, None).unwrap();

        for z in 0..16 {
            for y in 0..16 {
                for x in 0..16 {
                    let cell = data.get(x, y, z);
                    assert!(
                        cell[0] > 0.0 || cell[1] > 0.0 || cell[2] > 0.0,
                        "cell ({},{},{}) left at cleared black",
                        x,
                        y,
                        z
                    );
                    assert_eq!(cell[3], 1.0);
                }
            }
        }
    }

    #[test]
    fn indirect_bake_is_idempotent() {
        let volume = indirect_only_volume();
        let field = UniformRadianceField::ambient(Vec3::new(0.1, 0.2, 0.3));
        let transform = Mat4::from_translation(Vec3::new(3.0, 0.0, -2.0));

        let first = bake_volume(&volume, &transform, &[], &field, None).unwrap();
        let second = bake_volume(&volume, &transform, &[], &field, None).unwrap();

        assert_eq!(first.texels, second.texels);
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let volume = BakedVolume {
            resolution: UVec3::new(16, 0, 16),
            ..default()
        };
        let field = UniformRadianceField::ambient(Vec3::ONE);
        let result = bake_volume(&volume, &Mat4::IDENTITY, &[], &field, None);
        assert!(matches!(result, Err(BakeError::ZeroResolution)));
    }

    #[test]
    fn direct_pass_without_gpu_is_an_error() {
        let volume = BakedVolume {
            bake_indirect: false,
            bake_direct: true,
            ..default()
        };
        let field = UniformRadianceField::ambient(Vec3::ZERO);
        let result = bake_volume(&volume, &Mat4::IDENTITY, &[], &field, None);
        assert!(matches!(result, Err(BakeError::GpuUnavailable)));
    }

    #[test]
    fn baked_image_keeps_its_main_world_copy() {
        let data = BakedVolumeData::cleared(2, 2, 2);
        let image = volume_image(&data);
        assert!(image.asset_usage.contains(RenderAssetUsages::MAIN_WORLD));
        assert!(image.asset_usage.contains(RenderAssetUsages::RENDER_WORLD));
        assert!(image.data.is_some());
    }

    #[test]
    fn disabled_passes_leave_cleared_state() {
        let volume = BakedVolume {
            resolution: UVec3::splat(4),
            bake_indirect: false,
            bake_direct: false,
            ..default()
        };
        let field = UniformRadianceField::ambient(Vec3::ONE);
        let data = bake_volume(&volume, &Mat4::IDENTITY, &[], &field, None).unwrap();
        assert_eq!(data.get(2, 2, 2), [0.0, 0.0, 0.0, 1.0]);
    }
}
