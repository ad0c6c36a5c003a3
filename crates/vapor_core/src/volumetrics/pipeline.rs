//! Pipeline and shared GPU resources for the fog pass.
//!
//! All sampling kernels (clear, main light, additional lights, baked) share
//! one bind group layout so the orchestrator can reuse a single per-eye bind
//! group across dispatches. The compositor compiles one variant per quality
//! tier (times a multisampled-depth variant), the blend pass one variant per
//! depth-resolve mode and target format.

use bevy::image::BevyDefault;
use bevy::prelude::*;
use bevy::render::{
    render_resource::{
        BindGroupLayout, BindGroupLayoutEntry, BindingType, BlendComponent, BlendFactor,
        BlendOperation, BlendState, BufferBindingType, BufferInitDescriptor, BufferUsages, CachedComputePipelineId, CachedRenderPipelineId, ColorTargetState,
        ColorWrites, ComputePipelineDescriptor, Extent3d, FilterMode, FragmentState,
        MultisampleState, PipelineCache, PrimitiveState, RenderPipelineDescriptor, Sampler,
        SamplerBindingType, SamplerDescriptor, ShaderStages, StorageTextureAccess,
        TextureDescriptor, TextureDimension, TextureFormat, TextureSampleType, TextureUsages,
        TextureView, TextureViewDimension, VertexState,
    },
    renderer::{RenderDevice, RenderQueue},
    view::ViewTarget,
};

use super::settings::{DepthResolve, FogQuality};
use super::shadow::{shadow_slices_bytes, GpuMainShadow};

/// Thread-group sizes declared by the kernels.
/// Must match @workgroup_size in the fog shaders.
pub const SAMPLE_TILE_SIZE: u32 = 4;
pub const COMPOSITE_TILE_SIZE: u32 = 8;

/// Pixel format of the fog buffer and the composite.
pub const FOG_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// All fog pipelines and the layouts their bind groups are built from.
#[derive(Resource)]
pub struct VolumetricsPipelines {
    /// Shared layout for the clear/main/additional kernels.
    pub sample_layout: BindGroupLayout,
    pub baked_layout: BindGroupLayout,
    pub composite_layout: BindGroupLayout,
    pub composite_layout_ms: BindGroupLayout,
    pub blend_layout: BindGroupLayout,
    pub blend_layout_ms: BindGroupLayout,

    pub clear_pipeline: CachedComputePipelineId,
    pub main_light_pipeline: CachedComputePipelineId,
    pub additional_lights_pipeline: CachedComputePipelineId,
    pub baked_pipeline: CachedComputePipelineId,
    /// Indexed by [multisampled depth][quality tier].
    pub composite_pipelines: [[CachedComputePipelineId; FogQuality::COUNT]; 2],
    /// Indexed by [hdr target][depth resolve mode].
    pub blend_pipelines: [[CachedRenderPipelineId; DepthResolve::COUNT]; 2],

    pub fog_sampler: Sampler,
    pub noise_sampler: Sampler,
    pub shadow_sampler: Sampler,
}

/// Tileable random pattern sampled by the blend pass to dither the fog.
#[derive(Resource)]
pub struct FogNoiseTexture {
    pub view: TextureView,
}

/// Resources bound when a real input is absent: an all-lit shadow map, an
/// identity shadow slice table, and a default main-shadow uniform.
#[derive(Resource)]
pub struct FogFallbacks {
    pub shadow_map: TextureView,
    pub shadow_slices: bevy::render::render_resource::Buffer,
    pub main_shadow: bevy::render::render_resource::Buffer,
}

fn uniform_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn depth_entry(binding: u32, multisampled: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Depth,
            view_dimension: TextureViewDimension::D2,
            multisampled,
        },
        count: None,
    }
}

/// Build every fog pipeline. Runs once in the render app.
pub fn init_fog_pipelines(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    pipeline_cache: Res<PipelineCache>,
    asset_server: Res<AssetServer>,
    existing: Option<Res<VolumetricsPipelines>>,
) {
    if existing.is_some() {
        return;
    }

    // One layout for every sampling kernel; the clear kernel simply ignores
    // most of it.
    let sample_layout = render_device.create_bind_group_layout(
        "fog_sample_layout",
        &[
            // Per-eye camera/pass uniform
            uniform_entry(0),
            // Fog buffer
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::StorageTexture {
                    access: StorageTextureAccess::ReadWrite,
                    format: FOG_FORMAT,
                    view_dimension: TextureViewDimension::D3,
                },
                count: None,
            },
            // Main light uniform
            uniform_entry(2),
            // Main shadow cascades uniform
            uniform_entry(3),
            // Main shadow map
            depth_entry(4, false),
            // Comparison sampler, shared with the atlas
            BindGroupLayoutEntry {
                binding: 5,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Sampler(SamplerBindingType::Comparison),
                count: None,
            },
            // Fog light table
            storage_entry(6),
            // Per-light shadow slices
            storage_entry(7),
            // Shadow atlas
            depth_entry(8, false),
        ],
    );

    let baked_layout = render_device.create_bind_group_layout(
        "fog_baked_layout",
        &[
            uniform_entry(0),
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::StorageTexture {
                    access: StorageTextureAccess::ReadWrite,
                    format: FOG_FORMAT,
                    view_dimension: TextureViewDimension::D3,
                },
                count: None,
            },
            // Per-volume uniform
            uniform_entry(2),
            // Baked radiance texture
            BindGroupLayoutEntry {
                binding: 3,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D3,
                    multisampled: false,
                },
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 4,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Sampler(SamplerBindingType::Filtering),
                count: None,
            },
        ],
    );

    let composite_layout_entries = |multisampled: bool| {
        vec![
            uniform_entry(0),
            // Fog buffer, sampled
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D3,
                    multisampled: false,
                },
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Sampler(SamplerBindingType::Filtering),
                count: None,
            },
            // Composite output
            BindGroupLayoutEntry {
                binding: 3,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::StorageTexture {
                    access: StorageTextureAccess::WriteOnly,
                    format: FOG_FORMAT,
                    view_dimension: TextureViewDimension::D2,
                },
                count: None,
            },
            // Scene depth
            depth_entry(4, multisampled),
        ]
    };
    let composite_layout =
        render_device.create_bind_group_layout("fog_composite_layout", &composite_layout_entries(false));
    let composite_layout_ms = render_device
        .create_bind_group_layout("fog_composite_layout_ms", &composite_layout_entries(true));

    let blend_layout_entries = |multisampled: bool| {
        vec![
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            // Composite
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 2,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Sampler(SamplerBindingType::Filtering),
                count: None,
            },
            // Noise
            BindGroupLayoutEntry {
                binding: 3,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            BindGroupLayoutEntry {
                binding: 4,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Sampler(SamplerBindingType::Filtering),
                count: None,
            },
            // Scene depth
            BindGroupLayoutEntry {
                binding: 5,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Depth,
                    view_dimension: TextureViewDimension::D2,
                    multisampled,
                },
                count: None,
            },
        ]
    };
    let blend_layout =
        render_device.create_bind_group_layout("fog_blend_layout", &blend_layout_entries(false));
    let blend_layout_ms =
        render_device.create_bind_group_layout("fog_blend_layout_ms", &blend_layout_entries(true));

    let realtime_shader = asset_server.load("shaders/volumetric_realtime.wgsl");
    let baked_shader = asset_server.load("shaders/volumetric_baked.wgsl");
    let composite_shader = asset_server.load("shaders/volumetric_compositor.wgsl");
    let blend_shader = asset_server.load("shaders/volumetric_blend.wgsl");

    let compute = |label: &'static str, shader, layout: &BindGroupLayout, entry: &str, defs: Vec<_>| {
        pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
            label: Some(label.into()),
            layout: vec![layout.clone()],
            push_constant_ranges: vec![],
            shader,
            shader_defs: defs,
            entry_point: Some(entry.to_string().into()),
            zero_initialize_workgroup_memory: false,
        })
    };

    let clear_pipeline = compute(
        "fog_clear_pipeline",
        realtime_shader.clone(),
        &sample_layout,
        "cs_clear",
        vec![],
    );
    let main_light_pipeline = compute(
        "fog_main_light_pipeline",
        realtime_shader.clone(),
        &sample_layout,
        "cs_main_light",
        vec![],
    );
    let additional_lights_pipeline = compute(
        "fog_additional_lights_pipeline",
        realtime_shader,
        &sample_layout,
        "cs_additional_lights",
        vec![],
    );
    let baked_pipeline = compute(
        "fog_baked_pipeline",
        baked_shader,
        &baked_layout,
        "cs_baked",
        vec![],
    );

    let mut composite_pipelines = [[CachedComputePipelineId::INVALID; FogQuality::COUNT]; 2];
    for (ms, layout) in [(0, &composite_layout), (1, &composite_layout_ms)] {
        for quality in FogQuality::all() {
            let mut defs = Vec::new();
            if let Some(def) = quality.shader_def() {
                defs.push(def.into());
            }
            if ms == 1 {
                defs.push("DEPTH_MULTISAMPLED".into());
            }
            composite_pipelines[ms][quality.variant_index()] = compute(
                "fog_composite_pipeline",
                composite_shader.clone(),
                layout,
                "cs_composite",
                defs,
            );
        }
    }

    let mut blend_pipelines = [[CachedRenderPipelineId::INVALID; DepthResolve::COUNT]; 2];
    for (hdr, format) in [
        (0, TextureFormat::bevy_default()),
        (1, ViewTarget::TEXTURE_FORMAT_HDR),
    ] {
        for resolve in DepthResolve::all() {
            let mut defs = Vec::new();
            if let Some(def) = resolve.shader_def() {
                defs.push(def.into());
            }
            let layout = if resolve == DepthResolve::Single {
                blend_layout.clone()
            } else {
                blend_layout_ms.clone()
            };
            blend_pipelines[hdr][resolve.variant_index()] =
                pipeline_cache.queue_render_pipeline(RenderPipelineDescriptor {
                    label: Some("fog_blend_pipeline".into()),
                    layout: vec![layout],
                    push_constant_ranges: vec![],
                    vertex: VertexState {
                        shader: blend_shader.clone(),
                        shader_defs: defs.clone(),
                        entry_point: Some("vs_main".into()),
                        buffers: vec![],
                    },
                    primitive: PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: MultisampleState::default(),
                    fragment: Some(FragmentState {
                        shader: blend_shader.clone(),
                        shader_defs: defs,
                        entry_point: Some("fs_main".into()),
                        targets: vec![Some(ColorTargetState {
                            format,
                            // Fog adds scattered light on top of the scene.
                            blend: Some(BlendState {
                                color: BlendComponent {
                                    src_factor: BlendFactor::One,
                                    dst_factor: BlendFactor::One,
                                    operation: BlendOperation::Add,
                                },
                                alpha: BlendComponent::OVER,
                            }),
                            write_mask: ColorWrites::ALL,
                        })],
                    }),
                    zero_initialize_workgroup_memory: false,
                });
        }
    }

    let fog_sampler = render_device.create_sampler(&SamplerDescriptor {
        label: Some("fog_sampler"),
        mag_filter: FilterMode::Linear,
        min_filter: FilterMode::Linear,
        address_mode_u: bevy::render::render_resource::AddressMode::ClampToEdge,
        address_mode_v: bevy::render::render_resource::AddressMode::ClampToEdge,
        address_mode_w: bevy::render::render_resource::AddressMode::ClampToEdge,
        ..default()
    });

    let noise_sampler = render_device.create_sampler(&SamplerDescriptor {
        label: Some("fog_noise_sampler"),
        mag_filter: FilterMode::Linear,
        min_filter: FilterMode::Linear,
        address_mode_u: bevy::render::render_resource::AddressMode::Repeat,
        address_mode_v: bevy::render::render_resource::AddressMode::Repeat,
        ..default()
    });

    let shadow_sampler = render_device.create_sampler(&SamplerDescriptor {
        label: Some("fog_shadow_sampler"),
        compare: Some(bevy::render::render_resource::CompareFunction::GreaterEqual),
        ..default()
    });

    commands.insert_resource(VolumetricsPipelines {
        sample_layout,
        baked_layout,
        composite_layout,
        composite_layout_ms,
        blend_layout,
        blend_layout_ms,
        clear_pipeline,
        main_light_pipeline,
        additional_lights_pipeline,
        baked_pipeline,
        composite_pipelines,
        blend_pipelines,
        fog_sampler,
        noise_sampler,
        shadow_sampler,
    });

    info!("Volumetric fog pipelines queued");
}

/// Noise texture size for the blend dither pattern. The camera uniform's
/// dither tiling scale is derived from it.
pub const NOISE_TEXTURE_SIZE: u32 = 64;

/// System to create the tileable dither noise texture.
pub fn init_fog_noise_texture(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    existing: Option<Res<FogNoiseTexture>>,
) {
    if existing.is_some() {
        return;
    }

    use rand::prelude::*;
    let mut rng = rand::thread_rng();

    let pixel_count = (NOISE_TEXTURE_SIZE * NOISE_TEXTURE_SIZE) as usize;
    let mut noise_data = Vec::with_capacity(pixel_count * 4);

    for _ in 0..pixel_count {
        // R holds the dither offset; the animation phase shifts it over time
        // in the shader.
        let dither: f32 = rng.gen();
        noise_data.push((dither * 255.0) as u8);
        noise_data.push((rng.gen::<f32>() * 255.0) as u8);
        noise_data.push(0);
        noise_data.push(255);
    }

    let texture = render_device.create_texture(&TextureDescriptor {
        label: Some("fog_noise_texture"),
        size: Extent3d {
            width: NOISE_TEXTURE_SIZE,
            height: NOISE_TEXTURE_SIZE,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TextureFormat::Rgba8Unorm,
        usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
        view_formats: &[],
    });

    render_queue.0.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &noise_data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * NOISE_TEXTURE_SIZE),
            rows_per_image: Some(NOISE_TEXTURE_SIZE),
        },
        wgpu::Extent3d {
            width: NOISE_TEXTURE_SIZE,
            height: NOISE_TEXTURE_SIZE,
            depth_or_array_layers: 1,
        },
    );

    let view = texture.create_view(&Default::default());
    commands.insert_resource(FogNoiseTexture { view });
}

/// Create the fallback shadow resources bound when no shadow source is
/// registered. The fallback map is cleared to the far plane so comparisons
/// always pass.
pub fn init_fog_fallbacks(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    existing: Option<Res<FogFallbacks>>,
) {
    if existing.is_some() {
        return;
    }

    let texture = render_device.create_texture(&TextureDescriptor {
        label: Some("fog_fallback_shadow_map"),
        size: Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: TextureFormat::Depth32Float,
        usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&Default::default());

    let mut encoder = render_device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("fog_fallback_clear"),
    });
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("fog_fallback_clear_pass"),
        color_attachments: &[],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &view,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(0.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    render_queue.submit(std::iter::once(encoder.finish()));

    let shadow_slices = render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some("fog_fallback_shadow_slices"),
        contents: &shadow_slices_bytes(&[]),
        usage: BufferUsages::STORAGE,
    });

    let main_shadow = render_device.create_buffer_with_data(&BufferInitDescriptor {
        label: Some("fog_fallback_main_shadow"),
        contents: bytemuck::bytes_of(&GpuMainShadow::default()),
        usage: BufferUsages::UNIFORM,
    });

    commands.insert_resource(FogFallbacks {
        shadow_map: view,
        shadow_slices,
        main_shadow,
    });
}
