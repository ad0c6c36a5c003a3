//! Typed shadow inputs for the fog sampling kernels.
//!
//! The sampling kernels attenuate fog by the same shadow maps the surface
//! renderer uses. Rather than digging those out of other passes at render
//! time, an integration layer publishes them here as a render-world
//! resource. When a source is absent the kernels bind a 1x1 white fallback
//! and the fog renders unshadowed.

use bevy::prelude::*;
use bevy::render::render_resource::{Buffer, TextureView};

use super::light::MAX_FOG_LIGHTS;

/// Cascade slots in the main light shadow uniform.
/// Must match MAX_SHADOW_CASCADES in volumetric_realtime.wgsl.
pub const MAX_SHADOW_CASCADES: usize = 4;

/// Shadow data for the main directional light.
pub struct MainShadowSource {
    /// Cascaded shadow map, sampled with a comparison sampler.
    pub shadow_map: TextureView,
    /// Uniform buffer holding a [`GpuMainShadow`].
    pub uniform: Buffer,
}

/// Shadow data for additional (punctual) lights.
pub struct AdditionalShadowSource {
    /// Shadow atlas shared by all additional lights.
    pub shadow_atlas: TextureView,
    /// Storage buffer of [`GpuShadowSlice`] entries, indexed by renderer
    /// light index.
    pub slices: Buffer,
}

/// Shadow sources published for the current frame.
///
/// Reset on extract; an integration system fills it in before prepare runs.
#[derive(Resource, Default)]
pub struct FogShadowSources {
    pub main: Option<MainShadowSource>,
    pub additional: Option<AdditionalShadowSource>,
}

/// GPU-side main light shadow data.
/// Must match the struct in volumetric_realtime.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuMainShadow {
    /// World-to-shadow matrix per cascade.
    pub world_to_shadow: [[[f32; 4]; 4]; MAX_SHADOW_CASCADES],
    /// Squared distance at which each cascade ends.
    pub cascade_splits: [f32; 4],
    /// x = active cascade count, y = shadow strength, zw padding.
    pub params: [f32; 4],
}

impl Default for GpuMainShadow {
    fn default() -> Self {
        Self {
            world_to_shadow: [Mat4::IDENTITY.to_cols_array_2d(); MAX_SHADOW_CASCADES],
            cascade_splits: [f32::MAX; 4],
            params: [0.0, 1.0, 0.0, 0.0],
        }
    }
}

/// One additional light's shadow transform in the atlas.
/// Must match the struct in volumetric_realtime.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuShadowSlice {
    /// World-to-atlas matrix for this light.
    pub world_to_shadow: [[f32; 4]; 4],
    /// x = shadow strength, y = 1 if this light casts shadows, zw padding.
    pub params: [f32; 4],
}

impl Default for GpuShadowSlice {
    fn default() -> Self {
        Self {
            world_to_shadow: Mat4::IDENTITY.to_cols_array_2d(),
            // Strength zero and not-casting: fully lit.
            params: [0.0; 4],
        }
    }
}

/// CPU staging for the additional shadow slice buffer. Fixed capacity so the
/// buffer is created once and rewritten.
pub fn shadow_slices_bytes(slices: &[GpuShadowSlice]) -> Vec<u8> {
    let mut table = [GpuShadowSlice::default(); MAX_FOG_LIGHTS];
    let n = slices.len().min(MAX_FOG_LIGHTS);
    table[..n].copy_from_slice(&slices[..n]);
    bytemuck::cast_slice(&table).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_struct_sizes() {
        // 4 matrices + splits + params.
        assert_eq!(std::mem::size_of::<GpuMainShadow>(), 4 * 64 + 16 + 16);
        assert_eq!(std::mem::size_of::<GpuShadowSlice>(), 64 + 16);
    }

    #[test]
    fn slice_table_is_fixed_capacity() {
        let empty = shadow_slices_bytes(&[]);
        let some = shadow_slices_bytes(&[GpuShadowSlice::default(); 12]);
        assert_eq!(empty.len(), some.len());
        assert_eq!(empty.len(), MAX_FOG_LIGHTS * std::mem::size_of::<GpuShadowSlice>());
    }

    #[test]
    fn slice_table_overflow_is_truncated() {
        let too_many = vec![GpuShadowSlice::default(); MAX_FOG_LIGHTS + 10];
        let bytes = shadow_slices_bytes(&too_many);
        assert_eq!(bytes.len(), MAX_FOG_LIGHTS * std::mem::size_of::<GpuShadowSlice>());
    }

    #[test]
    fn default_main_shadow_is_disabled() {
        let shadow = GpuMainShadow::default();
        assert_eq!(shadow.params[0], 0.0);
    }
}
