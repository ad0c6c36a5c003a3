//! Per-camera fog configuration and the global fog profile.
//!
//! Pipeline variants are selected through plain enums: exactly one
//! compositing variant and exactly one depth-resolve variant are selectable,
//! and "none selected" is unrepresentable.

use bevy::prelude::*;
use bevy::render::extract_component::ExtractComponent;
use bevy::render::extract_resource::ExtractResource;

/// Discrete fog buffer quality tier.
///
/// The tier selects the depth (slice count) of the froxel grid and which
/// compositing kernel variant runs. Higher tiers march more slices per pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FogQuality {
    /// Base path, 16 slices.
    #[default]
    VeryLow,
    /// 32 slices.
    Low,
    /// 64 slices.
    Medium,
    /// 96 slices.
    High,
    /// 128 slices.
    Ultra,
    /// 256 slices. You were warned.
    Overkill,
}

impl FogQuality {
    /// Number of compositing pipeline variants (one per tier).
    pub const COUNT: usize = 6;

    /// Depth of the fog buffer in slices for this tier.
    pub fn depth(self) -> u32 {
        match self {
            FogQuality::VeryLow => 16,
            FogQuality::Low => 32,
            FogQuality::Medium => 64,
            FogQuality::High => 96,
            FogQuality::Ultra => 128,
            FogQuality::Overkill => 256,
        }
    }

    /// Index of this tier's compositing pipeline variant.
    pub fn variant_index(self) -> usize {
        match self {
            FogQuality::VeryLow => 0,
            FogQuality::Low => 1,
            FogQuality::Medium => 2,
            FogQuality::High => 3,
            FogQuality::Ultra => 4,
            FogQuality::Overkill => 5,
        }
    }

    /// Shader define compiled into this tier's compositing variant.
    /// `VeryLow` is the base path and defines nothing.
    pub fn shader_def(self) -> Option<&'static str> {
        match self {
            FogQuality::VeryLow => None,
            FogQuality::Low => Some("QUALITY_LOW"),
            FogQuality::Medium => Some("QUALITY_MEDIUM"),
            FogQuality::High => Some("QUALITY_HIGH"),
            FogQuality::Ultra => Some("QUALITY_ULTRA"),
            FogQuality::Overkill => Some("QUALITY_OVERKILL"),
        }
    }

    /// All tiers in variant order.
    pub fn all() -> [FogQuality; Self::COUNT] {
        [
            FogQuality::VeryLow,
            FogQuality::Low,
            FogQuality::Medium,
            FogQuality::High,
            FogQuality::Ultra,
            FogQuality::Overkill,
        ]
    }
}

/// Depth-resolve mode for the blend pass, keyed by the camera target's MSAA
/// sample count. Exactly one variant is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthResolve {
    /// Single-sampled depth.
    #[default]
    Single,
    /// Resolve 2 depth samples.
    Msaa2,
    /// Resolve 4 depth samples.
    Msaa4,
    /// Resolve 8 depth samples.
    Msaa8,
}

impl DepthResolve {
    /// Number of blend pipeline variants.
    pub const COUNT: usize = 4;

    /// The variant for a given MSAA sample count. Unknown counts fall back to
    /// single-sample resolve.
    pub fn from_sample_count(samples: u32) -> Self {
        match samples {
            2 => DepthResolve::Msaa2,
            4 => DepthResolve::Msaa4,
            8 => DepthResolve::Msaa8,
            _ => DepthResolve::Single,
        }
    }

    pub fn variant_index(self) -> usize {
        match self {
            DepthResolve::Single => 0,
            DepthResolve::Msaa2 => 1,
            DepthResolve::Msaa4 => 2,
            DepthResolve::Msaa8 => 3,
        }
    }

    pub fn shader_def(self) -> Option<&'static str> {
        match self {
            DepthResolve::Single => None,
            DepthResolve::Msaa2 => Some("DEPTH_MSAA_2"),
            DepthResolve::Msaa4 => Some("DEPTH_MSAA_4"),
            DepthResolve::Msaa8 => Some("DEPTH_MSAA_8"),
        }
    }

    pub fn all() -> [DepthResolve; Self::COUNT] {
        [
            DepthResolve::Single,
            DepthResolve::Msaa2,
            DepthResolve::Msaa4,
            DepthResolve::Msaa8,
        ]
    }
}

/// Marks a camera for volumetric fog rendering and configures its buffers.
///
/// ```rust,ignore
/// commands.spawn((
///     Camera3d::default(),
///     VolumetricsCamera::default(),
/// ));
/// ```
#[derive(Component, Clone, ExtractComponent)]
pub struct VolumetricsCamera {
    /// XY resolution of the froxel grid (the grid is square in XY).
    pub resolution: u32,
    /// Quality tier: grid depth + compositing variant.
    pub quality: FogQuality,
    /// World-space distance covered by the far edge of the grid.
    pub far: f32,
    /// Run the realtime light sampling stage.
    pub render_realtime: bool,
    /// Run the baked volume sampling stage.
    pub render_baked: bool,
}

impl Default for VolumetricsCamera {
    fn default() -> Self {
        Self {
            resolution: 128,
            quality: FogQuality::default(),
            far: 100.0,
            render_realtime: true,
            render_baked: true,
        }
    }
}

/// Optional second-eye transforms for stereo rendering.
///
/// When present on a fog camera the whole pipeline (clear, sampling,
/// compositing, blending) runs a second time with these matrices and eye
/// index 1. When absent the second context slot is identity and ignored.
#[derive(Component, Clone, ExtractComponent)]
pub struct StereoEyes {
    /// Right-eye camera-to-world matrix.
    pub world_from_view: Mat4,
    /// Right-eye projection matrix.
    pub clip_from_view: Mat4,
}

/// Global fog strength profile.
///
/// Both densities at zero means the fog pass is a no-op and is skipped
/// entirely; the blend target is left untouched.
#[derive(Resource, Clone, ExtractResource)]
pub struct VolumetricsProfile {
    /// Strength of realtime sampled fog.
    pub realtime_density: f32,
    /// Strength of baked sampled fog.
    pub baked_density: f32,
}

impl Default for VolumetricsProfile {
    fn default() -> Self {
        Self {
            realtime_density: 1.0,
            baked_density: 1.0,
        }
    }
}

impl VolumetricsProfile {
    /// Whether the fog pass contributes anything at all this frame.
    pub fn is_active(&self) -> bool {
        self.realtime_density > 0.0 || self.baked_density > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_depths_match_tiers() {
        assert_eq!(FogQuality::VeryLow.depth(), 16);
        assert_eq!(FogQuality::Low.depth(), 32);
        assert_eq!(FogQuality::Medium.depth(), 64);
        assert_eq!(FogQuality::High.depth(), 96);
        assert_eq!(FogQuality::Ultra.depth(), 128);
        assert_eq!(FogQuality::Overkill.depth(), 256);
    }

    #[test]
    fn quality_variants_are_exclusive_and_dense() {
        let mut seen = [false; FogQuality::COUNT];
        for quality in FogQuality::all() {
            let idx = quality.variant_index();
            assert!(!seen[idx], "variant index {} selected twice", idx);
            seen[idx] = true;
        }
        assert!(seen.iter().all(|s| *s));

        // Only the base path compiles without a define.
        let defs: Vec<_> = FogQuality::all()
            .iter()
            .filter_map(|q| q.shader_def())
            .collect();
        assert_eq!(defs.len(), FogQuality::COUNT - 1);
    }

    #[test]
    fn depth_resolve_from_sample_count() {
        assert_eq!(DepthResolve::from_sample_count(1), DepthResolve::Single);
        assert_eq!(DepthResolve::from_sample_count(2), DepthResolve::Msaa2);
        assert_eq!(DepthResolve::from_sample_count(4), DepthResolve::Msaa4);
        assert_eq!(DepthResolve::from_sample_count(8), DepthResolve::Msaa8);
        // Unknown counts take the base path.
        assert_eq!(DepthResolve::from_sample_count(16), DepthResolve::Single);
        assert_eq!(DepthResolve::from_sample_count(0), DepthResolve::Single);
    }

    #[test]
    fn profile_no_op_when_both_densities_zero() {
        let profile = VolumetricsProfile {
            realtime_density: 0.0,
            baked_density: 0.0,
        };
        assert!(!profile.is_active());

        let realtime_only = VolumetricsProfile {
            realtime_density: 0.5,
            baked_density: 0.0,
        };
        assert!(realtime_only.is_active());

        let baked_only = VolumetricsProfile {
            realtime_density: 0.0,
            baked_density: 2.0,
        };
        assert!(baked_only.is_active());
    }
}
