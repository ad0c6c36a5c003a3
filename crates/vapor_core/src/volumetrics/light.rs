//! Fog light participation and the per-frame light classifier.
//!
//! Lights opt into volumetric fog with a [`FogLight`] component. Each frame
//! the classifier walks the scene's visible lights in renderer order, skips
//! the main directional light (the compositor handles it separately), and
//! builds a compact table of participating lights plus a mapping back to
//! renderer indices so sampling kernels can fetch the right shadow data.
//!
//! ## Usage
//!
//! ```rust,ignore
//! // A point light that also lights the fog around it
//! commands.spawn((
//!     PointLight { color: Color::srgb(1.0, 0.5, 0.2), ..default() },
//!     FogLight { fog_intensity: 0.4, ..default() },
//!     Transform::from_xyz(5.0, 3.0, 5.0),
//! ));
//! ```

use bevy::prelude::*;
use bevy::render::render_resource::ShaderType;

/// Maximum number of fog lights uploaded per frame.
/// This must match MAX_FOG_LIGHTS in volumetric_realtime.wgsl.
pub const MAX_FOG_LIGHTS: usize = 256;

/// Marks a light as participating in volumetric fog.
#[derive(Component, Clone, Debug)]
pub struct FogLight {
    /// Strength of the light's fog contribution when `sync_intensity`
    /// is off.
    pub fog_intensity: f32,
    /// When set, the fog uses the light's own color and surface intensity
    /// instead of a renormalized color scaled by `fog_intensity`.
    pub sync_intensity: bool,
}

impl Default for FogLight {
    fn default() -> Self {
        Self {
            fog_intensity: 1.0,
            sync_intensity: false,
        }
    }
}

/// Kind of a visible scene light, as the renderer sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneLightKind {
    Directional,
    Point,
    Spot,
}

/// One visible light in renderer order. Input to the classifier.
#[derive(Debug, Clone)]
pub struct SceneLight {
    pub kind: SceneLightKind,
    /// World position. Unused for directional lights.
    pub position: Vec3,
    /// World-space forward direction of the light.
    pub direction: Vec3,
    /// Linear RGB color, not premultiplied by intensity.
    pub color: Vec3,
    /// Surface intensity multiplier.
    pub intensity: f32,
    /// Falloff range. Unused for directional lights.
    pub range: f32,
    /// Full inner and outer cone angles in radians. Spot lights only.
    pub spot_angles: Option<(f32, f32)>,
    /// Fog parameters, if the light participates in fog.
    pub fog: Option<FogLight>,
}

/// A fog-participating light selected by the classifier.
#[derive(Debug, Clone)]
pub struct ClassifiedLight {
    /// Index of this light in the renderer's visible light list. Sampling
    /// kernels use it to fetch per-light shadow data.
    pub scene_index: usize,
    pub kind: SceneLightKind,
    pub position: Vec3,
    pub direction: Vec3,
    /// Final fog color, ready for the sampling kernel.
    pub fog_color: Vec3,
    pub range: f32,
    pub spot_angles: Option<(f32, f32)>,
}

/// Resolve a light's fog color.
///
/// With `sync_intensity` the fog inherits the light's surface color as-is.
/// Otherwise the color is divided by the surface intensity to undo the
/// renderer's premultiplication and rescaled by the fog intensity. A
/// non-positive surface intensity yields black rather than a division blowup.
pub fn fog_color(color: Vec3, intensity: f32, fog: &FogLight) -> Vec3 {
    if fog.sync_intensity {
        color
    } else if intensity > 0.0 {
        (color / intensity) * fog.fog_intensity
    } else {
        Vec3::ZERO
    }
}

/// Select the fog-participating lights from the renderer's visible light
/// list.
///
/// The main directional light at `main_index` is always skipped, even if it
/// carries fog parameters. Output order follows input order, so the index
/// mapping is monotonic.
pub fn classify_lights(lights: &[SceneLight], main_index: Option<usize>) -> Vec<ClassifiedLight> {
    let mut classified = Vec::new();

    for (scene_index, light) in lights.iter().enumerate() {
        if Some(scene_index) == main_index {
            continue;
        }
        let Some(fog) = &light.fog else {
            continue;
        };

        classified.push(ClassifiedLight {
            scene_index,
            kind: light.kind,
            position: light.position,
            direction: light.direction,
            fog_color: fog_color(light.color, light.intensity, fog),
            range: light.range,
            spot_angles: light.spot_angles,
        });
    }

    classified
}

/// GPU-side fog light data.
/// Must match the struct in volumetric_realtime.wgsl.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable, ShaderType)]
pub struct GpuFogLight {
    /// Punctual: world position (xyz), w = 1.
    /// Directional: negated direction (xyz), w = 0.
    pub position: [f32; 4],
    /// Fog color (rgb), w = renderer light index as float.
    pub color_index: [f32; 4],
    /// Distance and angle falloff terms:
    /// x = 1 / fadeRangeSqr, y = -rangeSqr / fadeRangeSqr,
    /// z = 1 / (cosInner - cosOuter), w = -cosOuter * z.
    pub attenuation: [f32; 4],
    /// Negated spot direction (xyz), w unused.
    pub spot_direction: [f32; 4],
}

impl Default for GpuFogLight {
    fn default() -> Self {
        Self {
            position: [0.0; 4],
            color_index: [0.0; 4],
            attenuation: [0.0, 1.0, 0.0, 1.0],
            spot_direction: [0.0; 4],
        }
    }
}

impl GpuFogLight {
    /// Pack a classified light for upload.
    pub fn pack(light: &ClassifiedLight) -> Self {
        let mut packed = Self::default();
        packed.color_index = [
            light.fog_color.x,
            light.fog_color.y,
            light.fog_color.z,
            light.scene_index as f32,
        ];

        match light.kind {
            SceneLightKind::Directional => {
                let dir = -light.direction;
                packed.position = [dir.x, dir.y, dir.z, 0.0];
            }
            SceneLightKind::Point | SceneLightKind::Spot => {
                packed.position = [light.position.x, light.position.y, light.position.z, 1.0];
                let (dist_x, dist_y) = distance_attenuation(light.range);
                let (angle_z, angle_w) = match light.spot_angles {
                    Some((inner, outer)) if light.kind == SceneLightKind::Spot => {
                        angle_attenuation(inner, outer)
                    }
                    // Point lights pass every angle test.
                    _ => (0.0, 1.0),
                };
                packed.attenuation = [dist_x, dist_y, angle_z, angle_w];
                let spot = -light.direction;
                packed.spot_direction = [spot.x, spot.y, spot.z, 0.0];
            }
        }

        packed
    }
}

/// Distance falloff terms for a punctual light. Attenuation fades smoothly
/// to zero between 80% of the range and the range itself.
fn distance_attenuation(range: f32) -> (f32, f32) {
    let range_sqr = (range * range).max(0.0001);
    let fade_start_sqr = 0.8 * 0.8 * range_sqr;
    let fade_range_sqr = fade_start_sqr - range_sqr;
    (1.0 / fade_range_sqr, -range_sqr / fade_range_sqr)
}

/// Angle falloff terms for a spot light from full inner and outer cone
/// angles in radians.
fn angle_attenuation(inner: f32, outer: f32) -> (f32, f32) {
    let cos_outer = (outer * 0.5).cos();
    let cos_inner = (inner * 0.5).cos();
    let smooth_range = (cos_inner - cos_outer).max(0.001);
    let inv_range = 1.0 / smooth_range;
    (inv_range, -cos_outer * inv_range)
}

/// Storage buffer header with the active fog light count.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FogLightsHeader {
    /// Number of active fog lights (x), padding (yzw).
    pub count: [u32; 4],
}

/// CPU staging for the fog lights storage buffer.
#[derive(Clone, Default)]
pub struct FogLightsStorage {
    pub header: FogLightsHeader,
    pub lights: Vec<GpuFogLight>,
}

impl Default for FogLightsHeader {
    fn default() -> Self {
        Self { count: [0; 4] }
    }
}

impl FogLightsStorage {
    /// Pack the frame's classified lights into an upload-ready table.
    ///
    /// Lights beyond [`MAX_FOG_LIGHTS`] are dropped in table order; the
    /// header count always matches the packed lights.
    pub fn build(lights: &[ClassifiedLight]) -> Self {
        let mut storage = Self::default();
        for light in lights {
            if storage.lights.len() >= MAX_FOG_LIGHTS {
                warn_once!(
                    "Too many fog lights ({} > {}), extras ignored",
                    lights.len(),
                    MAX_FOG_LIGHTS
                );
                break;
            }
            storage.lights.push(GpuFogLight::pack(light));
        }
        storage.header.count[0] = storage.lights.len() as u32;
        storage
    }

    /// Convert to bytes for GPU upload.
    /// Layout: [header (16 bytes)] [lights (64 bytes each)]
    ///
    /// Always padded to the full MAX_FOG_LIGHTS capacity so the buffer never
    /// needs recreating when the light count changes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let light_size = std::mem::size_of::<GpuFogLight>();
        let mut bytes = Vec::with_capacity(16 + MAX_FOG_LIGHTS * light_size);
        bytes.extend_from_slice(bytemuck::bytes_of(&self.header));
        for light in &self.lights {
            bytes.extend_from_slice(bytemuck::bytes_of(light));
        }
        if self.lights.len() < MAX_FOG_LIGHTS {
            let padding = (MAX_FOG_LIGHTS - self.lights.len()) * light_size;
            bytes.extend(std::iter::repeat(0u8).take(padding));
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(fog: Option<FogLight>) -> SceneLight {
        SceneLight {
            kind: SceneLightKind::Point,
            position: Vec3::new(1.0, 2.0, 3.0),
            direction: Vec3::NEG_Z,
            color: Vec3::new(1.0, 0.5, 0.25),
            intensity: 2.0,
            range: 10.0,
            spot_angles: None,
            fog,
        }
    }

    fn directional(fog: Option<FogLight>) -> SceneLight {
        SceneLight {
            kind: SceneLightKind::Directional,
            position: Vec3::ZERO,
            direction: Vec3::new(0.0, -1.0, 0.0),
            color: Vec3::ONE,
            intensity: 1.0,
            range: 0.0,
            spot_angles: None,
            fog,
        }
    }

    #[test]
    fn gpu_fog_light_size() {
        // Four vec4 rows, matching the WGSL struct.
        assert_eq!(std::mem::size_of::<GpuFogLight>(), 64);
        assert_eq!(std::mem::size_of::<FogLightsHeader>(), 16);
    }

    #[test]
    fn classifier_skips_main_light_and_non_fog_lights() {
        let lights = vec![
            directional(Some(FogLight::default())), // main, skipped
            point(None),                            // no fog component
            point(Some(FogLight::default())),
            point(Some(FogLight::default())),
        ];
        let classified = classify_lights(&lights, Some(0));
        assert_eq!(classified.len(), 2);
        assert_eq!(classified[0].scene_index, 2);
        assert_eq!(classified[1].scene_index, 3);
    }

    #[test]
    fn classifier_mapping_is_monotonic() {
        let lights: Vec<_> = (0..8).map(|_| point(Some(FogLight::default()))).collect();
        let classified = classify_lights(&lights, Some(3));
        let indices: Vec<_> = classified.iter().map(|l| l.scene_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 4, 5, 6, 7]);
    }

    #[test]
    fn fog_color_renormalizes_by_intensity() {
        let fog = FogLight {
            fog_intensity: 0.5,
            sync_intensity: false,
        };
        let color = fog_color(Vec3::new(2.0, 1.0, 0.0), 2.0, &fog);
        assert!((color - Vec3::new(0.5, 0.25, 0.0)).length() < 1e-6);
    }

    #[test]
    fn fog_color_sync_uses_light_color_directly() {
        let fog = FogLight {
            fog_intensity: 0.1,
            sync_intensity: true,
        };
        let color = fog_color(Vec3::new(0.3, 0.6, 0.9), 7.0, &fog);
        assert_eq!(color, Vec3::new(0.3, 0.6, 0.9));
    }

    #[test]
    fn fog_color_zero_intensity_is_black() {
        let fog = FogLight::default();
        assert_eq!(fog_color(Vec3::ONE, 0.0, &fog), Vec3::ZERO);
        assert_eq!(fog_color(Vec3::ONE, -1.0, &fog), Vec3::ZERO);
    }

    #[test]
    fn directional_pack_negates_direction_with_zero_w() {
        let classified = classify_lights(&[directional(Some(FogLight::default()))], None);
        let packed = GpuFogLight::pack(&classified[0]);
        assert_eq!(packed.position, [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn point_pack_passes_all_angle_tests() {
        let classified = classify_lights(&[point(Some(FogLight::default()))], None);
        let packed = GpuFogLight::pack(&classified[0]);
        assert_eq!(packed.position[3], 1.0);
        // angle terms z*cos + w must be >= 1 for any cos in [-1, 1]
        let (z, w) = (packed.attenuation[2], packed.attenuation[3]);
        assert!(z * -1.0 + w >= 1.0);
        assert!(z * 1.0 + w >= 1.0);
    }

    #[test]
    fn spot_pack_angle_terms() {
        let mut light = point(Some(FogLight::default()));
        light.kind = SceneLightKind::Spot;
        light.spot_angles = Some((0.5, 1.0));
        let classified = classify_lights(&[light], None);
        let packed = GpuFogLight::pack(&classified[0]);
        let (z, w) = (packed.attenuation[2], packed.attenuation[3]);
        // Full attenuation at the inner cone, none at the outer cone.
        let cos_inner = (0.25f32).cos();
        let cos_outer = (0.5f32).cos();
        assert!((z * cos_inner + w - 1.0).abs() < 1e-5);
        assert!((z * cos_outer + w).abs() < 1e-5);
    }

    #[test]
    fn light_table_clamps_at_capacity_in_order() {
        let lights: Vec<_> = (0..MAX_FOG_LIGHTS + 40)
            .map(|_| point(Some(FogLight::default())))
            .collect();
        let classified = classify_lights(&lights, None);
        assert_eq!(classified.len(), MAX_FOG_LIGHTS + 40);

        let storage = FogLightsStorage::build(&classified);
        assert_eq!(storage.lights.len(), MAX_FOG_LIGHTS);
        assert_eq!(storage.header.count[0], MAX_FOG_LIGHTS as u32);
        // The first MAX_FOG_LIGHTS lights survive, in table order.
        for (i, light) in storage.lights.iter().enumerate() {
            assert_eq!(light.color_index[3], i as f32);
        }
    }

    #[test]
    fn storage_bytes_are_fixed_size() {
        let empty = FogLightsStorage::default();
        let mut full = FogLightsStorage::default();
        full.lights = vec![GpuFogLight::default(); 17];
        full.header.count[0] = 17;
        assert_eq!(empty.to_bytes().len(), full.to_bytes().len());
        assert_eq!(empty.to_bytes().len(), 16 + MAX_FOG_LIGHTS * 64);
    }
}
