//! Global-illumination probe field consumed by the indirect bake pass.
//!
//! Radiance at a point is represented as an order-2 spherical harmonic
//! (9 coefficients per color channel), evaluable along arbitrary unit
//! directions. The bake engine queries a [`RadianceField`] for a probe at
//! each grid cell; applications plug in their own field or use the bundled
//! uniform and grid implementations.

use bevy::prelude::*;

/// An order-2 spherical harmonic radiance probe, one coefficient triple per
/// SH basis function.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Sh9Probe {
    pub coefficients: [Vec3; 9],
}

// Real SH basis constants for bands 0..2.
const SH_C0: f32 = 0.282095;
const SH_C1: f32 = 0.488603;
const SH_C2: f32 = 1.092548;
const SH_C3: f32 = 0.315392;
const SH_C4: f32 = 0.546274;

impl Sh9Probe {
    /// A probe radiating `color` uniformly in every direction.
    pub fn ambient(color: Vec3) -> Self {
        let mut probe = Self::default();
        probe.coefficients[0] = color / SH_C0;
        probe
    }

    /// Radiance along a unit direction. Negative lobes are clamped to zero.
    pub fn evaluate(&self, dir: Vec3) -> Vec3 {
        let (x, y, z) = (dir.x, dir.y, dir.z);
        let c = &self.coefficients;

        let radiance = c[0] * SH_C0
            + c[1] * (SH_C1 * y)
            + c[2] * (SH_C1 * z)
            + c[3] * (SH_C1 * x)
            + c[4] * (SH_C2 * x * y)
            + c[5] * (SH_C2 * y * z)
            + c[6] * (SH_C3 * (3.0 * z * z - 1.0))
            + c[7] * (SH_C2 * x * z)
            + c[8] * (SH_C4 * (x * x - y * y));

        radiance.max(Vec3::ZERO)
    }

    /// Add a directional lobe: radiance `color` centered on `dir`.
    pub fn add_directional(&mut self, dir: Vec3, color: Vec3) {
        let dir = dir.normalize_or_zero();
        let (x, y, z) = (dir.x, dir.y, dir.z);
        let c = &mut self.coefficients;

        c[0] += color * SH_C0;
        c[1] += color * (SH_C1 * y);
        c[2] += color * (SH_C1 * z);
        c[3] += color * (SH_C1 * x);
        c[4] += color * (SH_C2 * x * y);
        c[5] += color * (SH_C2 * y * z);
        c[6] += color * (SH_C3 * (3.0 * z * z - 1.0));
        c[7] += color * (SH_C2 * x * z);
        c[8] += color * (SH_C4 * (x * x - y * y));
    }

    fn lerp(a: &Sh9Probe, b: &Sh9Probe, t: f32) -> Sh9Probe {
        let mut out = Sh9Probe::default();
        for i in 0..9 {
            out.coefficients[i] = a.coefficients[i].lerp(b.coefficients[i], t);
        }
        out
    }
}

/// Source of radiance probes, queried by world position.
pub trait RadianceField: Send + Sync {
    fn probe_at(&self, point: Vec3) -> Sh9Probe;
}

/// The probe field the bake engine samples. Defaults to no radiance; replace
/// it with the application's field before baking.
#[derive(Resource)]
pub struct IndirectProbes {
    pub field: Box<dyn RadianceField>,
}

impl Default for IndirectProbes {
    fn default() -> Self {
        Self {
            field: Box::new(UniformRadianceField {
                probe: Sh9Probe::default(),
            }),
        }
    }
}

/// The same probe everywhere.
pub struct UniformRadianceField {
    pub probe: Sh9Probe,
}

impl UniformRadianceField {
    pub fn ambient(color: Vec3) -> Self {
        Self {
            probe: Sh9Probe::ambient(color),
        }
    }
}

impl RadianceField for UniformRadianceField {
    fn probe_at(&self, _point: Vec3) -> Sh9Probe {
        self.probe
    }
}

/// A regular grid of probes with trilinear interpolation. Queries outside
/// the bounds clamp to the nearest edge probe.
pub struct ProbeGrid {
    min: Vec3,
    size: Vec3,
    resolution: UVec3,
    probes: Vec<Sh9Probe>,
}

impl ProbeGrid {
    /// `probes` is laid out x-fastest, then y, then z, and must contain
    /// exactly `resolution.x * resolution.y * resolution.z` entries.
    pub fn new(min: Vec3, size: Vec3, resolution: UVec3, probes: Vec<Sh9Probe>) -> Self {
        assert_eq!(
            probes.len(),
            (resolution.x * resolution.y * resolution.z) as usize,
            "probe count must match grid resolution"
        );
        Self {
            min,
            size,
            resolution,
            probes,
        }
    }

    fn probe(&self, x: u32, y: u32, z: u32) -> &Sh9Probe {
        let idx = (z * self.resolution.y + y) * self.resolution.x + x;
        &self.probes[idx as usize]
    }
}

impl RadianceField for ProbeGrid {
    fn probe_at(&self, point: Vec3) -> Sh9Probe {
        let cells = (self.resolution - UVec3::ONE).max(UVec3::ONE).as_vec3();
        let uvw = ((point - self.min) / self.size).clamp(Vec3::ZERO, Vec3::ONE) * cells;

        let base = uvw.floor().as_uvec3().min(self.resolution - UVec3::ONE);
        let next = (base + UVec3::ONE).min(self.resolution - UVec3::ONE);
        let frac = uvw - base.as_vec3();

        let lerp_x = |y: u32, z: u32| {
            Sh9Probe::lerp(self.probe(base.x, y, z), self.probe(next.x, y, z), frac.x)
        };
        let bottom = Sh9Probe::lerp(&lerp_x(base.y, base.z), &lerp_x(next.y, base.z), frac.y);
        let top = Sh9Probe::lerp(&lerp_x(base.y, next.z), &lerp_x(next.y, next.z), frac.y);
        Sh9Probe::lerp(&bottom, &top, frac.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ambient_probe_is_uniform() {
        let probe = Sh9Probe::ambient(Vec3::new(0.2, 0.4, 0.6));
        for dir in [Vec3::X, Vec3::NEG_Y, Vec3::Z, Vec3::new(1.0, 1.0, 1.0).normalize()] {
            let radiance = probe.evaluate(dir);
            assert!((radiance - Vec3::new(0.2, 0.4, 0.6)).length() < 1e-5);
        }
    }

    #[test]
    fn directional_lobe_peaks_along_its_direction() {
        let mut probe = Sh9Probe::default();
        probe.add_directional(Vec3::Y, Vec3::ONE);
        let along = probe.evaluate(Vec3::Y).x;
        let across = probe.evaluate(Vec3::X).x;
        let opposite = probe.evaluate(Vec3::NEG_Y).x;
        assert!(along > across);
        assert!(along > opposite);
    }

    #[test]
    fn evaluation_never_goes_negative() {
        use crate::volumetrics::volume::SampleShape;

        let mut probe = Sh9Probe::default();
        probe.add_directional(Vec3::Z, Vec3::ONE);
        for dir in SampleShape::AxesAndDiagonals.directions() {
            let radiance = probe.evaluate(dir);
            assert!(radiance.min_element() >= 0.0);
        }
    }

    #[test]
    fn grid_interpolates_between_probes() {
        let dark = Sh9Probe::ambient(Vec3::ZERO);
        let bright = Sh9Probe::ambient(Vec3::ONE);
        // 2x1x1 grid: dark at x=0, bright at x=1.
        let grid = ProbeGrid::new(
            Vec3::ZERO,
            Vec3::new(10.0, 1.0, 1.0),
            UVec3::new(2, 1, 1),
            vec![dark, bright],
        );
        let mid = grid.probe_at(Vec3::new(5.0, 0.5, 0.5)).evaluate(Vec3::Z);
        assert!((mid - Vec3::splat(0.5)).length() < 1e-4);
    }

    #[test]
    fn grid_clamps_outside_bounds() {
        let grid = ProbeGrid::new(
            Vec3::ZERO,
            Vec3::ONE,
            UVec3::new(2, 1, 1),
            vec![Sh9Probe::ambient(Vec3::ZERO), Sh9Probe::ambient(Vec3::ONE)],
        );
        let far = grid.probe_at(Vec3::new(100.0, 0.0, 0.0)).evaluate(Vec3::Z);
        assert!((far - Vec3::ONE).length() < 1e-4);
        let near = grid.probe_at(Vec3::new(-100.0, 0.0, 0.0)).evaluate(Vec3::Z);
        assert!(near.length() < 1e-4);
    }
}
