//! Baked fog volumes: the region component and the CPU color math used by
//! the bake engine.
//!
//! A [`BakedVolume`] is a bounded box with a persisted 3D radiance texture.
//! The bake engine fills the texture; the per-frame baked sampling stage
//! reads it. Cell colors are produced by evaluating a probe field along a
//! configured direction set and reducing with a configured aggregation
//! policy.

use bevy::prelude::*;

/// Direction set evaluated per grid cell during the indirect bake pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleShape {
    /// One sample along the volume's forward axis.
    Forward,
    /// Six axis-aligned samples.
    #[default]
    Axes,
    /// 26 samples: 6 axes, 12 edge diagonals, 8 corner diagonals.
    AxesAndDiagonals,
}

impl SampleShape {
    /// The unit directions for this shape, in a fixed deterministic order.
    pub fn directions(self) -> Vec<Vec3> {
        match self {
            SampleShape::Forward => vec![Vec3::Z],
            SampleShape::Axes => axis_directions().to_vec(),
            SampleShape::AxesAndDiagonals => {
                let mut dirs = axis_directions().to_vec();
                // Edge diagonals: every unordered pair of perpendicular axes.
                for i in 0..6 {
                    for j in (i + 1)..6 {
                        let sum = axis_directions()[i] + axis_directions()[j];
                        if sum.length_squared() > 1.0 {
                            dirs.push(sum.normalize());
                        }
                    }
                }
                // Corner diagonals.
                for sx in [-1.0f32, 1.0] {
                    for sy in [-1.0f32, 1.0] {
                        for sz in [-1.0f32, 1.0] {
                            dirs.push(Vec3::new(sx, sy, sz).normalize());
                        }
                    }
                }
                dirs
            }
        }
    }
}

fn axis_directions() -> [Vec3; 6] {
    [Vec3::Z, Vec3::NEG_Z, Vec3::Y, Vec3::NEG_Y, Vec3::X, Vec3::NEG_X]
}

/// Policy reducing per-direction sample colors to a single cell color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleAggregation {
    /// Arithmetic mean of all samples.
    #[default]
    Mean,
    /// The sample with the highest grayscale luminance.
    Brightest,
    /// The sample with the lowest grayscale luminance. Seeded at luminance
    /// 1.0, so if every sample is brighter than that the result is black.
    Dimmest,
}

/// Color space the baked texture stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleColorSpace {
    #[default]
    Linear,
    /// Convert cell colors to gamma space before storing.
    Gamma,
}

/// A bounded region with precomputed volumetric lighting.
///
/// Spawn with a `Transform`; the box covers `bounds_size` around
/// `bounds_center` in local space. The texture in `buffer` is produced by
/// the bake engine and left `None` until the first bake; unbaked volumes are
/// skipped by the frame pipeline without error.
#[derive(Component, Clone)]
pub struct BakedVolume {
    /// Local-space center of the box.
    pub bounds_center: Vec3,
    /// Local-space size of the box.
    pub bounds_size: Vec3,
    /// Grid cells along each axis. Axes are independent.
    pub resolution: UVec3,
    /// Run the CPU probe-field pass when baking.
    pub bake_indirect: bool,
    /// Run the GPU per-light pass when baking.
    pub bake_direct: bool,
    /// Density scalar applied to every cell.
    pub density: f32,
    /// Color filter multiplied into every cell.
    pub filter: Vec3,
    pub shape: SampleShape,
    pub aggregation: SampleAggregation,
    pub color_space: SampleColorSpace,
    /// The baked radiance texture. Replaced wholesale by each bake.
    pub buffer: Option<Handle<Image>>,
}

impl Default for BakedVolume {
    fn default() -> Self {
        Self {
            bounds_center: Vec3::ZERO,
            bounds_size: Vec3::splat(10.0),
            resolution: UVec3::splat(16),
            bake_indirect: true,
            bake_direct: true,
            density: 1.0,
            filter: Vec3::ONE,
            shape: SampleShape::default(),
            aggregation: SampleAggregation::default(),
            color_space: SampleColorSpace::default(),
            buffer: None,
        }
    }
}

impl BakedVolume {
    /// Number of cells in the grid.
    pub fn cell_count(&self) -> usize {
        (self.resolution.x as usize) * (self.resolution.y as usize) * (self.resolution.z as usize)
    }

    /// The bake sample directions for this volume's configured shape.
    /// Useful for editor gizmos previewing the sampling pattern.
    pub fn sample_directions(&self) -> Vec<Vec3> {
        self.shape.directions()
    }

    /// World position of a grid cell.
    ///
    /// Cell (0,0,0) maps to the box minimum corner and the last cell along
    /// each axis maps to the maximum corner, both carried through the
    /// volume's transform.
    pub fn cell_world_position(&self, cell: UVec3, local_to_world: &Mat4) -> Vec3 {
        let delta = Vec3::new(
            cell.x as f32 / (self.resolution.x.max(2) - 1) as f32,
            cell.y as f32 / (self.resolution.y.max(2) - 1) as f32,
            cell.z as f32 / (self.resolution.z.max(2) - 1) as f32,
        );
        let interior = self.bounds_size * delta - self.bounds_size * 0.5;
        local_to_world.transform_point3(self.bounds_center + interior)
    }

    /// Reduce per-direction sample colors to the stored cell color:
    /// aggregate, scale by density and filter, convert color space.
    pub fn process_colors(&self, colors: &[Vec3]) -> Vec3 {
        let aggregated = match self.aggregation {
            SampleAggregation::Mean => {
                let sum: Vec3 = colors.iter().copied().sum();
                sum / colors.len().max(1) as f32
            }
            SampleAggregation::Brightest => {
                let mut best = Vec3::ZERO;
                let mut brightest = 0.0;
                for color in colors {
                    if grayscale(*color) > brightest {
                        best = *color;
                        brightest = grayscale(best);
                    }
                }
                best
            }
            SampleAggregation::Dimmest => {
                let mut best = Vec3::ZERO;
                let mut dimmest = 1.0;
                for color in colors {
                    if grayscale(*color) < dimmest {
                        best = *color;
                        dimmest = grayscale(best);
                    }
                }
                best
            }
        };

        let scaled = aggregated * self.density * self.filter;
        match self.color_space {
            SampleColorSpace::Linear => scaled,
            SampleColorSpace::Gamma => linear_to_gamma(scaled),
        }
    }
}

/// Perceptual grayscale luminance.
pub fn grayscale(color: Vec3) -> f32 {
    0.299 * color.x + 0.587 * color.y + 0.114 * color.z
}

/// Per-channel sRGB transfer function.
pub fn linear_to_gamma(color: Vec3) -> Vec3 {
    fn channel(c: f32) -> f32 {
        if c <= 0.0031308 {
            c * 12.92
        } else {
            1.055 * c.powf(1.0 / 2.4) - 0.055
        }
    }
    Vec3::new(channel(color.x), channel(color.y), channel(color.z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_direction_counts() {
        assert_eq!(SampleShape::Forward.directions().len(), 1);
        assert_eq!(SampleShape::Axes.directions().len(), 6);
        assert_eq!(SampleShape::AxesAndDiagonals.directions().len(), 26);
    }

    #[test]
    fn shape_directions_are_unit_and_distinct() {
        for shape in [SampleShape::Forward, SampleShape::Axes, SampleShape::AxesAndDiagonals] {
            let dirs = shape.directions();
            for dir in &dirs {
                assert!((dir.length() - 1.0).abs() < 1e-5);
            }
            for (i, a) in dirs.iter().enumerate() {
                for b in &dirs[i + 1..] {
                    assert!((*a - *b).length() > 1e-3, "duplicate direction in {:?}", shape);
                }
            }
        }
    }

    #[test]
    fn cell_mapping_hits_bounds_corners() {
        let volume = BakedVolume {
            bounds_center: Vec3::new(1.0, 2.0, 3.0),
            bounds_size: Vec3::new(4.0, 6.0, 8.0),
            resolution: UVec3::new(4, 8, 16),
            ..default()
        };
        let identity = Mat4::IDENTITY;

        let min = volume.cell_world_position(UVec3::ZERO, &identity);
        let max = volume.cell_world_position(volume.resolution - UVec3::ONE, &identity);
        assert!((min - Vec3::new(-1.0, -1.0, -1.0)).length() < 1e-5);
        assert!((max - Vec3::new(3.0, 5.0, 7.0)).length() < 1e-5);
    }

    #[test]
    fn cell_mapping_respects_transform() {
        let volume = BakedVolume {
            bounds_size: Vec3::splat(2.0),
            resolution: UVec3::splat(2),
            ..default()
        };
        let local_to_world = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
        let min = volume.cell_world_position(UVec3::ZERO, &local_to_world);
        assert!((min - Vec3::new(9.0, -1.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn mean_aggregation_is_arithmetic_average() {
        let volume = BakedVolume::default();
        let colors = [Vec3::splat(0.2), Vec3::splat(0.4), Vec3::splat(0.6)];
        let result = volume.process_colors(&colors);
        assert!((result - Vec3::splat(0.4)).length() < 1e-6);
    }

    #[test]
    fn brightest_dominates_dimmest_is_dominated() {
        let colors = [
            Vec3::new(0.9, 0.1, 0.1),
            Vec3::new(0.1, 0.9, 0.1),
            Vec3::new(0.1, 0.1, 0.9),
        ];
        let brightest = BakedVolume {
            aggregation: SampleAggregation::Brightest,
            ..default()
        }
        .process_colors(&colors);
        let dimmest = BakedVolume {
            aggregation: SampleAggregation::Dimmest,
            ..default()
        }
        .process_colors(&colors);

        for color in &colors {
            assert!(grayscale(brightest) >= grayscale(*color) - 1e-6);
            assert!(grayscale(dimmest) <= grayscale(*color) + 1e-6);
        }
    }

    #[test]
    fn dimmest_seed_yields_black_when_all_samples_exceed_it() {
        let volume = BakedVolume {
            aggregation: SampleAggregation::Dimmest,
            ..default()
        };
        let result = volume.process_colors(&[Vec3::splat(2.0), Vec3::splat(3.0)]);
        assert_eq!(result, Vec3::ZERO);
    }

    #[test]
    fn density_and_filter_scale_output() {
        let volume = BakedVolume {
            density: 2.0,
            filter: Vec3::new(1.0, 0.5, 0.0),
            ..default()
        };
        let result = volume.process_colors(&[Vec3::ONE]);
        assert!((result - Vec3::new(2.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn gamma_conversion_applied_after_scaling() {
        let volume = BakedVolume {
            color_space: SampleColorSpace::Gamma,
            ..default()
        };
        let result = volume.process_colors(&[Vec3::splat(0.5)]);
        let expected = linear_to_gamma(Vec3::splat(0.5));
        assert!((result - expected).length() < 1e-6);
        assert!(result.x > 0.5);
    }

    #[test]
    fn process_colors_is_deterministic() {
        let volume = BakedVolume::default();
        let colors: Vec<_> = SampleShape::AxesAndDiagonals
            .directions()
            .iter()
            .map(|d| d.abs())
            .collect();
        assert_eq!(volume.process_colors(&colors), volume.process_colors(&colors));
    }
}
