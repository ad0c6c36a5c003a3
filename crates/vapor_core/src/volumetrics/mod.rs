//! Grid-based volumetric fog.
//!
//! Per frame, participating lights and baked volumes are accumulated into a
//! transient 3D fog buffer, collapsed against scene depth into a 2D
//! composite, and blended onto the camera's color target with animated
//! dithering. Baked volumes are filled offline by the bake engine from a
//! global-illumination probe field and static lights.

pub mod bake;
pub mod extract;
pub mod fog_node;
pub mod labels;
pub mod light;
pub mod pipeline;
pub mod prepare;
pub mod probe;
pub mod settings;
pub mod shadow;
pub mod volume;
pub mod volume_io;

mod plugin;

pub use bake::{bake_volume, BakeError, BakeVolumes, BakedLight};
pub use labels::VolumetricsLabel;
pub use light::{FogLight, MAX_FOG_LIGHTS};
pub use plugin::VolumetricsPlugin;
pub use probe::{IndirectProbes, ProbeGrid, RadianceField, Sh9Probe, UniformRadianceField};
pub use settings::{DepthResolve, FogQuality, StereoEyes, VolumetricsCamera, VolumetricsProfile};
pub use shadow::{AdditionalShadowSource, FogShadowSources, MainShadowSource};
pub use volume::{BakedVolume, SampleAggregation, SampleColorSpace, SampleShape};
pub use volume_io::{load_volume, save_volume, BakedVolumeData, VolumeIoError};
