//! Core library for the vapor volumetric fog renderer.
//!
//! This crate provides:
//! - A per-frame fog pipeline (light sampling, baked volume sampling,
//!   depth-aware compositing, dithered blending) as a render graph extension
//! - An on-demand bake engine producing persisted 3D radiance textures
//! - Save/load for baked volume data

pub mod volumetrics;

pub use volumetrics::{
    load_volume, save_volume, BakeVolumes, BakedLight, BakedVolume, BakedVolumeData, FogLight,
    FogQuality, FogShadowSources,
    IndirectProbes, ProbeGrid, RadianceField, SampleAggregation, SampleColorSpace, SampleShape,
    Sh9Probe, StereoEyes, UniformRadianceField, VolumetricsCamera, VolumetricsPlugin,
    VolumetricsProfile,
};
