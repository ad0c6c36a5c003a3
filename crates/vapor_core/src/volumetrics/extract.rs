//! Extraction systems copying fog inputs from the main world into the
//! render world each frame.

use bevy::prelude::*;
use bevy::render::Extract;

use super::light::{classify_lights, fog_color, ClassifiedLight, FogLight, SceneLight, SceneLightKind};
use super::volume::BakedVolume;

/// The frame's main directional light, when it participates in fog. Handled
/// through its own single-light kernel rather than the generic light table.
#[derive(Clone, Debug)]
pub struct MainFogLight {
    pub direction: Vec3,
    pub fog_color: Vec3,
    pub shadows_enabled: bool,
}

/// Classifier output for the current frame.
#[derive(Resource, Default)]
pub struct FogFrameLights {
    pub main: Option<MainFogLight>,
    pub lights: Vec<ClassifiedLight>,
}

/// One baked volume visible to the frame pipeline. Volumes without a baked
/// texture are not extracted at all.
#[derive(Clone)]
pub struct ExtractedBakedVolume {
    pub world_from_local: Mat4,
    pub bounds_center: Vec3,
    pub bounds_size: Vec3,
    pub image: Handle<Image>,
}

#[derive(Resource, Default)]
pub struct ExtractedBakedVolumes {
    pub volumes: Vec<ExtractedBakedVolume>,
}

/// Elapsed seconds, used to animate the blend dither pattern.
#[derive(Resource, Default, Clone, Copy)]
pub struct FogFrameTime {
    pub elapsed_seconds: f32,
}

/// Gather the frame's visible lights in a stable order (directional, then
/// point, then spot), pick the main light, and run the classifier.
pub fn extract_fog_lights(
    mut commands: Commands,
    directional: Extract<Query<(&GlobalTransform, &DirectionalLight, Option<&FogLight>)>>,
    point: Extract<Query<(&GlobalTransform, &PointLight, Option<&FogLight>)>>,
    spot: Extract<Query<(&GlobalTransform, &SpotLight, Option<&FogLight>)>>,
) {
    let mut lights = Vec::new();
    let mut main_index = None;
    let mut main_illuminance = f32::MIN;
    let mut main = None;

    for (transform, light, fog) in directional.iter() {
        let color = light.color.to_linear();
        let color = Vec3::new(color.red, color.green, color.blue);
        let direction = *transform.forward();

        // The brightest directional light is the main light.
        if light.illuminance > main_illuminance {
            main_illuminance = light.illuminance;
            main_index = Some(lights.len());
            main = fog.map(|fog| MainFogLight {
                direction,
                fog_color: fog_color(color, light.illuminance, fog),
                shadows_enabled: light.shadows_enabled,
            });
        }

        lights.push(SceneLight {
            kind: SceneLightKind::Directional,
            position: transform.translation(),
            direction,
            color,
            intensity: light.illuminance,
            range: 0.0,
            spot_angles: None,
            fog: fog.cloned(),
        });
    }

    for (transform, light, fog) in point.iter() {
        let color = light.color.to_linear();
        lights.push(SceneLight {
            kind: SceneLightKind::Point,
            position: transform.translation(),
            direction: *transform.forward(),
            color: Vec3::new(color.red, color.green, color.blue),
            intensity: light.intensity,
            range: light.range,
            spot_angles: None,
            fog: fog.cloned(),
        });
    }

    for (transform, light, fog) in spot.iter() {
        let color = light.color.to_linear();
        lights.push(SceneLight {
            kind: SceneLightKind::Spot,
            position: transform.translation(),
            direction: *transform.forward(),
            color: Vec3::new(color.red, color.green, color.blue),
            intensity: light.intensity,
            range: light.range,
            // Component angles are half-angles; the classifier wants full
            // cone angles.
            spot_angles: Some((light.inner_angle * 2.0, light.outer_angle * 2.0)),
            fog: fog.cloned(),
        });
    }

    commands.insert_resource(FogFrameLights {
        main,
        lights: classify_lights(&lights, main_index),
    });
}

/// Extract baked volumes that have a texture to sample.
pub fn extract_baked_volumes(
    mut commands: Commands,
    volumes: Extract<Query<(&GlobalTransform, &BakedVolume)>>,
) {
    let mut extracted = ExtractedBakedVolumes::default();

    for (transform, volume) in volumes.iter() {
        let Some(image) = &volume.buffer else {
            continue;
        };
        extracted.volumes.push(ExtractedBakedVolume {
            world_from_local: transform.to_matrix(),
            bounds_center: volume.bounds_center,
            bounds_size: volume.bounds_size,
            image: image.clone(),
        });
    }

    commands.insert_resource(extracted);
}

/// Extract the frame clock for dither animation.
pub fn extract_fog_time(mut commands: Commands, time: Extract<Res<Time>>) {
    commands.insert_resource(FogFrameTime {
        elapsed_seconds: time.elapsed_secs(),
    });
}
