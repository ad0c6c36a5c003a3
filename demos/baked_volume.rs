//! Baked fog volumes: press Space to bake, S to save the result, L to load
//! a previously saved bake back into the volume.
//!
//! Run with `cargo run --example baked_volume`.

use bevy::prelude::*;
use bevy::render::render_resource::TextureUsages;
use vapor_core::volumetrics::bake::volume_image;
use vapor_core::{
    load_volume, save_volume, BakeVolumes, BakedLight, BakedVolume, FogQuality, IndirectProbes,
    SampleAggregation, SampleShape, UniformRadianceField, VolumetricsCamera, VolumetricsPlugin,
    VolumetricsProfile,
};

const SAVE_PATH: &str = "baked_fog.vapor";

fn main() {
    App::new()
        .add_plugins(DefaultPlugins)
        .add_plugins(VolumetricsPlugin)
        .insert_resource(ClearColor(Color::srgb(0.01, 0.01, 0.02)))
        .insert_resource(VolumetricsProfile {
            realtime_density: 0.0,
            baked_density: 1.0,
        })
        .insert_resource(IndirectProbes {
            field: Box::new(UniformRadianceField::ambient(Vec3::new(0.05, 0.06, 0.09))),
        })
        .add_systems(Startup, setup)
        .add_systems(Update, bake_controls)
        .run();
}

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    commands.spawn((
        Camera3d {
            depth_texture_usages: (TextureUsages::RENDER_ATTACHMENT
                | TextureUsages::TEXTURE_BINDING)
                .into(),
            ..default()
        },
        bevy::render::view::Hdr,
        Transform::from_xyz(0.0, 8.0, 20.0).looking_at(Vec3::new(0.0, 2.0, 0.0), Vec3::Y),
        VolumetricsCamera {
            resolution: 128,
            quality: FogQuality::Medium,
            far: 60.0,
            ..default()
        },
    ));

    commands.spawn((
        BakedVolume {
            bounds_size: Vec3::new(24.0, 8.0, 24.0),
            resolution: UVec3::new(48, 16, 48),
            shape: SampleShape::AxesAndDiagonals,
            aggregation: SampleAggregation::Mean,
            ..default()
        },
        Transform::from_xyz(0.0, 4.0, 0.0),
    ));

    // Static lights feeding the bake. These are bake inputs only and do not
    // light the scene at runtime.
    commands.spawn((
        BakedLight {
            color: Color::srgb(1.0, 0.6, 0.2),
            intensity: 3.0,
            range: 12.0,
            ..default()
        },
        Transform::from_xyz(-6.0, 3.0, 0.0),
    ));
    commands.spawn((
        BakedLight {
            color: Color::srgb(0.3, 0.5, 1.0),
            intensity: 2.0,
            range: 10.0,
            spot_angles: Some((0.5, 0.9)),
            ..default()
        },
        Transform::from_xyz(6.0, 6.0, 0.0).looking_at(Vec3::new(6.0, 0.0, 0.0), Vec3::Z),
    ));

    commands.spawn((
        DirectionalLight {
            illuminance: 2_000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(10.0, 20.0, 10.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));

    let floor = meshes.add(Plane3d::default().mesh().size(40.0, 40.0));
    let floor_mat = materials.add(StandardMaterial {
        base_color: Color::srgb(0.2, 0.2, 0.22),
        perceptual_roughness: 0.9,
        ..default()
    });
    commands.spawn((Mesh3d(floor), MeshMaterial3d(floor_mat)));
}

fn bake_controls(
    keys: Res<ButtonInput<KeyCode>>,
    mut bake_requests: MessageWriter<BakeVolumes>,
    mut volumes: Query<&mut BakedVolume>,
    mut images: ResMut<Assets<Image>>,
) {
    if keys.just_pressed(KeyCode::Space) {
        info!("baking all volumes");
        bake_requests.write(BakeVolumes::all());
    }

    if keys.just_pressed(KeyCode::KeyS) {
        for volume in &volumes {
            let Some(handle) = &volume.buffer else {
                warn!("nothing baked yet, press Space first");
                continue;
            };
            let Some(image) = images.get(handle) else {
                warn!("baked image asset is gone, cannot save");
                continue;
            };
            let Some(data) = image_to_volume_data(image) else {
                warn!("baked image has no CPU texel data, cannot save");
                continue;
            };
            match save_volume(&data, SAVE_PATH) {
                Ok(()) => info!("saved bake to {SAVE_PATH}"),
                Err(err) => error!("save failed: {err}"),
            }
        }
    }

    if keys.just_pressed(KeyCode::KeyL) {
        let data = match load_volume(SAVE_PATH) {
            Ok(data) => data,
            Err(err) => {
                error!("load failed: {err}");
                return;
            }
        };
        for mut volume in &mut volumes {
            volume.buffer = Some(images.add(volume_image(&data)));
            info!("loaded bake from {SAVE_PATH}");
        }
    }
}

fn image_to_volume_data(image: &Image) -> Option<vapor_core::BakedVolumeData> {
    let size = image.texture_descriptor.size;
    let mut data =
        vapor_core::BakedVolumeData::cleared(size.width, size.height, size.depth_or_array_layers);
    let bytes = image.data.as_ref()?;
    data.texels
        .copy_from_slice(bytemuck::cast_slice(bytes.as_slice()));
    Some(data)
}
