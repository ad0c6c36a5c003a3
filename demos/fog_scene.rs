//! Realtime fog with several colored lights sweeping through the grid.
//!
//! Run with `cargo run --example fog_scene`.

use bevy::prelude::*;
use bevy::render::render_resource::TextureUsages;
use vapor_core::{FogLight, FogQuality, VolumetricsCamera, VolumetricsPlugin, VolumetricsProfile};

fn main() {
    App::new()
        .add_plugins(DefaultPlugins)
        .add_plugins(VolumetricsPlugin)
        .insert_resource(ClearColor(Color::srgb(0.01, 0.01, 0.02)))
        .insert_resource(VolumetricsProfile {
            realtime_density: 1.0,
            baked_density: 0.0,
        })
        .add_systems(Startup, setup)
        .add_systems(Update, (sweep_spots, adjust_density))
        .run();
}

#[derive(Component)]
struct Sweeping {
    phase: f32,
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
        Transform::from_xyz(0.0, 10.0, 24.0).looking_at(Vec3::new(0.0, 2.0, 0.0), Vec3::Y),
        VolumetricsCamera {
            resolution: 160,
            quality: FogQuality::High,
            far: 80.0,
            ..default()
        },
    ));

    // Dim moonlight so the spot beams dominate.
    commands.spawn((
        DirectionalLight {
            color: Color::srgb(0.6, 0.7, 1.0),
            illuminance: 400.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(-10.0, 30.0, -10.0).looking_at(Vec3::ZERO, Vec3::Y),
        FogLight {
            fog_intensity: 0.1,
            sync_intensity: false,
        },
    ));

    let colors = [
        Color::srgb(1.0, 0.3, 0.2),
        Color::srgb(0.2, 1.0, 0.4),
        Color::srgb(0.3, 0.4, 1.0),
        Color::srgb(1.0, 0.9, 0.3),
    ];
    for (i, color) in colors.into_iter().enumerate() {
        commands.spawn((
            SpotLight {
                color,
                intensity: 400_000.0,
                range: 30.0,
                inner_angle: 0.3,
                outer_angle: 0.5,
                ..default()
            },
            Transform::from_xyz(-9.0 + 6.0 * i as f32, 12.0, 0.0)
                .looking_at(Vec3::new(-9.0 + 6.0 * i as f32, 0.0, 0.0), Vec3::Z),
            FogLight {
                fog_intensity: 2.0,
                sync_intensity: false,
            },
            Sweeping {
                phase: i as f32 * 0.7,
            },
        ));
    }

    let floor = meshes.add(Plane3d::default().mesh().size(60.0, 60.0));
    let floor_mat = materials.add(StandardMaterial {
        base_color: Color::srgb(0.15, 0.15, 0.17),
        perceptual_roughness: 0.95,
        ..default()
    });
    commands.spawn((Mesh3d(floor), MeshMaterial3d(floor_mat)));

    let block = meshes.add(Cuboid::new(2.0, 2.0, 2.0));
    let block_mat = materials.add(StandardMaterial {
        base_color: Color::srgb(0.3, 0.3, 0.32),
        ..default()
    });
    for i in 0..6 {
        let angle = i as f32 * std::f32::consts::TAU / 6.0;
        commands.spawn((
            Mesh3d(block.clone()),
            MeshMaterial3d(block_mat.clone()),
            Transform::from_xyz(angle.cos() * 8.0, 1.0, angle.sin() * 8.0),
        ));
    }
}

fn sweep_spots(time: Res<Time>, mut spots: Query<(&Sweeping, &mut Transform), With<SpotLight>>) {
    for (sweep, mut transform) in &mut spots {
        let t = time.elapsed_secs() * 0.6 + sweep.phase;
        let target = Vec3::new(
            transform.translation.x + t.sin() * 4.0,
            0.0,
            t.cos() * 4.0,
        );
        transform.look_at(target, Vec3::Z);
    }
}

fn adjust_density(keys: Res<ButtonInput<KeyCode>>, mut profile: ResMut<VolumetricsProfile>) {
    if keys.just_pressed(KeyCode::ArrowUp) {
        profile.realtime_density = (profile.realtime_density + 0.1).min(4.0);
        info!("realtime density: {:.1}", profile.realtime_density);
    }
    if keys.just_pressed(KeyCode::ArrowDown) {
        profile.realtime_density = (profile.realtime_density - 0.1).max(0.0);
        info!("realtime density: {:.1}", profile.realtime_density);
    }
}
