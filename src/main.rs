use bevy::prelude::*;
use bevy::render::render_resource::TextureUsages;
use vapor_core::{FogLight, FogQuality, VolumetricsCamera, VolumetricsPlugin, VolumetricsProfile};

fn main() {
    App::new()
        .add_plugins(DefaultPlugins)
        .add_plugins(VolumetricsPlugin)
        .insert_resource(ClearColor(Color::srgb(0.02, 0.02, 0.04)))
        .insert_resource(VolumetricsProfile {
            realtime_density: 0.6,
            baked_density: 1.0,
        })
        .add_systems(Startup, setup)
        .add_systems(Update, orbit_light)
        .run();
}

fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    // The fog pass samples the camera's depth texture, so the depth
    // attachment must also be bindable.
    commands.spawn((
        Camera3d {
            depth_texture_usages: (TextureUsages::RENDER_ATTACHMENT
                | TextureUsages::TEXTURE_BINDING)
                .into(),
            ..default()
        },
        bevy::render::view::Hdr,
        Transform::from_xyz(0.0, 6.0, 18.0).looking_at(Vec3::ZERO, Vec3::Y),
        VolumetricsCamera {
            resolution: 128,
            quality: FogQuality::Medium,
            far: 60.0,
            ..default()
        },
    ));

    commands.spawn((
        DirectionalLight {
            color: Color::srgb(1.0, 0.95, 0.85),
            illuminance: 8_000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(10.0, 20.0, 10.0).looking_at(Vec3::ZERO, Vec3::Y),
        FogLight {
            fog_intensity: 0.4,
            sync_intensity: false,
        },
    ));

    commands.spawn((
        PointLight {
            color: Color::srgb(0.4, 0.6, 1.0),
            intensity: 40_000.0,
            range: 14.0,
            ..default()
        },
        Transform::from_xyz(-5.0, 3.0, 0.0),
        FogLight {
            fog_intensity: 1.2,
            sync_intensity: false,
        },
        Orbiting {
            radius: 6.0,
            speed: 0.4,
        },
    ));

    let floor = meshes.add(Plane3d::default().mesh().size(40.0, 40.0));
    let floor_mat = materials.add(StandardMaterial {
        base_color: Color::srgb(0.25, 0.25, 0.28),
        perceptual_roughness: 0.9,
        ..default()
    });
    commands.spawn((Mesh3d(floor), MeshMaterial3d(floor_mat)));

    let pillar = meshes.add(Cuboid::new(1.5, 6.0, 1.5));
    let pillar_mat = materials.add(StandardMaterial {
        base_color: Color::srgb(0.4, 0.38, 0.35),
        ..default()
    });
    for x in [-6.0, 0.0, 6.0] {
        for z in [-6.0, 0.0, 6.0] {
            commands.spawn((
                Mesh3d(pillar.clone()),
                MeshMaterial3d(pillar_mat.clone()),
                Transform::from_xyz(x, 3.0, z),
            ));
        }
    }
}

#[derive(Component)]
struct Orbiting {
    radius: f32,
    speed: f32,
}

fn orbit_light(time: Res<Time>, mut lights: Query<(&Orbiting, &mut Transform)>) {
    for (orbit, mut transform) in &mut lights {
        let angle = time.elapsed_secs() * orbit.speed;
        transform.translation.x = angle.cos() * orbit.radius;
        transform.translation.z = angle.sin() * orbit.radius;
    }
}
