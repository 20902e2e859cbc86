use tent_view::{
    Registry, WeatherKind,
    particles::{ParticleField, SpawnVolume},
    registry::ParticleSpec,
};

fn precipitation(kind: WeatherKind) -> ParticleSpec {
    Registry::builtin().weather(kind).particles.unwrap()
}

#[test]
fn stepping_never_changes_the_particle_count() {
    for kind in [WeatherKind::Rain, WeatherKind::Snow, WeatherKind::Storm] {
        let spec = precipitation(kind);
        let mut field = ParticleField::spawn(&spec, SpawnVolume::default(), 77);
        assert_eq!(field.len(), spec.count);
        for step in 0..2000 {
            // uneven frame times, including a long stall
            let dt = if step == 1000 { 2.5 } else { 1.0 / (30.0 + (step % 90) as f32) };
            field.step(dt);
            assert_eq!(field.len(), spec.count);
        }
        assert_eq!(field.capacity(), spec.count);
        assert!(field.respawns() > 0, "{kind} never recycled a particle");
    }
}

#[test]
fn falling_particles_stay_inside_the_volume() {
    let volume = SpawnVolume::default();
    let mut field = ParticleField::spawn(&precipitation(WeatherKind::Storm), volume, 3);
    for _ in 0..600 {
        field.step(1.0 / 60.0);
        assert!(field.positions().all(|p| p.y <= volume.max[1]));
        assert!(field.positions().all(|p| (volume.min[0]..=volume.max[0]).contains(&p.x)));
        assert!(field.positions().all(|p| (volume.min[2]..=volume.max[2]).contains(&p.z)));
    }
}

#[test]
fn recycled_particles_restart_at_the_top() {
    let volume = SpawnVolume::new([-1.0, 0.0, -1.0], [1.0, 4.0, 1.0]);
    let spec = ParticleSpec {
        count: 10,
        size: 0.05,
        color: [1.0; 3],
        fall_speed: 10.0,
        opacity: 1.0,
        drift: 0.0,
    };
    let mut field = ParticleField::spawn(&spec, volume, 11);
    // at least 8 units per second, so every particle drops out of the 4 unit volume
    field.step(1.0);
    assert_eq!(field.respawns(), 10);
    assert!(field.positions().all(|p| p.y == volume.max[1]));
}

#[test]
fn disposed_field_is_empty_and_inert() {
    let mut field = ParticleField::spawn(&precipitation(WeatherKind::Rain), SpawnVolume::default(), 1);
    field.dispose();
    assert!(field.is_disposed());
    assert!(field.is_empty());
    field.step(1.0);
    field.dispose();
    assert_eq!(field.len(), 0);
    assert_eq!(field.respawns(), 0);
}

#[test]
fn volumes_must_span_every_axis() {
    assert!(SpawnVolume::default().validate().is_ok());
    assert!(SpawnVolume::new([0.0; 3], [1.0; 3]).validate().is_ok());
    assert!(SpawnVolume::new([1.0, 0.0, 0.0], [0.0, 1.0, 1.0]).validate().is_err());
    assert!(SpawnVolume::new([0.0; 3], [1.0, 1.0, 0.0]).validate().is_err());
    assert!(SpawnVolume::new([f32::NAN, 0.0, 0.0], [1.0; 3]).validate().is_err());
}
