use std::{sync::Arc, time::Duration};

use tent_view::{
    AmbientEvents, ConfigError, EngineConfig, Environment, EventKind, Phase, Registry, SceneryKind, StyleMode,
    WeatherKind,
    compositor::UniformValue,
    data_structures::scene_graph::NodeRole,
    particles::SpawnVolume,
    registry::{LightningSpec, SceneryConfig, WeatherConfig},
    resources::{ResourceRef, texture::NoAssets},
};

use crate::common::test_utils::{FRAME, ManualAssets, environment, init_logger, run};

mod common;

fn loaded(assets: &ManualAssets, kind: SceneryKind) -> Environment {
    let mut env = environment(assets);
    env.select_scenery(kind);
    assert!(assets.succeed(kind));
    env.tick(FRAME, FRAME);
    assert_eq!(env.phase(), Phase::Ready);
    env
}

fn has_water(env: &Environment) -> bool {
    !env.scene().ids_with_role(NodeRole::Water).is_empty()
}

#[test]
fn last_selected_scenery_wins_when_loads_resolve_in_order() {
    let assets = ManualAssets::new();
    let mut env = environment(&assets);
    env.set_scenery("Lake").unwrap();
    env.set_scenery("Mountains").unwrap();
    assert_eq!(assets.requested(), vec![SceneryKind::Lake, SceneryKind::Mountains]);

    assets.succeed(SceneryKind::Lake);
    env.tick(FRAME, FRAME);
    assert_eq!(env.phase(), Phase::Loading { target: SceneryKind::Mountains });
    assert!(env.terrain().is_empty());
    assert!(!has_water(&env));

    assets.succeed(SceneryKind::Mountains);
    env.tick(FRAME, FRAME * 2);
    assert_eq!(env.phase(), Phase::Ready);
    assert_eq!(env.selection().scenery, Some(SceneryKind::Mountains));
    assert!(!env.terrain().is_empty());
    assert!(!has_water(&env));
}

#[test]
fn last_selected_scenery_wins_when_loads_resolve_reversed() {
    let assets = ManualAssets::new();
    let mut env = environment(&assets);
    env.set_scenery("lake").unwrap();
    env.set_scenery("MOUNTAINS").unwrap();

    assets.succeed(SceneryKind::Mountains);
    env.tick(FRAME, FRAME);
    assert_eq!(env.selection().scenery, Some(SceneryKind::Mountains));

    assets.succeed(SceneryKind::Lake);
    run(&mut env, FRAME, Duration::from_secs(1));
    assert_eq!(env.selection().scenery, Some(SceneryKind::Mountains));
    assert!(!has_water(&env));
}

#[test]
fn previous_scenery_stays_visible_while_loading() {
    let assets = ManualAssets::new();
    let mut env = loaded(&assets, SceneryKind::Lake);
    let lake_nodes = env.terrain().to_vec();

    env.select_scenery(SceneryKind::Desert);
    run(&mut env, FRAME, Duration::from_millis(500));
    assert_eq!(env.phase(), Phase::Loading { target: SceneryKind::Desert });
    assert_eq!(env.terrain(), lake_nodes.as_slice());
    assert!(has_water(&env));

    assets.succeed(SceneryKind::Desert);
    env.tick(FRAME, Duration::from_secs(1));
    assert!(!has_water(&env));
    assert!(lake_nodes.iter().all(|id| !env.scene().contains(*id)));
}

#[test]
fn asset_failure_falls_back_to_a_gradient_sky() {
    let assets = ManualAssets::new();
    let mut env = environment(&assets);
    env.select_scenery(SceneryKind::Forest);
    assets.fail(SceneryKind::Forest);
    env.tick(FRAME, FRAME);

    assert_eq!(env.phase(), Phase::Ready);
    assert_eq!(env.selection().scenery, Some(SceneryKind::Forest));
    let background = env.background().unwrap();
    assert!(background.is_fallback());
    assert_eq!(background.image().dimensions(), (512, 256));
}

#[test]
fn loaded_background_is_decoded() {
    let assets = ManualAssets::new();
    let env = loaded(&assets, SceneryKind::Desert);
    let background = env.background().unwrap();
    assert!(!background.is_fallback());
    assert_eq!(background.image().dimensions(), (16, 8));
}

#[test]
fn engine_without_assets_still_becomes_ready() {
    init_logger();
    let mut env = Environment::new(EngineConfig::default(), Arc::new(Registry::builtin()), Box::new(NoAssets)).unwrap();
    env.select_scenery(SceneryKind::Volcano);
    env.tick(FRAME, FRAME);
    assert_eq!(env.phase(), Phase::Ready);
    assert!(env.background().unwrap().is_fallback());
    assert_eq!(env.scene().ids_with_role(NodeRole::Lava).len(), 1);
}

#[test]
fn an_inverted_particle_volume_is_rejected_up_front() {
    init_logger();
    let mut config = EngineConfig::default().with_weather(WeatherKind::Rain);
    config.particle_volume = SpawnVolume::new([20.0, -2.0, -20.0], [-20.0, 30.0, 20.0]);
    let result = Environment::new(config, Arc::new(Registry::builtin()), Box::new(NoAssets));
    assert!(matches!(
        result,
        Err(ConfigError::InvalidParameter { field: "bounds", .. })
    ));

    let mut flat = EngineConfig::default();
    flat.particle_volume = SpawnVolume::new([-1.0, 5.0, -1.0], [1.0, 5.0, 1.0]);
    assert!(Environment::new(flat, Arc::new(Registry::builtin()), Box::new(NoAssets)).is_err());
}

#[test]
fn unknown_names_are_rejected_without_side_effects() {
    let assets = ManualAssets::new();
    let mut env = environment(&assets);
    let lights = env.scene().len();

    assert_eq!(
        env.set_scenery("Atlantis"),
        Err(ConfigError::UnknownScenery("Atlantis".to_string()))
    );
    assert!(matches!(env.set_weather("Hail"), Err(ConfigError::UnknownWeather(_))));
    assert!(matches!(env.set_style("cubist"), Err(ConfigError::UnknownStyle(_))));
    assert!(matches!(env.trigger_event("dragon"), Err(ConfigError::UnknownEvent(_))));

    assert_eq!(env.phase(), Phase::Idle);
    assert_eq!(env.generation(), 0);
    assert!(assets.requested().is_empty());
    assert_eq!(env.selection().weather, WeatherKind::Clear);
    assert_eq!(env.selection().style, StyleMode::Smooth);
    assert_eq!(env.scene().len(), lights);
}

#[test]
fn switching_rain_to_clear_zeroes_the_rain_overlay() {
    let assets = ManualAssets::new();
    let mut env = environment(&assets);
    env.set_weather("Rain").unwrap();
    assert_eq!(env.compositor().uniform("rain"), Some(UniformValue::Scalar(0.6)));
    assert_eq!(env.precipitation().map(|p| p.len()), Some(1000));

    env.set_weather("Clear").unwrap();
    assert_eq!(env.compositor().uniform("rain"), Some(UniformValue::Scalar(0.0)));
    assert_eq!(env.compositor().to_raw().rain, 0.0);
    assert!(env.precipitation().is_none());
    assert!(env.scene().ids_with_role(NodeRole::Precipitation).is_empty());
}

#[test]
fn precipitation_keeps_its_size_while_ticking() {
    let assets = ManualAssets::new();
    let mut env = environment(&assets);
    env.select_weather(WeatherKind::Snow);
    run(&mut env, Duration::ZERO, Duration::from_secs(20));
    let snow = env.precipitation().unwrap();
    assert_eq!(snow.len(), 500);
    assert!(snow.respawns() > 0);
    let node = env.scene().ids_with_role(NodeRole::Precipitation)[0];
    assert_eq!(env.scene().get(node).unwrap().instance_count(), 500);
}

#[test]
fn weather_overrides_fog_and_lights() {
    let assets = ManualAssets::new();
    let mut env = loaded(&assets, SceneryKind::Lake);
    let lake = env.registry().scenery(SceneryKind::Lake).clone();
    assert_eq!(env.fog().color, lake.fog_color);

    env.select_weather(WeatherKind::Night);
    let night = env.registry().weather(WeatherKind::Night).clone();
    assert_eq!(env.fog().color, night.fog_color.unwrap());
    assert_eq!(env.fog().density, lake.fog_density.max(night.fog_density));

    let frame = env.frame();
    let sun = frame
        .batches
        .lights
        .iter()
        .find(|l| l.light.kind == tent_view::data_structures::scene_graph::LightKind::Sun)
        .unwrap();
    assert_eq!(sun.light.intensity, night.sun_intensity);
}

#[test]
fn style_switch_rebuilds_the_same_scenery() {
    let assets = ManualAssets::new();
    let mut env = loaded(&assets, SceneryKind::Forest);
    env.select_weather(WeatherKind::Snow);

    let terrain = env.scene().ids_with_role(NodeRole::Terrain)[0];
    let surface = match env.scene().get(terrain).unwrap().resources()[0] {
        ResourceRef::Geometry(geometry) => geometry.clone(),
        ResourceRef::Material(_) => panic!("geometry comes first"),
    };
    assert_eq!(env.scene().pool().geometry_refs(&surface), 1);

    env.set_style("voxel").unwrap();
    let selection = env.selection();
    assert_eq!(selection.scenery, Some(SceneryKind::Forest));
    assert_eq!(selection.weather, WeatherKind::Snow);
    assert_eq!(selection.style, StyleMode::Voxelized);
    assert_eq!(env.scene().pool().geometry_refs(&surface), 0);

    let terrains = env.scene().ids_with_role(NodeRole::Terrain);
    assert_eq!(terrains.len(), 1);
    assert!(env.scene().get(terrains[0]).unwrap().instance_count() > 1);
    assert_eq!(env.compositor().uniform("pixel_size"), Some(UniformValue::Scalar(8.0)));
    assert_eq!(env.precipitation().map(|p| p.len()), Some(500));
}

#[test]
fn style_chosen_while_loading_applies_to_the_pending_scenery() {
    let assets = ManualAssets::new();
    let mut env = environment(&assets);
    env.select_scenery(SceneryKind::Desert);
    env.select_style(StyleMode::Voxelized);
    assert!(env.terrain().is_empty());

    assets.succeed(SceneryKind::Desert);
    env.tick(FRAME, FRAME);
    let terrain = env.scene().ids_with_role(NodeRole::Terrain)[0];
    assert!(env.scene().get(terrain).unwrap().instance_count() > 1);
}

#[test]
fn dispose_twice_leaves_nothing_behind() {
    let assets = ManualAssets::new();
    let mut env = loaded(&assets, SceneryKind::Lake);
    env.select_weather(WeatherKind::Storm);
    env.trigger_event("deer").unwrap();
    env.select_scenery(SceneryKind::Volcano);
    run(&mut env, FRAME, Duration::from_secs(1));

    env.dispose();
    assert!(env.is_disposed());
    assert!(env.scene().is_empty());
    assert!(env.scene().pool().is_empty());
    assert!(env.events().active_kinds().is_empty());
    assert_eq!(env.events().cleanup_count(EventKind::Deer), 1);

    env.dispose();
    assert!(env.scene().is_empty());
    assert!(env.scene().pool().is_empty());
}

#[test]
fn commands_and_ticks_after_dispose_do_nothing() {
    let assets = ManualAssets::new();
    let mut env = loaded(&assets, SceneryKind::Lake);
    env.dispose();

    env.select_weather(WeatherKind::Rain);
    env.select_scenery(SceneryKind::Forest);
    env.select_style(StyleMode::Voxelized);
    assert_eq!(env.trigger_random_event(), None);
    assert_eq!(env.trigger_event("ufo_flash"), Ok(false));
    run(&mut env, FRAME, Duration::from_secs(2));

    assert!(env.scene().is_empty());
    assert!(env.precipitation().is_none());
    assert_eq!(assets.requested(), Vec::<SceneryKind>::new());
}

#[test]
fn events_run_once_and_expire() {
    let assets = ManualAssets::new();
    let mut env = environment(&assets);
    assert_eq!(env.trigger_event("ufo_flash"), Ok(true));
    assert_eq!(env.trigger_event("UFO_FLASH"), Ok(false));
    assert_eq!(env.scene().ids_with_role(NodeRole::Event(EventKind::UfoFlash)).len(), 1);

    let now = run(&mut env, Duration::ZERO, Duration::from_millis(4900));
    assert!(env.events().is_active(EventKind::UfoFlash));
    run(&mut env, now, Duration::from_millis(5100));
    assert!(!env.events().is_active(EventKind::UfoFlash));
    assert!(env.scene().ids_with_role(NodeRole::Event(EventKind::UfoFlash)).is_empty());
    assert_eq!(env.events().cleanup_count(EventKind::UfoFlash), 1);
}

#[test]
fn ambient_events_start_after_the_quiet_period() {
    init_logger();
    let ambient = AmbientEvents {
        quiet_period: Duration::from_secs(2),
        chance: 1.0,
        roll_interval: Duration::from_millis(500),
    };
    let mut env = Environment::new(
        EngineConfig::default().with_ambient_events(Some(ambient)),
        Arc::new(Registry::builtin()),
        Box::new(NoAssets),
    )
    .unwrap();
    let now = run(&mut env, Duration::ZERO, Duration::from_millis(1900));
    assert!(env.events().active_kinds().is_empty());
    run(&mut env, now, Duration::from_millis(2600));
    assert_eq!(env.events().active_kinds().len(), 1);
}

fn registry_with_lightning(probability: f32) -> Arc<Registry> {
    let storm = WeatherConfig {
        lightning: Some(LightningSpec {
            probability,
            intensity: 3.0,
            duration: Duration::from_millis(150),
        }),
        ..WeatherConfig::builtin(WeatherKind::Storm)
    };
    let weathers = WeatherKind::ALL
        .into_iter()
        .map(|kind| if kind == WeatherKind::Storm { storm.clone() } else { WeatherConfig::builtin(kind) });
    Arc::new(Registry::new(SceneryKind::ALL.into_iter().map(SceneryConfig::builtin), weathers).unwrap())
}

fn storm(probability: f32) -> Environment {
    init_logger();
    let config = EngineConfig::default()
        .with_ambient_events(None)
        .with_weather(WeatherKind::Storm);
    Environment::new(config, registry_with_lightning(probability), Box::new(NoAssets)).unwrap()
}

#[test]
fn certain_lightning_flashes_on_the_first_interval() {
    let mut env = storm(1.0);
    assert_eq!(env.compositor().state().lightning, 0.0);
    run(&mut env, Duration::ZERO, Duration::from_millis(50));
    assert_eq!(env.compositor().state().lightning, 1.0);
    let flash = env
        .frame()
        .batches
        .lights
        .iter()
        .any(|l| l.light.intensity == 3.0 && l.light.range == 100.0);
    assert!(flash);
}

#[test]
fn a_strike_on_a_slow_frame_survives_the_previous_flash_ending() {
    let mut env = storm(1.0);
    let frame = Duration::from_micros(16_667);
    env.tick(frame, frame);
    env.tick(frame, frame * 2);
    assert_eq!(env.compositor().state().lightning, 1.0);

    // the previous flash ends and a new roll strikes within the same tick
    let slow = Duration::from_millis(200);
    env.tick(slow, frame * 2 + slow);
    assert_eq!(env.compositor().state().lightning, 1.0);
    let flash = env.frame().batches.lights.iter().any(|l| l.light.intensity == 3.0);
    assert!(flash);
}

#[test]
fn impossible_lightning_never_flashes() {
    let mut env = storm(0.0);
    run(&mut env, Duration::ZERO, Duration::from_secs(3));
    assert!(env.has_lightning());
    assert_eq!(env.compositor().state().lightning, 0.0);

    env.select_weather(WeatherKind::Clear);
    assert!(!env.has_lightning());
}

#[test]
fn frame_exposes_batches_fog_and_background() {
    let assets = ManualAssets::new();
    let mut env = loaded(&assets, SceneryKind::Lake);
    env.select_weather(WeatherKind::Rain);
    env.resize(800, 400);
    run(&mut env, FRAME, Duration::from_millis(200));

    let frame = env.frame();
    assert_eq!(frame.batches.surfaces.len(), 1);
    // water tiles, rain drops and embers
    assert_eq!(frame.batches.transparent.len(), 3);
    assert!(frame.background.is_some());
    assert_eq!(frame.uniforms.aspect, 2.0);
    assert_eq!(frame.uniforms.resolution, [800.0, 400.0]);
    assert!(frame.uniforms.time > 0.0);
}
