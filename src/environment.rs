//! The environment state machine.
//!
//! [`Environment`] owns the scene root and everything that mutates it. Hosts
//! send commands (`set_scenery`, `set_weather`, `set_style`, event triggers),
//! call [`Environment::tick`] once per frame and read [`Environment::frame`]
//! to draw.
//!
//! Scenery switches are asynchronous: the background image is requested from
//! the [`AssetProvider`] and the terrain is only swapped once that request
//! settles, so frames keep showing the previous scenery meanwhile. Results of
//! outdated requests are dropped, the last selected scenery always wins.
//!
//! Nothing runs outside of `tick`. Asset results and timer firings become
//! [`Message`]s that are applied at the start of a tick, before particles,
//! events, ambient animation and finally the compositor uniforms are updated.
//!
//! # Key types
//!
//! - [`Environment`] the state machine
//! - [`Phase`] `Idle`, `Loading` or `Ready`
//! - [`Selection`] the current scenery, weather and style
//! - [`Frame`] everything the renderer needs for one frame

use std::{sync::Arc, time::Duration};

use futures::{
    FutureExt, StreamExt,
    future::LocalBoxFuture,
    stream::FuturesUnordered,
};
use log::{debug, error, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{
    clock::{TimerId, TimerQueue},
    compositor::{Compositor, CompositorUniform},
    config::EngineConfig,
    data_structures::{
        instance::Instance,
        scene_graph::{InstancedNode, LightKind, LightNode, NodeId, NodeRole, PointLight, SceneRoot},
    },
    error::ConfigError,
    events::{EventKind, EventScheduler, Expiry},
    height::HeightField,
    particles::{ParticleField, SpawnVolume},
    registry::{
        LightningSpec, ParticleSpec, Registry, Rgb, SceneryConfig, SceneryKind, StyleMode, WeatherKind, rgb,
    },
    render::RenderBatches,
    resources::{
        Geometry, Material,
        mesh::MeshBuilder,
        texture::{AssetProvider, Background, SKY_BOTTOM, SKY_EXPONENT, SKY_TOP, decode_background, gradient_sky},
    },
};

const SUN_COLOR: Rgb = rgb(0xffd2a1);
const SUN_POSITION: [f32; 3] = [-10.0, 8.0, -5.0];
const AMBIENT_COLOR: Rgb = rgb(0x404080);
const TENT_LIGHT_COLOR: Rgb = rgb(0xffe4b5);
const TENT_LIGHT_POSITION: [f32; 3] = [0.0, 2.0, -1.0];
const CAMPFIRE_COLOR: Rgb = rgb(0xff6600);
const CAMPFIRE_POSITION: [f32; 3] = [0.0, -0.5, -2.0];
const LIGHTNING_POSITION: [f32; 3] = [0.0, 20.0, -10.0];
const LAVA_LIGHT_POSITION: [f32; 3] = [0.0, -2.0, -5.0];
const DEFAULT_FOG: Rgb = rgb(0xcccccc);
const WATER_BOB: f32 = 0.03;

const EMBERS: ParticleSpec = ParticleSpec {
    count: 100,
    size: 0.1,
    color: CAMPFIRE_COLOR,
    fall_speed: -1.5,
    opacity: 0.9,
    drift: 0.2,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No scenery was ever selected.
    Idle,
    /// A scenery switch waits for its background.
    Loading { target: SceneryKind },
    Ready,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    /// The scenery on screen, `None` until the first load completed.
    pub scenery: Option<SceneryKind>,
    pub weather: WeatherKind,
    pub style: StyleMode,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fog {
    pub color: Rgb,
    pub density: f32,
}

/// Work produced outside of `tick` and applied at its start.
#[derive(Debug)]
pub enum Message {
    BackgroundLoaded {
        generation: u64,
        scenery: SceneryKind,
        background: Background,
    },
    EventExpired(Expiry),
    LightningRoll,
    /// Carries the timer that fired, a newer strike may have replaced it.
    LightningEnd(TimerId),
    AmbientEventRoll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Timer {
    LightningRoll,
    LightningEnd,
    AmbientEventRoll,
}

/// What the renderer reads after a tick.
pub struct Frame<'a> {
    pub batches: RenderBatches<'a>,
    pub uniforms: CompositorUniform,
    pub fog: Fog,
    pub background: Option<&'a Background>,
}

struct ParticleNode {
    field: ParticleField,
    node: NodeId,
}

struct Lightning {
    spec: LightningSpec,
    light: NodeId,
    roll: Option<TimerId>,
    end: Option<TimerId>,
}

struct Water {
    node: NodeId,
    base: Vec<f32>,
}

#[derive(Default)]
struct Lights {
    sun: Option<NodeId>,
    ambient: Option<NodeId>,
    tent: Option<NodeId>,
    campfire: Option<NodeId>,
    lava: Option<NodeId>,
}

pub struct Environment {
    registry: Arc<Registry>,
    config: EngineConfig,
    assets: Box<dyn AssetProvider>,
    field: HeightField,
    scene: SceneRoot,
    compositor: Compositor,
    events: EventScheduler,
    timers: TimerQueue<Timer>,
    loads: FuturesUnordered<LocalBoxFuture<'static, Message>>,
    rng: ChaCha8Rng,

    phase: Phase,
    selection: Selection,
    generation: u64,
    terrain: Vec<NodeId>,
    water: Option<Water>,
    background: Option<Background>,
    fog: Fog,
    lights: Lights,
    precipitation: Option<ParticleNode>,
    embers: Option<ParticleNode>,
    lightning: Option<Lightning>,
    last_event: Duration,
    now: Duration,
    disposed: bool,
}

fn point_light(kind: LightKind, color: Rgb, intensity: f32, range: f32) -> PointLight {
    PointLight {
        kind,
        color,
        intensity,
        range,
    }
}

fn particle_node(role: NodeRole, field: &ParticleField, emissive: bool) -> InstancedNode {
    let spec = field.spec();
    let mut material = Material::solid(spec.color).with_opacity(spec.opacity);
    if emissive {
        material = material.with_emissive(1.0);
    }
    let locals = field.positions().map(|p| Instance::at(p.x, p.y, p.z)).collect();
    InstancedNode::with_capacity(role, Geometry::Point { size: spec.size }, material, locals, field.capacity())
}

fn sync_particles(scene: &mut SceneRoot, particles: &ParticleNode) {
    if let Some(node) = scene.get_mut(particles.node) {
        let positions = particles.field.particles();
        node.set_local_transform_all(&mut |i, instance| {
            if let Some(particle) = positions.get(i) {
                instance.position = particle.position;
            }
        });
    }
}

fn set_intensity(scene: &mut SceneRoot, id: Option<NodeId>, intensity: f32) {
    if let Some(light) = id.and_then(|id| scene.light_mut(id)) {
        light.intensity = intensity;
    }
}

impl Environment {
    /// Fails if `config` is invalid, before anything is attached.
    pub fn new(
        config: EngineConfig,
        registry: Arc<Registry>,
        assets: Box<dyn AssetProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut compositor = Compositor::new(config.viewport, config.seed as u32);
        compositor.set_style(config.initial_style, config.voxel_pixel_size);
        let mut env = Self {
            field: HeightField::new(config.seed as u32),
            scene: SceneRoot::new(),
            compositor,
            events: EventScheduler::new(config.sub_seed(1)),
            timers: TimerQueue::new(),
            loads: FuturesUnordered::new(),
            rng: ChaCha8Rng::seed_from_u64(config.sub_seed(2)),
            phase: Phase::Idle,
            selection: Selection {
                scenery: None,
                weather: config.initial_weather,
                style: config.initial_style,
            },
            generation: 0,
            terrain: Vec::new(),
            water: None,
            background: None,
            fog: Fog {
                color: DEFAULT_FOG,
                density: 0.0,
            },
            lights: Lights::default(),
            precipitation: None,
            embers: None,
            lightning: None,
            last_event: Duration::ZERO,
            now: Duration::ZERO,
            disposed: false,
            registry,
            config,
            assets,
        };
        env.setup_lights();
        if let Some(ambient) = env.config.ambient_events {
            env.timers.arm(ambient.roll_interval, Timer::AmbientEventRoll);
        }
        env.apply_weather(env.selection.weather);
        Ok(env)
    }

    fn setup_lights(&mut self) {
        self.lights.sun = Some(self.scene.attach(Box::new(LightNode::new(
            point_light(LightKind::Sun, SUN_COLOR, 2.0, 0.0),
            SUN_POSITION,
        ))));
        self.lights.ambient = Some(self.scene.attach(Box::new(LightNode::new(
            point_light(LightKind::Ambient, AMBIENT_COLOR, 0.5, 0.0),
            [0.0; 3],
        ))));
        self.lights.tent = Some(self.scene.attach(Box::new(LightNode::new(
            point_light(LightKind::Point, TENT_LIGHT_COLOR, 0.5, 5.0),
            TENT_LIGHT_POSITION,
        ))));
        if self.config.campfire {
            self.lights.campfire = Some(self.scene.attach(Box::new(LightNode::new(
                point_light(LightKind::Point, CAMPFIRE_COLOR, 2.0, 10.0),
                CAMPFIRE_POSITION,
            ))));
            let [x, y, z] = CAMPFIRE_POSITION;
            let volume = SpawnVolume::new([x - 0.5, y - 0.5, z - 0.5], [x + 0.5, y + 1.5, z + 0.5]);
            let field = ParticleField::spawn(&EMBERS, volume, self.config.sub_seed(3));
            let node = self.scene.attach(Box::new(particle_node(NodeRole::Embers, &field, true)));
            self.embers = Some(ParticleNode { field, node });
        }
    }

    /// Select a scenery by name. Unknown names are rejected without touching any state.
    pub fn set_scenery(&mut self, name: &str) -> Result<(), ConfigError> {
        match name.parse::<SceneryKind>() {
            Ok(kind) => {
                self.select_scenery(kind);
                Ok(())
            }
            Err(e) => {
                warn!("Ignoring scenery command: {e}");
                Err(e)
            }
        }
    }

    /// Start switching to `kind`. The terrain is swapped once the background request settles.
    pub fn select_scenery(&mut self, kind: SceneryKind) {
        if self.disposed {
            debug!("environment is disposed, ignoring scenery {kind}");
            return;
        }
        self.generation += 1;
        self.phase = Phase::Loading { target: kind };
        // Outdated requests are dropped here; their results would be discarded anyway.
        self.loads = FuturesUnordered::new();

        let generation = self.generation;
        let [width, height] = self.config.sky_resolution;
        let fetch = self.assets.fetch_background(kind);
        self.loads.push(
            async move {
                let background = match fetch.await.and_then(|bytes| decode_background(&bytes)) {
                    Ok(image) => Background::Image(image),
                    Err(e) => {
                        warn!("No background for {kind}, using a gradient sky: {e:#}");
                        Background::GradientSky(gradient_sky(width, height, SKY_TOP, SKY_BOTTOM, SKY_EXPONENT))
                    }
                };
                Message::BackgroundLoaded {
                    generation,
                    scenery: kind,
                    background,
                }
            }
            .boxed_local(),
        );
        info!("loading scenery {kind} (generation {generation})");
    }

    pub fn set_weather(&mut self, name: &str) -> Result<(), ConfigError> {
        match name.parse::<WeatherKind>() {
            Ok(kind) => {
                self.select_weather(kind);
                Ok(())
            }
            Err(e) => {
                warn!("Ignoring weather command: {e}");
                Err(e)
            }
        }
    }

    /// Replace lights, fog, precipitation, lightning and overlays right away.
    pub fn select_weather(&mut self, kind: WeatherKind) {
        if self.disposed {
            debug!("environment is disposed, ignoring weather {kind}");
            return;
        }
        self.apply_weather(kind);
        info!("weather is now {kind}");
    }

    fn apply_weather(&mut self, kind: WeatherKind) {
        let registry = Arc::clone(&self.registry);
        let weather = registry.weather(kind);
        self.selection.weather = kind;

        set_intensity(&mut self.scene, self.lights.sun, weather.sun_intensity);
        set_intensity(&mut self.scene, self.lights.ambient, weather.ambient_intensity);
        self.update_fog();

        if let Some(old) = self.precipitation.take() {
            self.scene.detach(old.node);
        }
        if let Some(spec) = &weather.particles {
            let field = ParticleField::spawn(spec, self.config.particle_volume, self.rng.r#gen());
            let node = self.scene.attach(Box::new(particle_node(NodeRole::Precipitation, &field, false)));
            self.precipitation = Some(ParticleNode { field, node });
        }

        match weather.lightning {
            Some(spec) => {
                if let Some(lightning) = self.lightning.as_mut() {
                    lightning.spec = spec;
                } else {
                    let light = self.scene.attach(Box::new(LightNode::new(
                        point_light(LightKind::Point, [1.0; 3], 0.0, 100.0),
                        LIGHTNING_POSITION,
                    )));
                    let roll = self.timers.arm(self.now + self.config.lightning_interval, Timer::LightningRoll);
                    self.lightning = Some(Lightning {
                        spec,
                        light,
                        roll: Some(roll),
                        end: None,
                    });
                }
            }
            None => self.remove_lightning(),
        }

        self.compositor.set_weather(weather);
    }

    fn remove_lightning(&mut self) {
        if let Some(lightning) = self.lightning.take() {
            for timer in [lightning.roll, lightning.end].into_iter().flatten() {
                self.timers.cancel(timer);
            }
            self.scene.detach(lightning.light);
        }
        self.compositor.set_lightning(0.0);
    }

    fn update_fog(&mut self) {
        let weather = self.registry.weather(self.selection.weather);
        let scenery = self.selection.scenery.map(|kind| self.registry.scenery(kind));
        let base_color = scenery.map_or(DEFAULT_FOG, |s| s.fog_color);
        let base_density = scenery.map_or(0.0, |s| s.fog_density);
        self.fog = Fog {
            color: weather.fog_color.unwrap_or(base_color),
            density: base_density.max(weather.fog_density),
        };
    }

    pub fn set_style(&mut self, name: &str) -> Result<(), ConfigError> {
        match name.parse::<StyleMode>() {
            Ok(mode) => {
                self.select_style(mode);
                Ok(())
            }
            Err(e) => {
                warn!("Ignoring style command: {e}");
                Err(e)
            }
        }
    }

    /// Switch the rendering style. A loaded scenery is rebuilt right away, a pending one
    /// picks the new style up when its background arrives.
    pub fn select_style(&mut self, mode: StyleMode) {
        if self.disposed {
            debug!("environment is disposed, ignoring style {mode}");
            return;
        }
        self.selection.style = mode;
        self.compositor.set_style(mode, self.config.voxel_pixel_size);
        if let (Phase::Ready, Some(kind)) = (self.phase, self.selection.scenery) {
            let registry = Arc::clone(&self.registry);
            self.rebuild(registry.scenery(kind));
        }
        info!("style is now {mode}");
    }

    /// Start a random event. Returns the kind if one started.
    pub fn trigger_random_event(&mut self) -> Option<EventKind> {
        if self.disposed {
            return None;
        }
        let started = self.events.trigger_random(self.now, &mut self.scene);
        if started.is_some() {
            self.last_event = self.now;
        }
        started
    }

    /// Start the named event. `Ok(false)` means it was already running.
    pub fn trigger_event(&mut self, name: &str) -> Result<bool, ConfigError> {
        let kind = name.parse::<EventKind>().inspect_err(|e| warn!("Ignoring event command: {e}"))?;
        if self.disposed {
            return Ok(false);
        }
        let started = self.events.trigger(kind, self.now, &mut self.scene);
        if started {
            self.last_event = self.now;
        }
        Ok(started)
    }

    /// Advance the environment to `now`, `dt` after the previous tick.
    pub fn tick(&mut self, dt: Duration, now: Duration) {
        if self.disposed {
            return;
        }
        self.now = now;

        for message in self.drain_messages(now) {
            self.handle(message);
        }

        let seconds = dt.as_secs_f32();
        for particles in [self.precipitation.as_mut(), self.embers.as_mut()].into_iter().flatten() {
            particles.field.step(seconds);
            sync_particles(&mut self.scene, particles);
        }

        self.events.animate(now, dt, &mut self.scene);
        self.animate_ambient(now.as_secs_f32());

        self.compositor.set_time(now);
        self.scene.update_world_transforms();
    }

    fn drain_messages(&mut self, now: Duration) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(Some(message)) = self.loads.next().now_or_never() {
            messages.push(message);
        }
        messages.extend(self.events.take_due(now).into_iter().map(Message::EventExpired));
        messages.extend(self.timers.take_due(now).into_iter().map(|(id, timer)| match timer {
            Timer::LightningRoll => Message::LightningRoll,
            Timer::LightningEnd => Message::LightningEnd(id),
            Timer::AmbientEventRoll => Message::AmbientEventRoll,
        }));
        messages
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::BackgroundLoaded {
                generation,
                scenery,
                background,
            } => {
                if generation != self.generation || self.phase != (Phase::Loading { target: scenery }) {
                    debug!("dropping outdated background for {scenery} (generation {generation})");
                    return;
                }
                let registry = Arc::clone(&self.registry);
                if self.rebuild(registry.scenery(scenery)) {
                    self.background = Some(background);
                    self.selection.scenery = Some(scenery);
                    self.update_fog();
                    self.phase = Phase::Ready;
                    info!("scenery {scenery} is ready");
                } else {
                    self.phase = if self.selection.scenery.is_some() { Phase::Ready } else { Phase::Idle };
                }
            }
            Message::EventExpired(expiry) => {
                self.events.expire(expiry, &mut self.scene);
            }
            Message::LightningRoll => self.roll_lightning(),
            Message::LightningEnd(id) => {
                let Some(lightning) = self.lightning.as_mut() else {
                    return;
                };
                if lightning.end != Some(id) {
                    debug!("ignoring the end of a replaced lightning strike");
                    return;
                }
                lightning.end = None;
                let light = lightning.light;
                set_intensity(&mut self.scene, Some(light), 0.0);
                self.compositor.set_lightning(0.0);
            }
            Message::AmbientEventRoll => self.roll_ambient_event(),
        }
    }

    /// One roll per interval. The next roll is armed relative to now, so intervals missed
    /// during a stall are skipped instead of replayed.
    fn roll_lightning(&mut self) {
        let Some(lightning) = self.lightning.as_mut() else {
            return;
        };
        if self.rng.r#gen::<f32>() < lightning.spec.probability {
            if let Some(end) = lightning.end.take() {
                self.timers.cancel(end);
            }
            lightning.end = Some(self.timers.arm(self.now + lightning.spec.duration, Timer::LightningEnd));
            let (light, intensity) = (lightning.light, lightning.spec.intensity);
            set_intensity(&mut self.scene, Some(light), intensity);
            self.compositor.set_lightning(1.0);
            debug!("lightning strike");
        }
        let roll = self.timers.arm(self.now + self.config.lightning_interval, Timer::LightningRoll);
        if let Some(lightning) = self.lightning.as_mut() {
            lightning.roll = Some(roll);
        }
    }

    fn roll_ambient_event(&mut self) {
        let Some(ambient) = self.config.ambient_events else {
            return;
        };
        let quiet = self.now.saturating_sub(self.last_event) >= ambient.quiet_period;
        if quiet && self.rng.r#gen::<f32>() < ambient.chance {
            self.trigger_random_event();
        }
        self.timers.arm(self.now + ambient.roll_interval, Timer::AmbientEventRoll);
    }

    /// Build `config` under the current style and swap it in. Returns false if nothing changed.
    fn rebuild(&mut self, config: &SceneryConfig) -> bool {
        let instance = match MeshBuilder::new(&self.field).build_terrain(config, self.selection.style) {
            Ok(instance) => instance,
            Err(e) => {
                error!("Could not build {}: {e}", config.kind);
                return false;
            }
        };

        let mut attached: Vec<NodeId> = instance
            .into_nodes()
            .into_iter()
            .map(|node| self.scene.attach(node))
            .collect();
        let lava_light = config.features.lava.map(|color| {
            self.scene.attach(Box::new(LightNode::new(
                point_light(LightKind::Point, color, 1.5, 20.0),
                LAVA_LIGHT_POSITION,
            )))
        });
        attached.extend(lava_light);

        for old in std::mem::replace(&mut self.terrain, attached) {
            self.scene.detach(old);
        }
        self.lights.lava = lava_light;
        self.water = self
            .terrain
            .iter()
            .copied()
            .find(|id| self.scene.get(*id).is_some_and(|node| node.role() == NodeRole::Water))
            .and_then(|node| {
                let water = self.scene.get(node)?;
                let base = (0..water.instance_count())
                    .filter_map(|i| water.get_local_transform(i))
                    .map(|tile| tile.position.y)
                    .collect();
                Some(Water { node, base })
            });
        debug!(
            "swapped in {} ({}), {} live geometries",
            config.kind,
            self.selection.style,
            self.scene.pool().live_geometries()
        );
        true
    }

    fn animate_ambient(&mut self, t: f32) {
        set_intensity(&mut self.scene, self.lights.campfire, 1.5 + (t * 10.0).sin() * 0.5);
        set_intensity(&mut self.scene, self.lights.tent, 0.5 + (t * 0.5).sin() * 0.05);
        set_intensity(&mut self.scene, self.lights.lava, 1.5 + (t * 2.0).sin() * 0.5);
        if let Some(water) = &self.water {
            if let Some(node) = self.scene.get_mut(water.node) {
                let base = &water.base;
                node.set_local_transform_all(&mut |i, tile| {
                    if let Some(y) = base.get(i) {
                        let wave = (t + tile.position.x * 0.6 + tile.position.z * 0.4).sin();
                        tile.position.y = y + wave * WATER_BOB;
                    }
                });
            }
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.config.viewport = [width.max(1), height.max(1)];
        self.compositor.resize(width, height);
    }

    pub fn frame(&self) -> Frame<'_> {
        Frame {
            batches: RenderBatches::collect(self.scene.get_render()),
            uniforms: self.compositor.to_raw(),
            fog: self.fog,
            background: self.background.as_ref(),
        }
    }

    /// Tear everything down. Safe to call more than once; later commands and ticks do nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.loads = FuturesUnordered::new();
        self.timers.clear();
        self.events.dispose(&mut self.scene);
        for particles in [self.precipitation.as_mut(), self.embers.as_mut()].into_iter().flatten() {
            particles.field.dispose();
        }
        self.precipitation = None;
        self.embers = None;
        self.lightning = None;
        self.water = None;
        self.terrain.clear();
        self.lights = Lights::default();
        self.scene.clear();
        self.background = None;
        self.compositor.set_lightning(0.0);
        self.disposed = true;
        info!("environment disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scene(&self) -> &SceneRoot {
        &self.scene
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// For enabling and disabling compositor stages.
    pub fn compositor_mut(&mut self) -> &mut Compositor {
        &mut self.compositor
    }

    pub fn events(&self) -> &EventScheduler {
        &self.events
    }

    pub fn background(&self) -> Option<&Background> {
        self.background.as_ref()
    }

    pub fn fog(&self) -> Fog {
        self.fog
    }

    /// Ids of the nodes that make up the current scenery.
    pub fn terrain(&self) -> &[NodeId] {
        &self.terrain
    }

    pub fn precipitation(&self) -> Option<&ParticleField> {
        self.precipitation.as_ref().map(|p| &p.field)
    }

    pub fn embers(&self) -> Option<&ParticleField> {
        self.embers.as_ref().map(|p| &p.field)
    }

    /// Whether the current weather has lightning.
    pub fn has_lightning(&self) -> bool {
        self.lightning.is_some()
    }

    /// Number of scenery requests made so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
